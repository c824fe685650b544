//! Interactive Command Plane — a bounded channel of `Command` values
//! drained at named checkpoints inside the Iteration Driver loop (spec
//! §4.13).
//!
//! Grounded on `events/bus.rs` (bus/subscriber registration shape) and
//! `harness/progress.rs` (checkpoint/marker bookkeeping), generalized
//! from a fire-and-forget event bus into a bidirectional, bounded
//! command channel that a caller can also read status from.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::decision::Action;

/// The six points in the Iteration Driver loop body where pending
/// commands are drained (spec §4.13).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Checkpoint {
    BeforeContextBuild,
    BeforePrompt,
    BeforeAgentSend,
    AfterAgentResponse,
    BeforeDecision,
    AfterDecision,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Pause,
    Resume,
    Stop,
    ToExecutor(String),
    ToSupervisor(String),
    OverrideDecision(Action),
}

/// Default bound on the command queue; bursts beyond this are rejected
/// by `try_send` rather than applied out of order.
pub const DEFAULT_CAPACITY: usize = 32;

pub fn channel(capacity: usize) -> (CommandSender, CommandReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (CommandSender { tx }, CommandReceiver { rx, paused: false })
}

#[derive(Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<Command>,
}

#[derive(Debug, thiserror::Error)]
#[error("command channel closed or full")]
pub struct SendError;

impl CommandSender {
    pub fn send(&self, command: Command) -> Result<(), SendError> {
        self.tx.try_send(command).map_err(|_| SendError)
    }
}

pub struct CommandReceiver {
    rx: mpsc::Receiver<Command>,
    paused: bool,
}

/// What draining the queue at a checkpoint produced: whether a stop was
/// requested, any pending decision override, and messages destined for
/// the executor/supervisor.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DrainOutcome {
    pub stop_requested: bool,
    pub override_action: Option<Action>,
    pub executor_messages: Vec<String>,
    pub supervisor_messages: Vec<String>,
}

impl CommandReceiver {
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Drains all currently-queued commands without blocking. Commands
    /// are idempotent value types, so redelivery (e.g. two `Pause`s in a
    /// row) is a no-op in effect, matching spec §8's round-trip
    /// property.
    pub fn drain(&mut self) -> DrainOutcome {
        let mut outcome = DrainOutcome::default();
        while let Ok(command) = self.rx.try_recv() {
            match command {
                Command::Pause => self.paused = true,
                Command::Resume => self.paused = false,
                Command::Stop => outcome.stop_requested = true,
                Command::ToExecutor(msg) => outcome.executor_messages.push(msg),
                Command::ToSupervisor(msg) => outcome.supervisor_messages.push(msg),
                Command::OverrideDecision(action) => outcome.override_action = Some(action),
            }
        }
        outcome
    }

    /// Blocks until `Resume` (or `Stop`) arrives while paused; a no-op
    /// while not paused. Called at the top of each checkpoint so a pause
    /// takes effect immediately rather than at the next full iteration.
    pub async fn wait_if_paused(&mut self) -> DrainOutcome {
        let mut outcome = DrainOutcome::default();
        while self.paused {
            match self.rx.recv().await {
                Some(Command::Resume) => self.paused = false,
                Some(Command::Stop) => {
                    self.paused = false;
                    outcome.stop_requested = true;
                }
                Some(Command::Pause) => {}
                Some(Command::ToExecutor(msg)) => outcome.executor_messages.push(msg),
                Some(Command::ToSupervisor(msg)) => outcome.supervisor_messages.push(msg),
                Some(Command::OverrideDecision(action)) => outcome.override_action = Some(action),
                None => break,
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_then_resume_round_trips_to_not_paused() {
        let (tx, mut rx) = channel(DEFAULT_CAPACITY);
        tx.send(Command::Pause).unwrap();
        tx.send(Command::Resume).unwrap();
        rx.drain();
        assert!(!rx.is_paused());
    }

    #[test]
    fn duplicate_pause_is_idempotent() {
        let (tx, mut rx) = channel(DEFAULT_CAPACITY);
        tx.send(Command::Pause).unwrap();
        tx.send(Command::Pause).unwrap();
        rx.drain();
        assert!(rx.is_paused());
    }

    #[test]
    fn stop_is_reported_in_drain_outcome() {
        let (tx, mut rx) = channel(DEFAULT_CAPACITY);
        tx.send(Command::Stop).unwrap();
        let outcome = rx.drain();
        assert!(outcome.stop_requested);
    }

    #[test]
    fn override_decision_surfaces_in_outcome() {
        let (tx, mut rx) = channel(DEFAULT_CAPACITY);
        tx.send(Command::OverrideDecision(Action::Accept)).unwrap();
        let outcome = rx.drain();
        assert_eq!(outcome.override_action, Some(Action::Accept));
    }

    #[tokio::test]
    async fn wait_if_paused_returns_immediately_when_not_paused() {
        let (_tx, mut rx) = channel(DEFAULT_CAPACITY);
        let outcome = rx.wait_if_paused().await;
        assert_eq!(outcome, DrainOutcome::default());
    }
}
