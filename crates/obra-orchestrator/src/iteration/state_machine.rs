//! Iteration Driver state machine — explicit states and a legal
//! transition guard (spec §4.14).
//!
//! Grounded directly on the teacher's `state_machine.rs`
//! (`OrchestratorState` + `is_legal_transition` + `TransitionRecord`
//! log), renamed to the states spec'd for Obra's loop body:
//! `BuildingContext`, `Prompting`, `AwaitingAgent`, `Validating`,
//! `Deciding`, `Handling`, plus terminal `Accepted`, `Escalated`,
//! `Stopped`.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationState {
    BuildingContext,
    Prompting,
    AwaitingAgent,
    Validating,
    Deciding,
    Handling,
    Accepted,
    Escalated,
    Stopped,
}

impl IterationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Accepted | Self::Escalated | Self::Stopped)
    }
}

impl fmt::Display for IterationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// ```text
/// BuildingContext → Prompting
/// Prompting → AwaitingAgent
/// AwaitingAgent → Validating
/// Validating → Deciding
/// Deciding → Handling
/// Handling → BuildingContext | Accepted | Escalated   (retry/clarify loop back, or terminate)
/// any non-terminal → Stopped                           (interactive stop, §4.13)
/// ```
fn is_legal_transition(from: IterationState, to: IterationState) -> bool {
    use IterationState::*;

    if to == Stopped && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (BuildingContext, Prompting)
            | (Prompting, AwaitingAgent)
            | (AwaitingAgent, Validating)
            | (Validating, Deciding)
            | (Deciding, Handling)
            | (Handling, BuildingContext)
            | (Handling, Accepted)
            | (Handling, Escalated)
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: IterationState,
    pub to: IterationState,
    pub iteration: u32,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IllegalTransition {
    pub from: IterationState,
    pub to: IterationState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal iteration state transition: {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

#[derive(Debug)]
pub struct IterationStateMachine {
    current: IterationState,
    iteration: u32,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl IterationStateMachine {
    pub fn new() -> Self {
        Self {
            current: IterationState::BuildingContext,
            iteration: 0,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> IterationState {
        self.current
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn set_iteration(&mut self, iteration: u32) {
        self.iteration = iteration;
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    #[tracing::instrument(skip(self, reason))]
    pub fn advance(&mut self, to: IterationState, reason: Option<&str>) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition { from: self.current, to });
        }

        let record = TransitionRecord {
            from: self.current,
            to,
            iteration: self.iteration,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        };
        tracing::debug!(from = %self.current, to = %to, iteration = self.iteration, "iteration state transition");
        self.transitions.push(record);
        self.current = to;
        Ok(())
    }

    pub fn stop(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(IterationState::Stopped, Some(reason))
    }
}

impl Default for IterationStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
