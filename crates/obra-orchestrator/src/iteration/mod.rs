pub mod driver;
pub mod state_machine;

pub use driver::{DriverConfig, DriverError, IterationDriver};
pub use state_machine::{IllegalTransition, IterationState, IterationStateMachine, TransitionRecord};
