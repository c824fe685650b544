pub mod subprocess;

pub use subprocess::SubprocessAgentSession;
