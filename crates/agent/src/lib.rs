//! The flow orchestration engine.
//!
//! A run takes a user input through a **DECIDE → ACT** cycle:
//!
//! 1. **Seed** a fresh conversation (system message, then the user input)
//! 2. **Resolve** the visible tools through the filter manager
//! 3. **DECIDE**: ask the model what to do next
//! 4. **ACT**: if it requested tools, run them in order, append results, go to 3
//! 5. **DONE**: otherwise emit the answer as `token` + `final`
//!
//! Runs are consumed either buffered ([`FlowOrchestrator::run_buffered`]) or
//! as a cancellable [`EventStream`] ([`FlowOrchestrator::run_streaming`]).

pub mod engine;
pub mod stream;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use engine::{DEFAULT_MAX_STEPS, FlowOrchestrator, RunError, RunInput, RunOutcome, RunStatus};
pub use stream::EventStream;
