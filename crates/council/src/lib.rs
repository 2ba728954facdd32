//! Multi-round deliberation for Conclave.
//!
//! A task runs a fixed number of rounds. In every round each agent on the
//! roster answers once, in roster order, seeing the transcript of earlier
//! rounds and the answers already given in the current one.

pub mod context;
pub mod orchestrator;
pub mod prompts;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use orchestrator::{AdvanceRequest, Caller, Orchestrator, RoundOutcome, SubmitRequest};
