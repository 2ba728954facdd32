//! # Conclave Core
//!
//! Domain types, traits, and error definitions for the Conclave
//! deliberation orchestrator. This crate has **no framework dependencies**;
//! it defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator is defined as a trait here: model backends
//! (`Provider`), persistence (`Store`) and identity (`IdentityVerifier`).
//! Implementations live in their respective crates, so tests swap in
//! scripted providers and an in-process store.

pub mod council;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod message;
pub mod provider;
pub mod session;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use council::{AgentDescriptor, AgentResponse, DiscussionRound, Task, TaskStatus};
pub use error::{
    AuthError, CouncilError, Error, ProviderError, QuotaError, Result, StoreError, StreamError,
};
pub use identity::{IdentityVerifier, StaticTokens};
pub use ledger::{
    CreditAccount, CreditTransaction, DebitOutcome, RateDecision, RateLimitRecord, TransactionKind,
};
pub use message::{Message, Role};
pub use provider::{Completion, CompletionRequest, EventStream, Provider, StreamEvent, Usage};
pub use session::{SessionOutcome, SessionStatus, StreamingSession};
pub use store::{CreditStore, RateLimitStore, SessionStore, Store, TaskStore};
