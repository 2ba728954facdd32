//! Model provider implementations for Conclave.
//!
//! All providers implement the `conclave_core::Provider` trait and reduce
//! their backend's envelope and stream framing to the shared
//! `StreamEvent` vocabulary. The router maps provider keys to adapters.

pub mod anthropic;
pub mod demo;
pub mod google;
mod http;
pub mod models;
pub mod openai_compat;
pub mod router;
mod sse;

pub use anthropic::AnthropicProvider;
pub use google::GoogleProvider;
pub use models::resolve_model;
pub use openai_compat::OpenAiCompatProvider;
pub use router::{ProviderRouter, build_from_config};
