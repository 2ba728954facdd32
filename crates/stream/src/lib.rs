//! Streaming session manager for Conclave.
//!
//! One session relays one model response to one client as a sequence of
//! frames. The manager owns the retry loop: a retryable failure backs off
//! and opens a fresh provider stream, so reconnects, heartbeats and
//! cancellation are handled in one place rather than by the token source.

pub mod backoff;
pub mod frame;
pub mod manager;
pub mod request;
pub mod state;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use backoff::Backoff;
pub use frame::StreamFrame;
pub use manager::{STREAM_ENDPOINT, StreamHandle, StreamManager};
pub use request::{StreamOptions, StreamRequest};
pub use state::ConnectionState;
