//! Streaming session manager.
//!
//! `start` gates a request (validation, rate limit, concurrent stream cap),
//! records a `streaming` session and spawns one task that owns the session
//! until it ends. That task:
//!
//! 1. opens a provider stream and relays tokens as indexed frames
//! 2. emits heartbeats every N tokens and whenever the line has been idle
//! 3. fails an attempt whose read stalls past the read timeout
//! 4. on a retryable failure backs off and opens a fresh stream, replaying
//!    the partial answer as a trailing assistant message
//! 5. finalizes the session once, then sends the single terminal frame
//!
//! Cancellation (explicit, or the client dropping the frame receiver)
//! aborts the in-flight read and ends the session without an error frame.

use conclave_config::StreamingConfig;
use conclave_core::error::{ProviderError, QuotaError, Result, StreamError};
use conclave_core::message::Message;
use conclave_core::provider::{
    CompletionRequest, EventStream, Provider, STREAM_BUFFER, StreamEvent, Usage,
};
use conclave_core::session::{SessionOutcome, StreamingSession};
use conclave_core::store::SessionStore;
use conclave_providers::ProviderRouter;
use conclave_quota::RateLimiter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::frame::StreamFrame;
use crate::request::StreamRequest;
use crate::state::ConnectionState;

/// Rate-limit endpoint name for stream openings.
pub const STREAM_ENDPOINT: &str = "stream";

/// Starts and owns streaming sessions. Cheap to clone.
#[derive(Clone)]
pub struct StreamManager {
    providers: ProviderRouter,
    sessions: Arc<dyn SessionStore>,
    limiter: RateLimiter,
    config: StreamingConfig,
}

impl StreamManager {
    pub fn new(
        providers: ProviderRouter,
        sessions: Arc<dyn SessionStore>,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            providers,
            sessions,
            limiter,
            config: StreamingConfig::default(),
        }
    }

    pub fn with_config(mut self, config: StreamingConfig) -> Self {
        self.config = config;
        self
    }

    /// Gate the request, record the session and start relaying.
    ///
    /// Errors here happen before any frame is produced. Everything after,
    /// including failing to reach the provider, arrives as frames.
    pub async fn start(&self, user_id: &str, request: StreamRequest) -> Result<StreamHandle> {
        request.validate()?;
        let provider = self
            .providers
            .get(&request.provider)
            .ok_or_else(|| StreamError::UnknownProvider(request.provider.clone()))?;

        self.limiter.enforce(user_id, STREAM_ENDPOINT).await?;

        let active = self.sessions.count_active_sessions(user_id).await?;
        let limit = self.config.max_concurrent_streams;
        if active >= limit {
            warn!(user_id, active, limit, "Concurrent stream limit reached");
            return Err(QuotaError::TooManyStreams { active, limit }.into());
        }

        let mut session = StreamingSession::start(user_id, &request.provider, &request.model);
        session.council_id = request.council_id.clone();
        session.agent_id = request.agent_id.clone();
        self.sessions.create_session(&session).await?;

        let (frames_tx, frames_rx) = mpsc::channel(STREAM_BUFFER);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let cancel = CancellationToken::new();

        info!(
            session_id = %session.id,
            user_id,
            provider = %request.provider,
            model = %request.model,
            "Stream session started"
        );

        let run = SessionRun {
            session_id: session.id.clone(),
            provider,
            sessions: self.sessions.clone(),
            base_request: request.to_completion_request(),
            backoff: Backoff::from_config(&self.config),
            read_timeout: Duration::from_secs(self.config.read_timeout_secs),
            heartbeat_every_tokens: self.config.heartbeat_every_tokens,
            heartbeat_interval: Duration::from_secs(self.config.heartbeat_interval_secs),
            frames: frames_tx,
            state: state_tx,
            cancel: cancel.clone(),
            last_frame_at: Instant::now(),
        };
        tokio::spawn(run.run());

        Ok(StreamHandle {
            session_id: session.id,
            frames: frames_rx,
            state: state_rx,
            cancel,
        })
    }
}

/// The client's side of a running session.
pub struct StreamHandle {
    session_id: String,
    frames: mpsc::Receiver<StreamFrame>,
    state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
}

impl StreamHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The next frame, or `None` once the session has ended.
    pub async fn next_frame(&mut self) -> Option<StreamFrame> {
        self.frames.recv().await
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Stop the session. No terminal frame follows.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Frames as a stream. Dropping the stream cancels the session.
    pub fn into_stream(self) -> ReceiverStream<StreamFrame> {
        ReceiverStream::new(self.frames)
    }
}

/// How a session ended, before its terminal frame is sent.
enum Ending {
    Completed {
        usage: Option<Usage>,
        finish_reason: String,
    },
    Failed(ProviderError),
    Cancelled,
}

/// Why one provider stream stopped.
enum AttemptEnd {
    Finished { reason: String },
    Failed(ProviderError),
    Cancelled,
}

enum Opening {
    Cancelled,
    TimedOut,
    Heartbeat,
    Opened(std::result::Result<EventStream, ProviderError>),
}

enum Step {
    Cancelled,
    ReadTimeout,
    Heartbeat,
    Item(Option<std::result::Result<StreamEvent, ProviderError>>),
}

struct SessionRun {
    session_id: String,
    provider: Arc<dyn Provider>,
    sessions: Arc<dyn SessionStore>,
    base_request: CompletionRequest,
    backoff: Backoff,
    read_timeout: Duration,
    heartbeat_every_tokens: u32,
    heartbeat_interval: Duration,
    frames: mpsc::Sender<StreamFrame>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    last_frame_at: Instant,
}

impl SessionRun {
    async fn run(mut self) {
        let ending = self.drive().await;

        let outcome = match &ending {
            Ending::Completed { usage, .. } => SessionOutcome::completed(usage.unwrap_or_default()),
            Ending::Failed(e) => SessionOutcome::failed(e.code(), e.to_string()),
            Ending::Cancelled => SessionOutcome::cancelled(),
        };
        match self.sessions.finalize_session(&self.session_id, &outcome).await {
            Ok(true) => {
                info!(session_id = %self.session_id, status = outcome.status.as_str(), "Stream session finalized");
            }
            Ok(false) => warn!(session_id = %self.session_id, "Stream session was already finalized"),
            Err(e) => error!(session_id = %self.session_id, error = %e, "Failed to finalize stream session"),
        }

        match ending {
            Ending::Completed {
                usage,
                finish_reason,
            } => {
                let _ = self
                    .frames
                    .send(StreamFrame::Done {
                        usage,
                        finish_reason,
                    })
                    .await;
                self.set_state(ConnectionState::Disconnected);
            }
            Ending::Failed(e) => {
                let _ = self.frames.send(StreamFrame::from_error(&e)).await;
                self.set_state(ConnectionState::Error);
            }
            Ending::Cancelled => {
                debug!(session_id = %self.session_id, "Stream session cancelled");
                self.set_state(ConnectionState::Disconnected);
            }
        }
    }

    /// The retry loop around single relay attempts.
    async fn drive(&mut self) -> Ending {
        let mut index: u64 = 0;
        let mut partial = String::new();
        let mut retries: u32 = 0;
        // Summed over every attempt, resumed ones included
        let mut usage: Option<Usage> = None;

        self.set_state(ConnectionState::Connecting);

        loop {
            let error = match self.relay_attempt(&mut index, &mut partial, &mut usage).await {
                AttemptEnd::Finished { reason } => {
                    return Ending::Completed {
                        usage,
                        finish_reason: reason,
                    };
                }
                AttemptEnd::Cancelled => return Ending::Cancelled,
                AttemptEnd::Failed(e) => e,
            };

            let delay = match self.backoff.next_delay(retries) {
                Some(delay) if error.is_retryable() => delay,
                _ => {
                    warn!(
                        session_id = %self.session_id,
                        attempt = retries,
                        code = error.code(),
                        error = %error,
                        "Stream failed"
                    );
                    return Ending::Failed(error);
                }
            };
            retries += 1;

            warn!(
                session_id = %self.session_id,
                attempt = retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retryable stream error, reconnecting"
            );
            self.set_state(ConnectionState::Reconnecting);

            let cancelled = tokio::select! {
                _ = self.cancel.cancelled() => true,
                _ = self.frames.closed() => true,
                _ = tokio::time::sleep(delay) => false,
            };
            if cancelled {
                return Ending::Cancelled;
            }
            self.set_state(ConnectionState::Connecting);
        }
    }

    /// Open one provider stream and relay it until it finishes or fails.
    async fn relay_attempt(
        &mut self,
        index: &mut u64,
        partial: &mut String,
        usage: &mut Option<Usage>,
    ) -> AttemptEnd {
        let request = self.request_for(partial);
        let provider = self.provider.clone();
        let open = provider.stream_execute(request);
        tokio::pin!(open);

        // Opening is bounded by the same deadline as each read
        let open_deadline = Instant::now() + self.read_timeout;
        let opened = loop {
            let heartbeat_at = self.last_frame_at + self.heartbeat_interval;
            let step = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Opening::Cancelled,
                _ = self.frames.closed() => Opening::Cancelled,
                _ = tokio::time::sleep_until(open_deadline) => Opening::TimedOut,
                _ = tokio::time::sleep_until(heartbeat_at), if !self.heartbeat_interval.is_zero() => Opening::Heartbeat,
                opened = &mut open => Opening::Opened(opened),
            };
            match step {
                Opening::Cancelled => return AttemptEnd::Cancelled,
                Opening::TimedOut => {
                    return AttemptEnd::Failed(ProviderError::Timeout(format!(
                        "provider did not open the stream within {}s",
                        self.read_timeout.as_secs()
                    )));
                }
                Opening::Heartbeat => {
                    if !self.send(StreamFrame::heartbeat()).await {
                        return AttemptEnd::Cancelled;
                    }
                }
                Opening::Opened(opened) => break opened,
            }
        };
        let mut events = match opened {
            Ok(events) => events,
            Err(e) => return AttemptEnd::Failed(e),
        };

        let mut connected = false;
        let mut tokens_since_heartbeat: u32 = 0;
        let mut read_deadline = Instant::now() + self.read_timeout;

        loop {
            let heartbeat_at = self.last_frame_at + self.heartbeat_interval;
            let step = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Step::Cancelled,
                _ = self.frames.closed() => Step::Cancelled,
                _ = tokio::time::sleep_until(read_deadline) => Step::ReadTimeout,
                _ = tokio::time::sleep_until(heartbeat_at), if !self.heartbeat_interval.is_zero() => Step::Heartbeat,
                item = events.recv() => Step::Item(item),
            };

            let event = match step {
                Step::Cancelled => return AttemptEnd::Cancelled,
                Step::ReadTimeout => {
                    return AttemptEnd::Failed(ProviderError::Timeout(format!(
                        "no data from provider for {}s",
                        self.read_timeout.as_secs()
                    )));
                }
                Step::Heartbeat => {
                    if !self.send(StreamFrame::heartbeat()).await {
                        return AttemptEnd::Cancelled;
                    }
                    continue;
                }
                Step::Item(None) => {
                    return AttemptEnd::Failed(ProviderError::StreamInterrupted(
                        "provider stream closed before completion".into(),
                    ));
                }
                Step::Item(Some(Err(e))) => return AttemptEnd::Failed(e),
                Step::Item(Some(Ok(event))) => event,
            };

            read_deadline = Instant::now() + self.read_timeout;
            if !connected {
                connected = true;
                self.set_state(ConnectionState::Connected);
            }

            match event {
                StreamEvent::Token { text } => {
                    self.set_state(ConnectionState::Streaming);
                    partial.push_str(&text);
                    let frame = StreamFrame::Token {
                        token: text,
                        index: *index,
                    };
                    *index += 1;
                    if !self.send(frame).await {
                        return AttemptEnd::Cancelled;
                    }

                    tokens_since_heartbeat += 1;
                    if self.heartbeat_every_tokens > 0
                        && tokens_since_heartbeat >= self.heartbeat_every_tokens
                    {
                        tokens_since_heartbeat = 0;
                        if !self.send(StreamFrame::heartbeat()).await {
                            return AttemptEnd::Cancelled;
                        }
                    }
                }
                StreamEvent::Usage { usage: reported } => {
                    usage.get_or_insert_with(Usage::default).add(reported);
                }
                StreamEvent::Finished { reason } => {
                    return AttemptEnd::Finished { reason };
                }
            }
        }
    }

    /// The original request, plus the partial answer when resuming.
    fn request_for(&self, partial: &str) -> CompletionRequest {
        let mut request = self.base_request.clone();
        if !partial.is_empty() {
            request.messages.push(Message::assistant(partial));
        }
        request
    }

    /// Send a frame; false once the session is cancelled or the client left.
    async fn send(&mut self, frame: StreamFrame) -> bool {
        let sent = tokio::select! {
            _ = self.cancel.cancelled() => false,
            sent = self.frames.send(frame) => sent.is_ok(),
        };
        if sent {
            self.last_frame_at = Instant::now();
        }
        sent
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            if !current.can_transition_to(next) {
                debug!(session_id = %self.session_id, from = %current, to = %next, "Ignoring state transition");
                return false;
            }
            *current = next;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{Attempt, ScriptedStreamProvider, complete, tokens};
    use conclave_config::{RateLimitConfig, WindowConfig};
    use conclave_core::error::Error;
    use conclave_core::message::Role;
    use conclave_core::session::SessionStatus;
    use conclave_store::InMemoryStore;

    struct Harness {
        store: Arc<InMemoryStore>,
        provider: Arc<ScriptedStreamProvider>,
        manager: StreamManager,
    }

    fn harness(attempts: Vec<Attempt>, config: StreamingConfig) -> Harness {
        harness_with_limits(attempts, config, RateLimitConfig::default())
    }

    fn harness_with_limits(
        attempts: Vec<Attempt>,
        config: StreamingConfig,
        limits: RateLimitConfig,
    ) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let provider = Arc::new(ScriptedStreamProvider::new("openai", attempts));
        let router = ProviderRouter::new().with(provider.clone());
        let manager = StreamManager::new(
            router,
            store.clone(),
            RateLimiter::new(store.clone(), limits),
        )
        .with_config(config);
        Harness {
            store,
            provider,
            manager,
        }
    }

    fn request() -> StreamRequest {
        StreamRequest {
            messages: vec![Message::user("Tell me about consensus")],
            provider: "openai".into(),
            model: "gpt-4o".into(),
            temperature: None,
            max_tokens: None,
            stream_options: None,
            council_id: None,
            agent_id: None,
        }
    }

    async fn drain(handle: &mut StreamHandle) -> Vec<StreamFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = handle.next_frame().await {
            frames.push(frame);
        }
        frames
    }

    fn text(frames: &[StreamFrame]) -> String {
        frames
            .iter()
            .filter_map(|f| match f {
                StreamFrame::Token { token, .. } => Some(token.as_str()),
                _ => None,
            })
            .collect()
    }

    fn terminals(frames: &[StreamFrame]) -> usize {
        frames.iter().filter(|f| f.is_terminal()).count()
    }

    #[tokio::test]
    async fn relays_tokens_then_done() {
        let h = harness(
            vec![Attempt::Deliver(complete(&["Raft ", "elects ", "leaders."], Usage::new(12, 3)))],
            StreamingConfig::default(),
        );
        let mut handle = h.manager.start("u1", request()).await.unwrap();
        let frames = drain(&mut handle).await;

        assert_eq!(text(&frames), "Raft elects leaders.");
        assert_eq!(terminals(&frames), 1);
        assert_eq!(
            frames.last(),
            Some(&StreamFrame::Done {
                usage: Some(Usage::new(12, 3)),
                finish_reason: "stop".into()
            })
        );
        let indices: Vec<u64> = frames
            .iter()
            .filter_map(|f| match f {
                StreamFrame::Token { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);

        let session = h.store.get_session(handle.session_id()).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.usage, Some(Usage::new(12, 3)));
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupted_stream_resumes_with_partial_answer() {
        let mut first = tokens(&["Hel", "lo"]);
        first.push(Err(ProviderError::StreamInterrupted("connection reset".into())));
        let h = harness(
            vec![
                Attempt::Deliver(first),
                Attempt::Deliver(complete(&[" world"], Usage::new(5, 1))),
            ],
            StreamingConfig::default(),
        );

        let mut handle = h.manager.start("u1", request()).await.unwrap();
        let frames = drain(&mut handle).await;

        assert_eq!(text(&frames), "Hello world");
        assert_eq!(terminals(&frames), 1);
        assert!(matches!(frames.last(), Some(StreamFrame::Done { .. })));
        assert!(frames.contains(&StreamFrame::Token {
            token: " world".into(),
            index: 2
        }));

        let requests = h.provider.requests();
        assert_eq!(requests.len(), 2);
        let resumed = requests[1].messages.last().unwrap();
        assert_eq!(resumed.role, Role::Assistant);
        assert_eq!(resumed.content, "Hello");
        assert_eq!(requests[0].messages.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn usage_is_summed_across_resumed_attempts() {
        let mut first = tokens(&["Hel", "lo"]);
        first.push(Ok(StreamEvent::Usage {
            usage: Usage::new(4, 2),
        }));
        first.push(Err(ProviderError::StreamInterrupted("connection reset".into())));
        let h = harness(
            vec![
                Attempt::Deliver(first),
                Attempt::Deliver(complete(&[" world"], Usage::new(5, 1))),
            ],
            StreamingConfig::default(),
        );

        let mut handle = h.manager.start("u1", request()).await.unwrap();
        let frames = drain(&mut handle).await;

        assert_eq!(
            frames.last(),
            Some(&StreamFrame::Done {
                usage: Some(Usage::new(9, 3)),
                finish_reason: "stop".into(),
            })
        );
        let session = h.store.get_session(handle.session_id()).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_open_times_out_and_finalizes() {
        let h = harness(
            vec![Attempt::Hang],
            StreamingConfig {
                max_retries: 0,
                ..StreamingConfig::default()
            },
        );
        let started = Instant::now();
        let mut handle = h.manager.start("u1", request()).await.unwrap();
        let frames = drain(&mut handle).await;

        assert!(started.elapsed() >= Duration::from_secs(60));
        let heartbeats = frames.iter().filter(|f| f.event_type() == "heartbeat").count();
        assert!(heartbeats >= 3, "got {heartbeats} heartbeats");
        assert_eq!(terminals(&frames), 1);
        assert!(matches!(
            frames.last(),
            Some(StreamFrame::Error { code, retry: true, .. }) if code == "timeout"
        ));

        let session = h.store.get_session(handle.session_id()).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Error);
        assert_eq!(handle.state(), ConnectionState::Error);
        assert_eq!(h.store.count_active_sessions("u1").await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_open_is_retried() {
        let h = harness(
            vec![
                Attempt::Hang,
                Attempt::Deliver(complete(&["late"], Usage::new(1, 1))),
            ],
            StreamingConfig::default(),
        );
        let mut handle = h.manager.start("u1", request()).await.unwrap();
        let frames = drain(&mut handle).await;

        assert_eq!(text(&frames), "late");
        assert!(matches!(frames.last(), Some(StreamFrame::Done { .. })));
        assert_eq!(h.provider.requests().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_open_is_retried() {
        let h = harness(
            vec![
                Attempt::Refuse(ProviderError::RateLimited {
                    retry_after_secs: 1,
                }),
                Attempt::Deliver(complete(&["ok"], Usage::new(1, 1))),
            ],
            StreamingConfig::default(),
        );
        let mut handle = h.manager.start("u1", request()).await.unwrap();
        let frames = drain(&mut handle).await;
        assert_eq!(text(&frames), "ok");
        assert_eq!(h.provider.requests().len(), 2);
    }

    #[tokio::test]
    async fn fatal_error_ends_without_retry() {
        let h = harness(
            vec![Attempt::Refuse(ProviderError::AuthenticationFailed(
                "bad key".into(),
            ))],
            StreamingConfig::default(),
        );
        let mut handle = h.manager.start("u1", request()).await.unwrap();
        let frames = drain(&mut handle).await;

        assert_eq!(frames.len(), 1);
        match &frames[0] {
            StreamFrame::Error { code, retry, .. } => {
                assert_eq!(code, "unauthorized");
                assert!(!retry);
            }
            other => panic!("expected error frame, got {other:?}"),
        }
        assert_eq!(h.provider.requests().len(), 1);

        let session = h.store.get_session(handle.session_id()).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Error);
        assert_eq!(session.error_code.as_deref(), Some("unauthorized"));
        assert_eq!(handle.state(), ConnectionState::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded() {
        let attempts = (0..10)
            .map(|_| Attempt::Refuse(ProviderError::Network("unreachable".into())))
            .collect();
        let h = harness(attempts, StreamingConfig::default());

        let started = Instant::now();
        let mut handle = h.manager.start("u1", request()).await.unwrap();
        let frames = drain(&mut handle).await;

        assert_eq!(h.provider.requests().len(), 4);
        assert_eq!(terminals(&frames), 1);
        assert!(matches!(
            &frames[0],
            StreamFrame::Error { code, retry: true, .. } if code == "network"
        ));
        // 1s + 2s + 4s of backoff
        assert!(started.elapsed() >= Duration::from_secs(7));
    }

    #[tokio::test]
    async fn heartbeat_every_n_tokens() {
        let h = harness(
            vec![Attempt::Deliver(complete(&["a", "b", "c", "d", "e"], Usage::new(1, 5)))],
            StreamingConfig {
                heartbeat_every_tokens: 2,
                ..StreamingConfig::default()
            },
        );
        let mut handle = h.manager.start("u1", request()).await.unwrap();
        let frames = drain(&mut handle).await;
        let kinds: Vec<&str> = frames.iter().map(|f| f.event_type()).collect();
        assert_eq!(
            kinds,
            vec!["token", "token", "heartbeat", "token", "token", "heartbeat", "token", "done"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn idle_line_gets_heartbeats_then_times_out() {
        let h = harness(
            vec![Attempt::Stall(tokens(&["thinking"]))],
            StreamingConfig {
                max_retries: 0,
                ..StreamingConfig::default()
            },
        );
        let mut handle = h.manager.start("u1", request()).await.unwrap();
        let frames = drain(&mut handle).await;

        let heartbeats = frames.iter().filter(|f| f.event_type() == "heartbeat").count();
        assert!(heartbeats >= 3, "got {heartbeats} heartbeats");
        assert_eq!(terminals(&frames), 1);
        assert!(matches!(
            frames.last(),
            Some(StreamFrame::Error { code, .. }) if code == "timeout"
        ));
    }

    #[tokio::test]
    async fn cancel_ends_without_error_frame() {
        let h = harness(
            vec![Attempt::Stall(tokens(&["par", "tial"]))],
            StreamingConfig::default(),
        );
        let mut handle = h.manager.start("u1", request()).await.unwrap();
        assert!(matches!(handle.next_frame().await, Some(StreamFrame::Token { .. })));
        assert!(matches!(handle.next_frame().await, Some(StreamFrame::Token { .. })));

        handle.cancel();
        let rest = drain(&mut handle).await;
        assert_eq!(terminals(&rest), 0);

        let session = h.store.get_session(handle.session_id()).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Cancelled);
        assert!(session.error_code.is_none());
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn dropped_client_cancels_session() {
        let h = harness(vec![Attempt::Stall(Vec::new())], StreamingConfig::default());
        let handle = h.manager.start("u1", request()).await.unwrap();
        let session_id = handle.session_id().to_string();
        let mut state = handle.watch_state();
        drop(handle);

        state
            .wait_for(|s| s.is_terminal())
            .await
            .unwrap();
        // Finalization precedes the terminal state change
        let session = h.store.get_session(&session_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Cancelled);
    }

    #[tokio::test]
    async fn concurrent_stream_cap() {
        let h = harness(vec![], StreamingConfig::default());
        for _ in 0..5 {
            h.store
                .create_session(&StreamingSession::start("u1", "openai", "gpt-4o"))
                .await
                .unwrap();
        }
        match h.manager.start("u1", request()).await {
            Err(Error::Quota(QuotaError::TooManyStreams { active, limit })) => {
                assert_eq!((active, limit), (5, 5));
            }
            Err(other) => panic!("expected stream cap, got {other:?}"),
            Ok(_) => panic!("expected stream cap"),
        }
    }

    #[tokio::test]
    async fn rejects_before_opening() {
        let mut limits = RateLimitConfig::default();
        limits.endpoints.insert(
            STREAM_ENDPOINT.into(),
            WindowConfig {
                window_secs: 60,
                max_requests: 1,
            },
        );
        let h = harness_with_limits(
            vec![Attempt::Deliver(complete(&["x"], Usage::new(1, 1)))],
            StreamingConfig::default(),
            limits,
        );

        let mut invalid = request();
        invalid.messages.clear();
        assert!(matches!(
            h.manager.start("u1", invalid).await,
            Err(Error::Stream(StreamError::Validation(_)))
        ));

        let mut unregistered = request();
        unregistered.provider = "google".into();
        assert!(matches!(
            h.manager.start("u1", unregistered).await,
            Err(Error::Stream(StreamError::UnknownProvider(_)))
        ));

        let mut first = h.manager.start("u1", request()).await.unwrap();
        drain(&mut first).await;
        assert!(matches!(
            h.manager.start("u1", request()).await,
            Err(Error::Quota(QuotaError::RateLimited { .. }))
        ));
        assert_eq!(h.provider.requests().len(), 1);
    }
}
