//! HTTP API v1.
//!
//! Endpoints:
//!
//! - `POST /v1/tasks`              — Submit a deliberation
//! - `GET  /v1/tasks/{id}`         — Fetch a task
//! - `POST /v1/tasks/{id}/rounds`  — Advance a task by one round
//! - `POST /v1/stream`             — Stream one model response as SSE
//! - `GET  /v1/credits`            — The caller's credit balance

use axum::{
    Extension, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::sse::{Event as SseEvent, Sse},
    response::{IntoResponse, Json},
    routing::{get, post},
};
use conclave_core::council::Task;
use conclave_core::error::CouncilError;
use conclave_council::{AdvanceRequest, Caller, RoundOutcome, SubmitRequest};
use conclave_quota::client_identifier;
use conclave_stream::StreamRequest;
use serde::Serialize;
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tracing::info;

use crate::SharedState;
use crate::auth::AuthUser;
use crate::error::ApiError;

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router() -> Router<SharedState> {
    Router::new()
        .route("/tasks", post(submit_task_handler))
        .route("/tasks/{id}", get(get_task_handler))
        .route("/tasks/{id}/rounds", post(advance_round_handler))
        .route("/stream", post(stream_handler))
        .route("/credits", get(credits_handler))
}

// ── Deliberation ──────────────────────────────────────────────────────────

async fn submit_task_handler(
    State(state): State<SharedState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    headers: HeaderMap,
    Json(payload): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let caller = Caller {
        rate_key: client_identifier(
            Some(&user_id),
            header("x-forwarded-for"),
            header("x-real-ip"),
        ),
        user_id: Some(user_id),
    };

    let task = state.orchestrator.submit(&caller, payload).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task_handler(
    State(state): State<SharedState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(owned_task(&state, &user_id, &id).await?))
}

/// The body is optional; an empty body runs the round with the stored
/// prompt and roster.
async fn advance_round_handler(
    State(state): State<SharedState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<RoundOutcome>, ApiError> {
    let request: AdvanceRequest = if body.iter().all(u8::is_ascii_whitespace) {
        AdvanceRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| CouncilError::Validation(format!("malformed body: {e}")))?
    };

    owned_task(&state, &user_id, &id).await?;
    let outcome = state.orchestrator.advance(&id, request).await?;
    Ok(Json(outcome))
}

/// Tasks of other users are reported as missing.
async fn owned_task(state: &SharedState, user_id: &str, id: &str) -> Result<Task, ApiError> {
    let task = state.orchestrator.get_task(id).await?;
    match &task.user_id {
        Some(owner) if owner != user_id => Err(CouncilError::TaskNotFound(id.to_string()).into()),
        _ => Ok(task),
    }
}

// ── SSE Streaming ─────────────────────────────────────────────────────────

/// `POST /v1/stream` — one `data:` line of JSON per frame, named by the
/// frame type. The session id is returned in `X-Session-Id`.
async fn stream_handler(
    State(state): State<SharedState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(payload): Json<StreamRequest>,
) -> Result<impl IntoResponse, ApiError> {
    info!(user_id = %user_id, provider = %payload.provider, model = %payload.model, "v1/stream SSE request");

    let handle = state.streams.start(&user_id, payload).await?;
    let session_id = handle.session_id().to_string();

    let stream = handle.into_stream().map(|frame| {
        let data = serde_json::to_string(&frame).unwrap_or_default();
        Ok::<_, Infallible>(SseEvent::default().event(frame.event_type()).data(data))
    });

    Ok(([("x-session-id", session_id)], Sse::new(stream)))
}

// ── Credits ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreditsResponse {
    user_id: String,
    balance: i64,
}

async fn credits_handler(
    State(state): State<SharedState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<Json<CreditsResponse>, ApiError> {
    let balance = state.ledger.balance(&user_id).await?;
    Ok(Json(CreditsResponse { user_id, balance }))
}

#[cfg(test)]
mod tests {
    use crate::test_support::{TOKEN, authed, test_state};
    use crate::build_router;
    use axum::body::Body;
    use conclave_core::store::CreditStore;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn council_body(provider: &str) -> Value {
        json!({
            "prompt": "Should we shard the database?",
            "agents": [
                {"id": "a1", "name": "Ada", "specialty": "databases", "provider": provider, "model": "m"},
                {"id": "a2", "name": "Lin", "specialty": "operations", "provider": provider, "model": "m"}
            ],
            "maxRounds": 2
        })
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        authed(Request::builder().method("POST").uri(uri))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn submit_then_advance_to_completion() {
        let (state, store) = test_state().await;
        store.grant("alice", 10, "test").await.unwrap();
        let app = build_router(state);

        let response = app
            .clone()
            .oneshot(post_json("/v1/tasks", &council_body("demo")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let task = json_body(response).await;
        assert_eq!(task["status"], "processing");
        assert_eq!(task["current_round"], 1);
        let id = task["id"].as_str().unwrap().to_string();

        let round = |n: u64| {
            let app = app.clone();
            let id = id.clone();
            async move {
                let req = authed(
                    Request::builder()
                        .method("POST")
                        .uri(format!("/v1/tasks/{id}/rounds")),
                )
                .body(Body::empty())
                .unwrap();
                let response = app.oneshot(req).await.unwrap();
                assert_eq!(response.status(), StatusCode::OK);
                let outcome = json_body(response).await;
                assert_eq!(outcome["currentRound"], n);
                outcome
            }
        };

        let first = round(1).await;
        assert_eq!(first["shouldContinue"], true);
        assert_eq!(first["results"].as_array().unwrap().len(), 2);
        let second = round(2).await;
        assert_eq!(second["shouldContinue"], false);
        assert_eq!(second["discussionRounds"].as_array().unwrap().len(), 2);

        let req = authed(
            Request::builder()
                .method("POST")
                .uri(format!("/v1/tasks/{id}/rounds")),
        )
        .body(Body::empty())
        .unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let req = authed(Request::builder().uri(format!("/v1/tasks/{id}")))
            .body(Body::empty())
            .unwrap();
        let task = json_body(app.oneshot(req).await.unwrap()).await;
        assert_eq!(task["status"], "completed");
        assert_eq!(task["credits_charged"], 2);
    }

    #[tokio::test]
    async fn insufficient_credit_is_payment_required() {
        let (state, store) = test_state().await;
        store.grant("alice", 1, "test").await.unwrap();
        let app = build_router(state);

        let response = app
            .oneshot(post_json("/v1/tasks", &council_body("demo")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let body = json_body(response).await;
        assert_eq!(body["balance"], 1);
        assert_eq!(body["required"], 2);
    }

    #[tokio::test]
    async fn invalid_submission_is_bad_request() {
        let (state, _) = test_state().await;
        let app = build_router(state);
        let mut body = council_body("demo");
        body["agents"] = json!([]);

        let response = app.oneshot(post_json("/v1/tasks", &body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "invalid_request");
    }

    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let (state, _) = test_state().await;
        let app = build_router(state);
        let req = authed(Request::builder().uri("/v1/tasks/missing"))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stream_emits_sse_frames() {
        let (state, _) = test_state().await;
        let app = build_router(state);
        let body = json!({
            "messages": [{"role": "user", "content": "hello"}],
            "provider": "openai",
            "model": "gpt-4o"
        });

        let response = app.oneshot(post_json("/v1/stream", &body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-session-id"));
        assert!(
            response.headers()["content-type"]
                .to_str()
                .unwrap()
                .starts_with("text/event-stream")
        );

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("event: token"));
        assert!(text.contains(r#""token":"echo: hello""#));
        assert_eq!(text.matches("event: done").count(), 1);
        assert!(!text.contains("event: error"));
    }

    #[tokio::test]
    async fn stream_rejects_unsupported_provider() {
        let (state, _) = test_state().await;
        let app = build_router(state);
        let body = json!({
            "messages": [{"role": "user", "content": "hello"}],
            "provider": "mistral",
            "model": "large"
        });
        let response = app.oneshot(post_json("/v1/stream", &body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "unsupported_provider");
    }

    #[tokio::test]
    async fn credits_reports_balance() {
        let (state, store) = test_state().await;
        store.grant("alice", 7, "test").await.unwrap();
        let app = build_router(state);

        let req = authed(Request::builder().uri("/v1/credits"))
            .body(Body::empty())
            .unwrap();
        let body = json_body(app.oneshot(req).await.unwrap()).await;
        assert_eq!(body, json!({"userId": "alice", "balance": 7}));
    }

    #[tokio::test]
    async fn missing_or_bad_token_is_unauthorized() {
        let (state, _) = test_state().await;
        let app = build_router(state);

        let req = Request::builder()
            .uri("/v1/credits")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .uri("/v1/credits")
            .header("authorization", format!("Bearer {TOKEN}-wrong"))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error"], "unauthorized");
    }
}
