//! HTTP API gateway for Conclave.
//!
//! Exposes the deliberation, streaming and credit endpoints under `/v1`
//! behind bearer authentication, plus an unauthenticated `/health`.
//!
//! Built on Axum for high performance async HTTP.

pub mod api_v1;
pub mod auth;
pub mod error;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use axum::{Router, middleware, response::Json, routing::get};
use conclave_config::{AppConfig, GatewayConfig};
use conclave_core::identity::IdentityVerifier;
use conclave_core::store::Store;
use conclave_council::Orchestrator;
use conclave_quota::{BillingFormula, CreditLedger, RateLimiter};
use conclave_store::{InMemoryStore, SqliteStore};
use conclave_stream::StreamManager;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

pub use auth::{AuthUser, RemoteVerifier, VerifierChain};
pub use error::ApiError;

/// Shared application state for the gateway.
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub streams: StreamManager,
    pub ledger: CreditLedger,
    pub identity: Arc<dyn IdentityVerifier>,
    pub gateway: GatewayConfig,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire every service onto one store.
    pub fn build<S: Store + 'static>(
        store: Arc<S>,
        config: &AppConfig,
        identity: Arc<dyn IdentityVerifier>,
    ) -> Result<Self, conclave_core::Error> {
        let providers = conclave_providers::router::build_from_config(config)?;
        let ledger = CreditLedger::new(store.clone(), config.billing.enabled);
        let limiter = RateLimiter::new(store.clone(), config.rate_limit.clone());

        let orchestrator = Orchestrator::new(
            store.clone(),
            providers.clone(),
            limiter.clone(),
            ledger.clone(),
        )
        .with_config(config.council.clone())
        .with_billing(BillingFormula::from_config(&config.billing));

        let streams = StreamManager::new(providers, store, limiter)
            .with_config(config.streaming.clone());

        Ok(Self {
            orchestrator,
            streams,
            ledger,
            identity,
            gateway: config.gateway.clone(),
        })
    }
}

/// Build the full router.
///
/// Layers applied:
/// - Bearer token authentication on all /v1 routes
/// - CORS restricted to the configured origins
/// - Request body size limit
/// - HTTP trace logging
pub fn build_router(state: SharedState) -> Router {
    let v1 = api_v1::v1_router().layer(middleware::from_fn_with_state(
        state.clone(),
        auth::auth_middleware,
    ));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", v1)
        .layer(DefaultBodyLimit::max(state.gateway.body_limit_bytes))
        .layer(cors_layer(&state.gateway.cors_origins))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let allowed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match origin.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(allowed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .expose_headers([
            header::RETRY_AFTER,
            header::HeaderName::from_static("x-session-id"),
            header::HeaderName::from_static("x-ratelimit-limit"),
            header::HeaderName::from_static("x-ratelimit-remaining"),
            header::HeaderName::from_static("x-ratelimit-reset"),
        ])
        .max_age(std::time::Duration::from_secs(3600))
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let identity: Arc<dyn IdentityVerifier> = Arc::new(VerifierChain::from_config(&config.auth)?);

    let state = match config.storage.backend.as_str() {
        "memory" => {
            warn!("Using in-memory storage; state is lost on restart");
            AppState::build(Arc::new(InMemoryStore::new()), &config, identity)?
        }
        _ => {
            let path = config.storage.resolved_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let store = SqliteStore::new(&path.to_string_lossy()).await?;
            AppState::build(Arc::new(store), &config, identity)?
        }
    };

    let app = build_router(Arc::new(state));

    info!(addr = %addr, backend = %config.storage.backend, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
