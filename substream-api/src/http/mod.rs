// Module: http
// HTTP/JSON surface for the ingress provisioning core

pub mod auth;
pub mod error;
pub mod streams;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use substream_core::bootstrap::Services;
use substream_core::service::{CredentialIssuer, Provisioner, SessionManager, StagePool};

pub use auth::{Caller, CallerResolver, DevCallerResolver};
pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub stage_pool: Arc<StagePool>,
    pub session_manager: Arc<SessionManager>,
    pub provisioner: Arc<Provisioner>,
    pub issuer: Arc<CredentialIssuer>,
    pub caller_resolver: Arc<dyn CallerResolver>,
}

impl AppState {
    #[must_use]
    pub fn new(services: &Services, caller_resolver: Arc<dyn CallerResolver>) -> Self {
        Self {
            stage_pool: Arc::clone(&services.stage_pool),
            session_manager: Arc::clone(&services.session_manager),
            provisioner: Arc::clone(&services.provisioner),
            issuer: Arc::clone(&services.issuer),
            caller_resolver,
        }
    }
}

/// Build the full ingress router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(streams::create_streams_router())
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .with_state(state)
}
