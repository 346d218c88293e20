pub mod health;
pub mod link;

use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::AppState;

pub use health::health_check;
pub use link::{authorize_link, delete_link, get_link, get_metadata, link_status, save_link, sync_link};

/// Internal API used by the command front-end and the OAuth callback handler
pub fn router(state: AppState) -> Router {
    // outbound calls are already bounded; leave room for one refresh-and-retry
    let request_timeout = Duration::from_secs(state.config.http_timeout_secs * 4 + 5);

    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/links/:user_id",
            get(get_link).put(save_link).delete(delete_link),
        )
        .route("/api/links/:user_id/token", post(authorize_link))
        .route("/api/links/:user_id/sync", post(sync_link))
        .route("/api/links/:user_id/metadata", get(get_metadata))
        .route("/api/links/:user_id/status", get(link_status))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}
