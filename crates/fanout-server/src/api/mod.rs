mod signaling;

use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(|| async { "OK" }))
        // Signaling
        .route("/offer", post(signaling::offer))
        .route("/renegotiate/{peer_id}", get(signaling::renegotiate))
        .route("/answer/{peer_id}", post(signaling::answer))
        // Client ICE configuration
        .route("/ice-servers", get(signaling::ice_servers))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
