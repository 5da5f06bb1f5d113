//! Fanout Server Library
//!
//! This module exposes the relay components for testing and embedding.

pub mod api;
pub mod error;
pub mod sfu;
pub mod state;

use anyhow::Result;
use std::sync::Arc;

/// Create the HTTP application backed by a webrtc-rs media stack.
///
/// The session manager is returned so the caller can tear peers down on shutdown.
pub fn create_app(config: state::Config) -> Result<(axum::Router, Arc<sfu::SfuSessionManager>)> {
    let connector = Arc::new(sfu::WebRtcConnector::new(&config)?);
    let app_state = state::AppState::new(config, connector);
    let sfu = app_state.sfu.clone();
    let router = api::create_router(app_state);
    Ok((router, sfu))
}
