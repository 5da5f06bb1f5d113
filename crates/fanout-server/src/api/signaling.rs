//! Session-description exchange between peers and the relay

use crate::error::{AppError, Result};
use crate::sfu::PeerId;
use crate::state::AppState;
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use fanout_protocol::{IceServersResponse, OfferResponse, SessionDescription};

/// Bodies are decoded regardless of content type
fn parse_description(body: &[u8]) -> Result<SessionDescription> {
    serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("Invalid session description: {e}")))
}

pub async fn offer(State(state): State<AppState>, body: Bytes) -> Result<Json<OfferResponse>> {
    let offer = parse_description(&body)?;
    let (peer_id, answer) = state.sfu.join(offer).await?;

    Ok(Json(OfferResponse {
        sdp: answer,
        peer_id: peer_id.to_string(),
    }))
}

pub async fn renegotiate(
    State(state): State<AppState>,
    Path(peer_id): Path<String>,
) -> Result<Response> {
    let peer_id = PeerId::from(peer_id);

    match state.sfu.poll_offer(&peer_id).await? {
        Some(offer) => Ok(Json(offer).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

pub async fn answer(
    State(state): State<AppState>,
    Path(peer_id): Path<String>,
    body: Bytes,
) -> Result<StatusCode> {
    let peer_id = PeerId::from(peer_id);

    // An unknown peer is reported before the body is looked at
    state.sfu.peer(&peer_id).await?;

    let answer = parse_description(&body)?;
    state.sfu.apply_answer(&peer_id, answer).await?;

    Ok(StatusCode::OK)
}

/// ICE servers clients should use for their side of the connection
pub async fn ice_servers(State(state): State<AppState>) -> Json<IceServersResponse> {
    Json(IceServersResponse {
        ice_servers: state.config.ice_servers(),
    })
}
