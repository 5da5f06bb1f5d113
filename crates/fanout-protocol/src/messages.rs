use serde::{Deserialize, Serialize};

use crate::types::{IceServer, SessionDescription};

/// Response to `POST /offer`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferResponse {
    pub sdp: SessionDescription,
    pub peer_id: String,
}

/// Response to `GET /ice-servers`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServersResponse {
    pub ice_servers: Vec<IceServer>,
}

/// Body of every non-2xx signaling response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
