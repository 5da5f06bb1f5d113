use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Role of a session description in an offer/answer exchange
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SdpType::Offer => "offer",
            SdpType::Pranswer => "pranswer",
            SdpType::Answer => "answer",
            SdpType::Rollback => "rollback",
        };
        f.write_str(name)
    }
}

/// A session description as exchanged over signaling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DescriptionError {
    #[error("expected a session description of type {expected}, got {found}")]
    UnexpectedType { expected: SdpType, found: SdpType },

    #[error("session description has an empty payload")]
    EmptyPayload,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Check that this description plays the given role and carries a payload
    pub fn expect(&self, expected: SdpType) -> Result<(), DescriptionError> {
        if self.sdp_type != expected {
            return Err(DescriptionError::UnexpectedType {
                expected,
                found: self.sdp_type,
            });
        }
        if self.sdp.trim().is_empty() {
            return Err(DescriptionError::EmptyPayload);
        }
        Ok(())
    }
}

/// ICE server entry handed to clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}
