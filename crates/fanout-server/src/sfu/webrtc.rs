//! webrtc-rs binding for the media transport seam

use async_trait::async_trait;
use fanout_protocol::{SdpType, SessionDescription};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};
use webrtc::track::track_remote::TrackRemote;

use super::connection::{
    CodecCapability, ConnectionEvent, ConnectionEvents, Connector, ConnectivityState,
    InboundTrack, MediaConnection, MediaKind, MediaPacket, OutboundTrack,
};
use crate::error::RelayError;
use crate::state::Config;

/// Largest RTCP datagram we expect on a sender's feedback channel
const FEEDBACK_BUFFER_SIZE: usize = 1500;

/// Builds webrtc-rs peer connections sharing one API instance
pub struct WebRtcConnector {
    api: Arc<API>,
    ice_servers: Vec<RTCIceServer>,
    gather_timeout: Duration,
}

impl WebRtcConnector {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        // The relay forwards whatever the publishers negotiate, so offer every default codec
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(SettingEngine::default())
            .build();

        let ice_servers = config
            .ice_servers()
            .into_iter()
            .map(|server| RTCIceServer {
                urls: server.urls,
                username: server.username.unwrap_or_default(),
                credential: server.credential.unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        Ok(Self {
            api: Arc::new(api),
            ice_servers,
            gather_timeout: config.ice_gather_timeout,
        })
    }
}

#[async_trait]
impl Connector for WebRtcConnector {
    async fn connect(&self) -> Result<(Arc<dyn MediaConnection>, ConnectionEvents), RelayError> {
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let pc = self
            .api
            .new_peer_connection(config)
            .await
            .map_err(|e| RelayError::Negotiation(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();

        let track_tx = tx.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            match WebRtcInboundTrack::new(track) {
                Some(inbound) => {
                    let _ = track_tx.send(ConnectionEvent::InboundTrack(Arc::new(inbound)));
                }
                None => tracing::warn!("Ignoring inbound track with unspecified media kind"),
            }
            Box::pin(async {})
        }));

        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            if let Some(state) = connectivity_state(state) {
                let _ = tx.send(ConnectionEvent::ConnectivityChanged(state));
            }
            Box::pin(async {})
        }));

        let connection: Arc<dyn MediaConnection> = Arc::new(WebRtcConnection {
            pc,
            gather_timeout: self.gather_timeout,
        });

        Ok((connection, rx))
    }
}

pub struct WebRtcConnection {
    pc: RTCPeerConnection,
    gather_timeout: Duration,
}

#[async_trait]
impl MediaConnection for WebRtcConnection {
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), RelayError> {
        let desc = to_rtc_description(desc)?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| RelayError::Negotiation(e.to_string()))
    }

    async fn create_answer(&self) -> Result<SessionDescription, RelayError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| RelayError::Negotiation(e.to_string()))?;
        from_rtc_description(answer)
    }

    async fn create_offer(&self) -> Result<SessionDescription, RelayError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| RelayError::Negotiation(e.to_string()))?;
        from_rtc_description(offer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), RelayError> {
        let desc = to_rtc_description(desc)?;

        // Signaling is not trickled, so the description handed out must already
        // carry every candidate
        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(desc)
            .await
            .map_err(|e| RelayError::Negotiation(e.to_string()))?;

        if tokio::time::timeout(self.gather_timeout, gathered.recv())
            .await
            .is_err()
        {
            tracing::warn!(
                "ICE gathering did not complete within {:?}, continuing with partial candidates",
                self.gather_timeout
            );
        }

        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let desc = self.pc.local_description().await?;
        match from_rtc_description(desc) {
            Ok(desc) => Some(desc),
            Err(e) => {
                tracing::warn!("Unusable local description: {}", e);
                None
            }
        }
    }

    async fn add_outbound_track(
        &self,
        kind: MediaKind,
        codec: &CodecCapability,
        track_id: &str,
        stream_id: &str,
    ) -> Result<Arc<dyn OutboundTrack>, RelayError> {
        let capability = RTCRtpCodecCapability {
            mime_type: codec.mime_type.clone(),
            clock_rate: codec.clock_rate,
            channels: codec.channels,
            sdp_fmtp_line: codec.sdp_fmtp_line.clone(),
            rtcp_feedback: vec![],
        };

        // TrackLocalStaticRTP keeps the publisher's packetization intact
        let track = Arc::new(TrackLocalStaticRTP::new(
            capability,
            track_id.to_string(),
            stream_id.to_string(),
        ));

        let sender = self
            .pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| RelayError::Track(format!("cannot add {kind} track: {e}")))?;

        Ok(Arc::new(WebRtcOutboundTrack { track, sender }))
    }

    async fn close(&self) -> Result<(), RelayError> {
        self.pc
            .close()
            .await
            .map_err(|e| RelayError::Negotiation(e.to_string()))
    }
}

struct WebRtcInboundTrack {
    track: Arc<TrackRemote>,
    kind: MediaKind,
}

impl WebRtcInboundTrack {
    fn new(track: Arc<TrackRemote>) -> Option<Self> {
        let kind = match track.kind() {
            RTPCodecType::Audio => MediaKind::Audio,
            RTPCodecType::Video => MediaKind::Video,
            _ => return None,
        };
        Some(Self { track, kind })
    }
}

#[async_trait]
impl InboundTrack for WebRtcInboundTrack {
    fn id(&self) -> String {
        self.track.id().to_string()
    }

    fn stream_id(&self) -> String {
        self.track.stream_id().to_string()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn codec(&self) -> CodecCapability {
        let capability = self.track.codec().capability;
        CodecCapability {
            mime_type: capability.mime_type,
            clock_rate: capability.clock_rate,
            channels: capability.channels,
            sdp_fmtp_line: capability.sdp_fmtp_line,
        }
    }

    async fn read_packet(&self) -> Result<MediaPacket, RelayError> {
        self.track
            .read_rtp()
            .await
            .map(|(packet, _attributes)| packet)
            .map_err(|e| RelayError::TransportRead(e.to_string()))
    }
}

struct WebRtcOutboundTrack {
    track: Arc<TrackLocalStaticRTP>,
    sender: Arc<RTCRtpSender>,
}

#[async_trait]
impl OutboundTrack for WebRtcOutboundTrack {
    async fn write_packet(&self, packet: &MediaPacket) -> Result<(), RelayError> {
        self.track
            .write_rtp(packet)
            .await
            .map(|_| ())
            .map_err(|e| RelayError::Track(e.to_string()))
    }

    async fn read_feedback(&self) -> Result<(), RelayError> {
        let mut buf = [0u8; FEEDBACK_BUFFER_SIZE];
        self.sender
            .read(&mut buf)
            .await
            .map(|_| ())
            .map_err(|e| RelayError::TransportRead(e.to_string()))
    }
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, RelayError> {
    let parsed = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
        SdpType::Rollback => {
            return Err(RelayError::Negotiation(
                "rollback descriptions are not supported".to_string(),
            ));
        }
    };
    parsed.map_err(|e| RelayError::MalformedInput(e.to_string()))
}

fn from_rtc_description(desc: RTCSessionDescription) -> Result<SessionDescription, RelayError> {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        RTCSdpType::Unspecified => {
            return Err(RelayError::Negotiation(
                "session description has no type".to_string(),
            ));
        }
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: desc.sdp,
    })
}

fn connectivity_state(state: RTCIceConnectionState) -> Option<ConnectivityState> {
    let state = match state {
        RTCIceConnectionState::New => ConnectivityState::New,
        RTCIceConnectionState::Checking => ConnectivityState::Checking,
        RTCIceConnectionState::Connected => ConnectivityState::Connected,
        RTCIceConnectionState::Completed => ConnectivityState::Completed,
        RTCIceConnectionState::Disconnected => ConnectivityState::Disconnected,
        RTCIceConnectionState::Failed => ConnectivityState::Failed,
        RTCIceConnectionState::Closed => ConnectivityState::Closed,
        RTCIceConnectionState::Unspecified => return None,
    };
    Some(state)
}
