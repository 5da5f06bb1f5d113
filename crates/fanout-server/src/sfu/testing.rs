//! Simulated media transport used by the unit tests

use async_trait::async_trait;
use fanout_protocol::SessionDescription;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use webrtc::rtp::header::Header;

use super::connection::{
    CodecCapability, ConnectionEvent, ConnectionEvents, Connector, InboundTrack, MediaConnection,
    MediaKind, MediaPacket, OutboundTrack,
};
use crate::error::RelayError;

pub fn packet(sequence_number: u16) -> MediaPacket {
    MediaPacket {
        header: Header {
            sequence_number,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn vp8() -> CodecCapability {
    CodecCapability {
        mime_type: "video/VP8".to_string(),
        clock_rate: 90000,
        channels: 0,
        sdp_fmtp_line: String::new(),
    }
}

pub fn opus() -> CodecCapability {
    CodecCapability {
        mime_type: "audio/opus".to_string(),
        clock_rate: 48000,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
    }
}

/// Poll `condition` until it holds, panicking after two seconds
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub struct FakeInboundTrack {
    kind: MediaKind,
    codec: CodecCapability,
    packets: Mutex<mpsc::UnboundedReceiver<MediaPacket>>,
}

impl FakeInboundTrack {
    /// A track fed through the returned sender. Dropping the sender ends the track.
    pub fn new(kind: MediaKind) -> (Arc<Self>, mpsc::UnboundedSender<MediaPacket>) {
        let codec = match kind {
            MediaKind::Audio => opus(),
            MediaKind::Video => vp8(),
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let track = Arc::new(Self {
            kind,
            codec,
            packets: Mutex::new(rx),
        });
        (track, tx)
    }
}

#[async_trait]
impl InboundTrack for FakeInboundTrack {
    fn id(&self) -> String {
        self.kind.to_string()
    }

    fn stream_id(&self) -> String {
        "stream-fake".to_string()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn codec(&self) -> CodecCapability {
        self.codec.clone()
    }

    async fn read_packet(&self) -> Result<MediaPacket, RelayError> {
        self.packets
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| RelayError::TransportRead("end of stream".to_string()))
    }
}

#[derive(Default)]
pub struct FakeOutboundTrack {
    pub written: StdMutex<Vec<u16>>,
    pub fail_writes: AtomicBool,
    pub feedback_reads: AtomicUsize,
    pub closed: AtomicBool,
}

impl FakeOutboundTrack {
    pub fn written(&self) -> Vec<u16> {
        self.written.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutboundTrack for FakeOutboundTrack {
    async fn write_packet(&self, packet: &MediaPacket) -> Result<(), RelayError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RelayError::Track("write refused".to_string()));
        }
        self.written
            .lock()
            .unwrap()
            .push(packet.header.sequence_number);
        Ok(())
    }

    async fn read_feedback(&self) -> Result<(), RelayError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RelayError::TransportRead("sender closed".to_string()));
        }
        self.feedback_reads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeConnection {
    pub remote_descriptions: StdMutex<Vec<SessionDescription>>,
    pub local: StdMutex<Option<SessionDescription>>,
    pub offers_created: AtomicUsize,
    pub added_tracks: StdMutex<Vec<(MediaKind, Arc<FakeOutboundTrack>)>>,
    pub added_codecs: StdMutex<Vec<CodecCapability>>,
    pub fail_add_track: AtomicBool,
    pub fail_remote_description: AtomicBool,
    pub closed: AtomicBool,
}

impl FakeConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_track_calls(&self, kind: MediaKind) -> usize {
        self.added_tracks
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    pub fn outbound(&self, kind: MediaKind) -> Option<Arc<FakeOutboundTrack>> {
        self.added_tracks
            .lock()
            .unwrap()
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, track)| track.clone())
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.remote_descriptions.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaConnection for FakeConnection {
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), RelayError> {
        if self.fail_remote_description.load(Ordering::SeqCst) {
            return Err(RelayError::Negotiation("remote description refused".to_string()));
        }
        self.remote_descriptions.lock().unwrap().push(desc);
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription, RelayError> {
        Ok(SessionDescription::answer("v=0 fake-answer"))
    }

    async fn create_offer(&self) -> Result<SessionDescription, RelayError> {
        let n = self.offers_created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SessionDescription::offer(format!("v=0 fake-offer-{n}")))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), RelayError> {
        *self.local.lock().unwrap() = Some(desc);
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().unwrap().clone()
    }

    async fn add_outbound_track(
        &self,
        kind: MediaKind,
        codec: &CodecCapability,
        _track_id: &str,
        _stream_id: &str,
    ) -> Result<Arc<dyn OutboundTrack>, RelayError> {
        if self.fail_add_track.load(Ordering::SeqCst) {
            return Err(RelayError::Track("no room for another track".to_string()));
        }
        let track = Arc::new(FakeOutboundTrack::default());
        self.added_tracks.lock().unwrap().push((kind, track.clone()));
        self.added_codecs.lock().unwrap().push(codec.clone());
        Ok(track)
    }

    async fn close(&self) -> Result<(), RelayError> {
        self.closed.store(true, Ordering::SeqCst);
        for (_, track) in self.added_tracks.lock().unwrap().iter() {
            track.closed.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Hands out fake connections and keeps a way to push events into each of them
#[derive(Default)]
pub struct FakeConnector {
    connections: StdMutex<Vec<(Arc<FakeConnection>, mpsc::UnboundedSender<ConnectionEvent>)>>,
    /// Applied to every connection created from now on
    pub fail_remote_description: AtomicBool,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    pub fn connection(&self, index: usize) -> Arc<FakeConnection> {
        self.connections.lock().unwrap()[index].0.clone()
    }

    pub fn emit(&self, index: usize, event: ConnectionEvent) {
        let _ = self.connections.lock().unwrap()[index].1.send(event);
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<(Arc<dyn MediaConnection>, ConnectionEvents), RelayError> {
        let connection = FakeConnection::new();
        connection.fail_remote_description.store(
            self.fail_remote_description.load(Ordering::SeqCst),
            Ordering::SeqCst,
        );
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections
            .lock()
            .unwrap()
            .push((connection.clone(), tx));
        let connection: Arc<dyn MediaConnection> = connection;
        Ok((connection, rx))
    }
}
