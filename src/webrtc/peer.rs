use crate::errors::SignalError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::TrackLocal;

/// WebRTC peer connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RTCConfiguration {
    pub ice_servers: Vec<IceServer>,
    pub ice_transport_policy: IceTransportPolicy,
    pub bundle_policy: BundlePolicy,
}

impl Default for RTCConfiguration {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServer {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                username: None,
                credential: None,
            }],
            ice_transport_policy: IceTransportPolicy::default(),
            bundle_policy: BundlePolicy::default(),
        }
    }
}

impl From<RTCConfiguration> for webrtc::peer_connection::configuration::RTCConfiguration {
    fn from(config: RTCConfiguration) -> Self {
        use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
        use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;

        webrtc::peer_connection::configuration::RTCConfiguration {
            ice_servers: config.ice_servers.into_iter().map(Into::into).collect(),
            ice_transport_policy: match config.ice_transport_policy {
                IceTransportPolicy::All => RTCIceTransportPolicy::All,
                IceTransportPolicy::Relay => RTCIceTransportPolicy::Relay,
            },
            bundle_policy: match config.bundle_policy {
                BundlePolicy::Balanced => RTCBundlePolicy::Balanced,
                BundlePolicy::MaxCompat => RTCBundlePolicy::MaxCompat,
                BundlePolicy::MaxBundle => RTCBundlePolicy::MaxBundle,
            },
            ..Default::default()
        }
    }
}

/// ICE server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl From<IceServer> for webrtc::ice_transport::ice_server::RTCIceServer {
    fn from(server: IceServer) -> Self {
        webrtc::ice_transport::ice_server::RTCIceServer {
            urls: server.urls,
            username: server.username.unwrap_or_default(),
            credential: server.credential.unwrap_or_default(),
            ..Default::default()
        }
    }
}

/// ICE transport policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IceTransportPolicy {
    Relay,
    #[default]
    All,
}

/// Bundle policy for RTC connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundlePolicy {
    Balanced,
    MaxCompat,
    #[default]
    MaxBundle,
}

/// WebRTC peer connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// Whether the connection can no longer carry media
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }
}

impl From<RTCPeerConnectionState> for ConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => {
                ConnectionState::New
            }
            RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
            RTCPeerConnectionState::Connected => ConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => ConnectionState::Failed,
            RTCPeerConnectionState::Closed => ConnectionState::Closed,
        }
    }
}

/// SDP (Session Description Protocol) type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

impl FromStr for SdpType {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offer" => Ok(SdpType::Offer),
            "answer" => Ok(SdpType::Answer),
            "pranswer" => Ok(SdpType::Pranswer),
            "rollback" => Ok(SdpType::Rollback),
            other => Err(SignalError::InvalidDescription(format!(
                "unknown session description type {:?}",
                other
            ))),
        }
    }
}

impl From<RTCSdpType> for SdpType {
    fn from(sdp_type: RTCSdpType) -> Self {
        match sdp_type {
            RTCSdpType::Offer | RTCSdpType::Unspecified => SdpType::Offer,
            RTCSdpType::Answer => SdpType::Answer,
            RTCSdpType::Pranswer => SdpType::Pranswer,
            RTCSdpType::Rollback => SdpType::Rollback,
        }
    }
}

/// Session description as exchanged over HTTP: `{"type": ..., "sdp": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }
}

impl TryFrom<SessionDescription> for RTCSessionDescription {
    type Error = SignalError;

    fn try_from(desc: SessionDescription) -> Result<Self, Self::Error> {
        let parsed = match desc.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
            SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
            SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
            SdpType::Rollback => {
                return Err(SignalError::InvalidDescription(
                    "rollback descriptions are not supported".to_string(),
                ))
            }
        };
        parsed.map_err(|e| SignalError::InvalidDescription(e.to_string()))
    }
}

impl From<RTCSessionDescription> for SessionDescription {
    fn from(desc: RTCSessionDescription) -> Self {
        SessionDescription {
            sdp_type: desc.sdp_type.into(),
            sdp: desc.sdp,
        }
    }
}

/// WebRTC peer connection manager
pub struct PeerConnection {
    id: String,
    peer_connection: Arc<RTCPeerConnection>,
    closed: Arc<watch::Sender<bool>>,
}

impl PeerConnection {
    /// Create a new peer connection with the default codecs and interceptors
    pub async fn new(id: String, config: RTCConfiguration) -> Result<Self, SignalError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(|e| {
            SignalError::PeerConnection(format!("Failed to register codecs: {}", e))
        })?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| {
                SignalError::PeerConnection(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let peer_connection = Arc::new(api.new_peer_connection(config.into()).await.map_err(
            |e| SignalError::PeerConnection(format!("Failed to create peer connection: {}", e)),
        )?);

        let (closed_tx, _) = watch::channel(false);
        let closed = Arc::new(closed_tx);

        let peer_id = id.clone();
        peer_connection.on_ice_connection_state_change(Box::new(
            move |state: RTCIceConnectionState| {
                log::info!("ICE connection state for peer {} has changed: {}", peer_id, state);
                Box::pin(async {})
            },
        ));

        let peer_id = id.clone();
        let closed_signal = Arc::clone(&closed);
        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                log::info!("Peer {} connection state has changed: {}", peer_id, state);
                if ConnectionState::from(state).is_terminal() {
                    closed_signal.send_replace(true);
                }
                Box::pin(async {})
            },
        ));

        log::debug!("Created peer connection {}", id);

        Ok(Self {
            id,
            peer_connection,
            closed,
        })
    }

    /// Get peer connection ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.peer_connection.connection_state().into()
    }

    /// Receiver that flips to `true` once the connection failed or was closed
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    /// Attach a send-only video transceiver carrying `track`
    pub async fn add_video_track(
        &self,
        track: Arc<dyn TrackLocal + Send + Sync>,
    ) -> Result<Arc<RTCRtpSender>, SignalError> {
        log::info!("Adding video track {} to peer {}", track.id(), self.id);

        let transceiver = self
            .peer_connection
            .add_transceiver_from_track(
                track,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Sendonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| SignalError::Track(format!("Failed to add transceiver: {}", e)))?;

        Ok(transceiver.sender().await)
    }

    /// Apply a remote offer and produce the complete local answer.
    ///
    /// Waits for ICE gathering so the answer carries every candidate; after
    /// `gather_timeout` the answer goes out with what has been gathered.
    pub async fn accept_offer(
        &self,
        offer: SessionDescription,
        gather_timeout: Duration,
    ) -> Result<SessionDescription, SignalError> {
        if offer.sdp_type != SdpType::Offer {
            return Err(SignalError::InvalidDescription(format!(
                "expected an offer, got {:?}",
                offer.sdp_type
            )));
        }

        let remote: RTCSessionDescription = offer.try_into()?;

        log::info!("Setting remote description for peer {}", self.id);
        self.peer_connection
            .set_remote_description(remote)
            .await
            .map_err(|e| {
                SignalError::InvalidDescription(format!("Failed to set remote description: {}", e))
            })?;

        log::info!("Creating SDP answer for peer {}", self.id);
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| SignalError::PeerConnection(format!("Failed to create answer: {}", e)))?;

        let mut gather_complete = self.peer_connection.gathering_complete_promise().await;

        self.peer_connection
            .set_local_description(answer)
            .await
            .map_err(|e| {
                SignalError::PeerConnection(format!("Failed to set local description: {}", e))
            })?;

        if tokio::time::timeout(gather_timeout, gather_complete.recv())
            .await
            .is_err()
        {
            log::warn!(
                "ICE gathering for peer {} did not finish within {:?}, answering with partial candidates",
                self.id,
                gather_timeout
            );
        }

        self.local_description().await.ok_or_else(|| {
            SignalError::PeerConnection("Local description missing after negotiation".to_string())
        })
    }

    pub async fn local_description(&self) -> Option<SessionDescription> {
        self.peer_connection
            .local_description()
            .await
            .map(SessionDescription::from)
    }

    /// Close peer connection
    pub async fn close(&self) -> Result<(), SignalError> {
        log::info!("Closing peer connection {}", self.id);
        self.closed.send_replace(true);

        self.peer_connection
            .close()
            .await
            .map_err(|e| SignalError::PeerConnection(format!("Failed to close peer connection: {}", e)))
    }
}
