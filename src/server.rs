//! HTTP signaling endpoint
//!
//! - `GET /` - crate info
//! - `GET /devices` - capture devices visible to the native backend
//! - `POST /offer` - SDP offer in, SDP answer out

use crate::config::CamSignalConfig;
use crate::errors::{CameraError, ServerError, SignalError};
use crate::platform::list_cameras;
use crate::session::PeerRegistry;
use crate::types::CameraDeviceInfo;
use crate::webrtc::peer::{PeerConnection, SdpType, SessionDescription};
use crate::webrtc::streaming::StreamRegistry;
use crate::webrtc::track::{spawn_rtcp_reader, CameraTrack, ForwardEnd, ForwardSummary};
use crate::CrateInfo;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, Method},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;

/// Preflight results may be cached for a day
const CORS_MAX_AGE: Duration = Duration::from_secs(86400);

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<CamSignalConfig>,
    pub peers: PeerRegistry,
    pub streams: StreamRegistry,
}

impl AppState {
    pub fn new(config: CamSignalConfig) -> Self {
        Self {
            config: Arc::new(config),
            peers: PeerRegistry::new(),
            streams: StreamRegistry::new(),
        }
    }

    /// Close every peer, then release every capture device
    pub async fn shutdown(&self) {
        self.peers.close_all().await;
        self.streams.stop_all().await;
    }
}

/// Body of `POST /offer`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferRequest {
    #[serde(rename = "type")]
    pub sdp_type: String,
    pub sdp: String,
    #[serde(default)]
    pub device_id: Option<String>,
}

impl OfferRequest {
    /// Device to stream, falling back to the configured default
    pub fn device<'a>(&'a self, config: &'a CamSignalConfig) -> &'a str {
        self.device_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(&config.camera.default_device)
    }
}

pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(CORS_MAX_AGE)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/devices", get(devices))
        .route("/offer", post(handle_offer))
        .with_state(state)
        .layer(cors_layer())
}

async fn index() -> Json<CrateInfo> {
    Json(crate::get_info())
}

async fn devices() -> Result<Json<Vec<CameraDeviceInfo>>, ServerError> {
    let cameras = tokio::task::spawn_blocking(list_cameras)
        .await
        .map_err(|e| CameraError::InitializationError(format!("Device query task failed: {}", e)))??;
    Ok(Json(cameras))
}

/// Negotiate a send-only camera stream for the offering peer.
///
/// The body is parsed by hand so clients that omit `Content-Type` are still
/// served.
pub async fn handle_offer(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<SessionDescription>, ServerError> {
    let request: OfferRequest = serde_json::from_slice(&body)
        .map_err(|e| ServerError::BadRequest(format!("Invalid offer JSON: {}", e)))?;

    let sdp_type: SdpType = request.sdp_type.parse()?;
    if sdp_type != SdpType::Offer {
        return Err(ServerError::BadRequest(format!(
            "Expected an offer, got {:?}",
            request.sdp_type
        )));
    }

    let offer = SessionDescription::offer(request.sdp.clone());
    // Reject unparseable SDP before touching a camera
    RTCSessionDescription::try_from(offer.clone())?;

    let device_id = request.device(&state.config).to_string();
    log::info!("Received offer for device {}", device_id);

    let (streamer, frames) = state
        .streams
        .acquire(&device_id, &state.config.stream_config(), state.config.camera.mode)
        .await?;

    let peer = Arc::new(
        PeerConnection::new(uuid::Uuid::new_v4().to_string(), state.config.rtc_configuration())
            .await?,
    );

    let negotiated = negotiate(&peer, offer, &state).await;
    let (track, sender, answer) = match negotiated {
        Ok(parts) => parts,
        Err(e) => {
            if let Err(close_err) = peer.close().await {
                log::warn!("Failed to close peer {}: {}", peer.id(), close_err);
            }
            return Err(e.into());
        }
    };

    state.peers.insert(Arc::clone(&peer)).await;
    let forwarder = track.spawn_forwarder(frames, streamer.clone(), peer.closed_signal());
    spawn_rtcp_reader(sender, streamer);
    spawn_stream_end_watch(state.peers.clone(), peer.id().to_string(), forwarder);

    log::info!("Answered peer {} streaming {}", peer.id(), device_id);
    Ok(Json(answer))
}

/// Drop the peer once its stream stops producing frames
fn spawn_stream_end_watch(
    peers: PeerRegistry,
    peer_id: String,
    forwarder: JoinHandle<ForwardSummary>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match forwarder.await {
            Ok(summary) if summary.end == ForwardEnd::StreamEnded => {
                log::warn!("Stream for peer {} ended, closing the peer", peer_id);
                peers.remove(&peer_id).await;
            }
            Ok(_) => {}
            Err(e) => {
                log::error!("Forwarder for peer {} failed: {}", peer_id, e);
                peers.remove(&peer_id).await;
            }
        }
    })
}

async fn negotiate(
    peer: &PeerConnection,
    offer: SessionDescription,
    state: &AppState,
) -> Result<(CameraTrack, Arc<RTCRtpSender>, SessionDescription), SignalError> {
    let track = CameraTrack::new(peer.id());
    let sender = peer.add_video_track(track.as_local()).await?;
    let gather_timeout = Duration::from_millis(state.config.webrtc.gather_timeout_ms);
    let answer = peer.accept_offer(offer, gather_timeout).await?;
    Ok((track, sender, answer))
}

/// Serve `state` on `listener` until `shutdown` resolves, then tear down
/// every peer and stream.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let result = axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(shutdown)
        .await;

    state.shutdown().await;
    result.map_err(ServerError::from)
}

/// Bind the configured address and serve until Ctrl-C
pub async fn run(config: CamSignalConfig) -> Result<(), ServerError> {
    let addr = config
        .socket_addr()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;

    log::info!("Listening at http://{}/offer", local);

    serve(listener, AppState::new(config), async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {}", e);
        }
        log::info!("Shutting down");
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_request_device_fallback() {
        let config = CamSignalConfig::default();

        let named: OfferRequest =
            serde_json::from_str(r#"{"type":"offer","sdp":"v=0","device_id":"/dev/video2"}"#)
                .unwrap();
        assert_eq!(named.device(&config), "/dev/video2");

        let missing: OfferRequest = serde_json::from_str(r#"{"type":"offer","sdp":"v=0"}"#).unwrap();
        assert_eq!(missing.device(&config), "/dev/video0");

        let blank: OfferRequest =
            serde_json::from_str(r#"{"type":"offer","sdp":"v=0","device_id":"  "}"#).unwrap();
        assert_eq!(blank.device(&config), "/dev/video0");
    }

    #[test]
    fn test_offer_request_requires_sdp() {
        assert!(serde_json::from_str::<OfferRequest>(r#"{"type":"offer"}"#).is_err());
    }

    #[tokio::test]
    async fn test_app_state_shutdown_is_idempotent() {
        let state = AppState::new(CamSignalConfig::default());
        state.shutdown().await;
        state.shutdown().await;
        assert!(state.peers.is_empty().await);
    }
}
