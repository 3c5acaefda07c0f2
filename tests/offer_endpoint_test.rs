//! End-to-end tests for the signaling router
//!
//! Requests go through `tower::ServiceExt::oneshot`, and media comes from the
//! synthetic source so no camera is needed.

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use camsignal::config::CamSignalConfig;
use camsignal::server::{router, AppState};
use camsignal::webrtc::StreamMode;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

fn test_config(mode: StreamMode) -> CamSignalConfig {
    let mut config = CamSignalConfig::default();
    config.camera.mode = mode;
    config.camera.resolution = [160, 120];
    config.camera.fps = 15;
    config.encoder.bitrate = 300_000;
    config.webrtc.ice_servers.clear();
    config.webrtc.gather_timeout_ms = 5_000;
    config
}

fn synthetic_state() -> AppState {
    AppState::new(test_config(StreamMode::SyntheticTest))
}

/// Receive-only browser stand-in
async fn viewer() -> Arc<RTCPeerConnection> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs().unwrap();
    let api = APIBuilder::new().with_media_engine(media_engine).build();
    let pc = Arc::new(api.new_peer_connection(Default::default()).await.unwrap());

    pc.add_transceiver_from_kind(
        RTPCodecType::Video,
        Some(RTCRtpTransceiverInit {
            direction: RTCRtpTransceiverDirection::Recvonly,
            send_encodings: vec![],
        }),
    )
    .await
    .unwrap();
    pc
}

async fn post_offer(app: Router, body: impl Into<Body>) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/offer")
                .body(body.into())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

#[tokio::test]
async fn test_offer_returns_sendonly_h264_answer() {
    let state = synthetic_state();
    let pc = viewer().await;
    let offer = pc.create_offer(None).await.unwrap();
    pc.set_local_description(offer.clone()).await.unwrap();

    let body = json!({ "type": "offer", "sdp": offer.sdp, "device_id": "synthetic" });
    let (status, bytes) = post_offer(router(state.clone()), body.to_string()).await;
    assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&bytes));

    let answer: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(answer["type"], "answer");
    let sdp = answer["sdp"].as_str().unwrap();
    assert!(sdp.starts_with("v=0"));
    assert!(sdp.contains("m=video"));
    assert!(sdp.contains("a=sendonly"));
    assert!(sdp.contains("H264"));

    let remote = RTCSessionDescription::answer(sdp.to_string()).unwrap();
    pc.set_remote_description(remote).await.unwrap();

    assert_eq!(state.peers.len().await, 1);
    assert_eq!(state.streams.stats().await.len(), 1);

    pc.close().await.unwrap();
    state.shutdown().await;
    assert!(state.peers.is_empty().await);
    assert!(state.streams.get("synthetic").await.is_none());
}

#[tokio::test]
async fn test_peer_is_dropped_when_stream_stops() {
    let state = synthetic_state();
    let pc = viewer().await;
    let offer = pc.create_offer(None).await.unwrap();
    pc.set_local_description(offer.clone()).await.unwrap();

    let body = json!({ "type": "offer", "sdp": offer.sdp, "device_id": "synthetic" });
    let (status, _) = post_offer(router(state.clone()), body.to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state.peers.len().await, 1);

    state.streams.stop_all().await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !state.peers.is_empty().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "peer outlived its stream"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    pc.close().await.unwrap();
    state.shutdown().await;
}

#[tokio::test]
async fn test_offers_for_same_device_share_one_stream() {
    let state = synthetic_state();

    for _ in 0..2 {
        let pc = viewer().await;
        let offer = pc.create_offer(None).await.unwrap();
        pc.set_local_description(offer.clone()).await.unwrap();

        // No device_id: the configured default is used
        let body = json!({ "type": "offer", "sdp": offer.sdp });
        let (status, _) = post_offer(router(state.clone()), body.to_string()).await;
        assert_eq!(status, StatusCode::OK);
        pc.close().await.unwrap();
    }

    let stats = state.streams.stats().await;
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].device_id, "/dev/video0");
    assert_eq!(stats[0].mode, StreamMode::SyntheticTest);

    state.shutdown().await;
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let state = synthetic_state();
    let (status, bytes) = post_offer(router(state.clone()), "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!bytes.is_empty());
    assert!(state.peers.is_empty().await);
}

#[tokio::test]
async fn test_missing_sdp_is_bad_request() {
    let (status, _) = post_offer(router(synthetic_state()), r#"{"type":"offer"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_non_offer_type_is_bad_request() {
    let body = json!({ "type": "answer", "sdp": "v=0\r\n" });
    let (status, _) = post_offer(router(synthetic_state()), body.to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let body = json!({ "type": "bogus", "sdp": "v=0\r\n" });
    let (status, _) = post_offer(router(synthetic_state()), body.to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unparseable_sdp_is_bad_request() {
    let state = synthetic_state();
    let body = json!({ "type": "offer", "sdp": "this is not sdp" });
    let (status, _) = post_offer(router(state.clone()), body.to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Rejected before any device is opened
    assert!(state.streams.stats().await.is_empty());
}

#[tokio::test]
async fn test_unknown_device_is_server_error() {
    let state = AppState::new(test_config(StreamMode::RealCamera));
    let pc = viewer().await;
    let offer = pc.create_offer(None).await.unwrap();

    let body = json!({ "type": "offer", "sdp": offer.sdp, "device_id": "not-a-camera" });
    let (status, _) = post_offer(router(state.clone()), body.to_string()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(state.peers.is_empty().await);

    pc.close().await.unwrap();
}

#[tokio::test]
async fn test_cors_preflight() {
    let response = router(synthetic_state())
        .oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/offer")
                .header(header::ORIGIN, "http://example.com")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    assert_eq!(headers[header::ACCESS_CONTROL_MAX_AGE], "86400");

    let methods = headers[header::ACCESS_CONTROL_ALLOW_METHODS]
        .to_str()
        .unwrap()
        .to_ascii_uppercase();
    for method in ["GET", "POST", "PUT", "DELETE"] {
        assert!(methods.contains(method), "missing {} in {}", method, methods);
    }

    let allowed = headers[header::ACCESS_CONTROL_ALLOW_HEADERS]
        .to_str()
        .unwrap()
        .to_ascii_lowercase();
    assert!(allowed.contains("content-type"));
    assert!(allowed.contains("authorization"));
}

#[tokio::test]
async fn test_error_responses_carry_cors_origin() {
    let response = router(synthetic_state())
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/offer")
                .header(header::ORIGIN, "http://example.com")
                .body(Body::from("nope"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}

#[tokio::test]
async fn test_index_reports_crate_info() {
    let response = router(synthetic_state())
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let info: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(info["name"], "camsignal");
    assert_eq!(info["version"], camsignal::VERSION);
}

#[tokio::test]
async fn test_offer_rejects_get() {
    let response = router(synthetic_state())
        .oneshot(Request::builder().uri("/offer").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
