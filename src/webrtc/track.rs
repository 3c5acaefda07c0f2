//! Outgoing camera track
//!
//! Bridges the shared encoded stream of a device into one peer's H.264 track.

use crate::webrtc::streaming::{EncodedFrame, VideoStreamer};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use webrtc::api::media_engine::MIME_TYPE_H264;
use webrtc::media::Sample;
use webrtc::rtcp::packet::Packet;
use webrtc::rtcp::payload_feedbacks::full_intra_request::FullIntraRequest;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Constrained baseline, the profile openh264 produces
pub const H264_FMTP_LINE: &str =
    "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";

/// H.264 sample track fed from a [`VideoStreamer`]
#[derive(Clone)]
pub struct CameraTrack {
    track: Arc<TrackLocalStaticSample>,
}

impl CameraTrack {
    pub fn new(stream_id: &str) -> Self {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_owned(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: H264_FMTP_LINE.to_owned(),
                rtcp_feedback: vec![],
            },
            "video".to_owned(),
            format!("camsignal-{}", stream_id),
        ));
        Self { track }
    }

    pub fn track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.track)
    }

    pub fn as_local(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        Arc::clone(&self.track) as Arc<dyn TrackLocal + Send + Sync>
    }

    /// Write every frame from `frames` into the track until `closed` flips
    /// or the stream ends
    pub fn spawn_forwarder(
        &self,
        frames: broadcast::Receiver<EncodedFrame>,
        streamer: VideoStreamer,
        closed: watch::Receiver<bool>,
    ) -> JoinHandle<ForwardSummary> {
        let track = self.track();
        tokio::spawn(forward_frames(
            track,
            frames,
            move || streamer.request_keyframe(),
            closed,
        ))
    }
}

/// Why a forwarder stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardEnd {
    /// The peer closed; the stream may still be serving others
    PeerClosed,
    /// The capture loop stopped and no more frames will arrive
    StreamEnded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardSummary {
    pub forwarded: u64,
    /// Frames dropped while waiting for a keyframe, lagged frames included
    pub skipped: u64,
    pub end: ForwardEnd,
}

async fn forward_frames<K>(
    track: Arc<TrackLocalStaticSample>,
    mut frames: broadcast::Receiver<EncodedFrame>,
    request_keyframe: K,
    mut closed: watch::Receiver<bool>,
) -> ForwardSummary
where
    K: Fn() + Send + 'static,
{
    let track_id = track.stream_id().to_string();
    // Decoders cannot start from a delta frame
    let mut waiting_for_keyframe = true;
    let mut forwarded = 0u64;
    let mut skipped = 0u64;

    let end = loop {
        tokio::select! {
            changed = closed.changed() => {
                if changed.is_err() || *closed.borrow() {
                    break ForwardEnd::PeerClosed;
                }
            }
            received = frames.recv() => match received {
                Ok(frame) => {
                    if waiting_for_keyframe {
                        if !frame.is_keyframe() {
                            skipped += 1;
                            continue;
                        }
                        log::debug!("Track {} synced at frame {}", track_id, frame.sequence);
                        waiting_for_keyframe = false;
                    }

                    let sample = Sample {
                        data: frame.data,
                        duration: frame.duration,
                        ..Default::default()
                    };
                    if let Err(e) = track.write_sample(&sample).await {
                        log::warn!("Failed to write sample to {}: {}", track_id, e);
                        continue;
                    }
                    forwarded += 1;
                }
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    log::warn!("Track {} lagged, skipped {} frames", track_id, count);
                    skipped += count;
                    waiting_for_keyframe = true;
                    request_keyframe();
                }
                Err(broadcast::error::RecvError::Closed) => {
                    log::info!("Video stream for track {} ended", track_id);
                    break ForwardEnd::StreamEnded;
                }
            }
        }
    };

    log::debug!(
        "Track {} forwarder stopped after {} samples ({} skipped)",
        track_id,
        forwarded,
        skipped
    );
    ForwardSummary {
        forwarded,
        skipped,
        end,
    }
}

/// True when any packet is a PLI or FIR
pub(crate) fn wants_keyframe(packets: &[Box<dyn Packet + Send + Sync>]) -> bool {
    packets.iter().any(|packet| {
        let packet = packet.as_any();
        packet.downcast_ref::<PictureLossIndication>().is_some()
            || packet.downcast_ref::<FullIntraRequest>().is_some()
    })
}

/// Drain RTCP for a sender, turning PLI/FIR feedback into keyframe requests.
///
/// Interceptors only run while RTCP is being read, so this must run for every
/// sender.
pub fn spawn_rtcp_reader(sender: Arc<RTCRtpSender>, streamer: VideoStreamer) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 1500];
        while let Ok((packets, _)) = sender.read(&mut buf).await {
            if wants_keyframe(&packets) {
                log::debug!("Keyframe requested by remote for {}", streamer.device_id());
                streamer.request_keyframe();
            }
        }
    })
}
