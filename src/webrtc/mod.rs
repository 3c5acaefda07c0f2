//! WebRTC media path
//!
//! `streaming` owns capture and encoding per device, `track` bridges a stream
//! into one peer's H.264 track and `peer` negotiates the connection itself.

pub mod peer;
pub mod streaming;
pub mod track;

pub use peer::{ConnectionState, IceServer, PeerConnection, RTCConfiguration, SdpType, SessionDescription};
pub use streaming::{StreamConfig, StreamMode, StreamRegistry, VideoStreamer};
pub use track::{CameraTrack, ForwardEnd, ForwardSummary};
