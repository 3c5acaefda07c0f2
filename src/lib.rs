//! camsignal: a minimal WebRTC signaling endpoint for local cameras
//!
//! A browser POSTs its SDP offer to `/offer`; the server attaches an H.264
//! track fed from a local capture device and returns the SDP answer.
//!
//! # Features
//! - One capture and encode pipeline per device, shared by every peer
//! - Device selection per offer (`/dev/videoN`, `N` or `synthetic`)
//! - Permissive CORS so any page can negotiate
//! - Synthetic test pattern for running without hardware
//!
//! # Usage
//! ```rust,ignore
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     camsignal::init_logging();
//!     camsignal::server::run(camsignal::CamSignalConfig::default()).await?;
//!     Ok(())
//! }
//! ```
pub mod config;
pub mod encoder;
pub mod errors;
pub mod platform;
pub mod server;
pub mod session;
pub mod types;
pub mod webrtc;

// Testing utilities - synthetic frames for hardware-free runs
pub mod testing;

// Re-exports for convenience
pub use config::CamSignalConfig;
pub use errors::{CameraError, ServerError, SignalError};
pub use platform::PlatformCamera;
pub use server::{router, AppState};
pub use types::{CameraDeviceInfo, CameraFormat, CameraFrame, CameraInitParams};

/// Initialize logging for the signaling server
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "camsignal=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_crate_info() {
        let info = get_info();
        assert_eq!(info.name, "camsignal");
        assert!(!info.version.is_empty());
        assert!(!info.description.is_empty());
    }

    #[test]
    fn test_init_logging_twice() {
        init_logging();
        init_logging();
        log::info!("logging initialized");
    }
}
