//! Configuration management for camsignal
//!
//! Provides loading, saving and validation of the server, camera, encoder
//! and WebRTC settings.

use crate::errors::CameraError;
use crate::webrtc::peer::{BundlePolicy, IceServer, IceTransportPolicy, RTCConfiguration};
use crate::webrtc::streaming::{StreamConfig, StreamMode, IDLE_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Largest accepted capture resolution (8K UHD)
pub const MAX_RESOLUTION: [u32; 2] = [7680, 4320];

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CamSignalConfig {
    pub server: ServerConfig,
    pub camera: CameraConfig,
    pub encoder: EncoderConfig,
    pub webrtc: WebRtcConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind
    pub bind_address: String,
    /// TCP port for the signaling endpoint
    pub port: u16,
}

/// Camera-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Device used when an offer does not name one
    pub default_device: String,
    /// Capture resolution [width, height]
    pub resolution: [u32; 2],
    /// Frames per second
    pub fps: u32,
    /// Real device or synthetic test pattern
    pub mode: StreamMode,
}

/// H.264 encoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Target bitrate in bits per second
    pub bitrate: u32,
    /// Frames between forced keyframes
    pub keyframe_interval: u32,
}

/// Peer connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebRtcConfig {
    /// Upper bound on waiting for ICE gathering before answering
    pub gather_timeout_ms: u64,
    /// Encoded frames buffered per device for slow peers
    pub channel_capacity: usize,
    /// `all` or `relay`
    #[serde(default)]
    pub ice_transport_policy: IceTransportPolicy,
    /// `balanced`, `max_compat` or `max_bundle`
    #[serde(default)]
    pub bundle_policy: BundlePolicy,
    pub ice_servers: Vec<IceServer>,
}

impl Default for CamSignalConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
            },
            camera: CameraConfig {
                default_device: "/dev/video0".to_string(),
                resolution: [1280, 720],
                fps: 30,
                mode: StreamMode::RealCamera,
            },
            encoder: EncoderConfig {
                bitrate: 4_000_000,
                keyframe_interval: 60,
            },
            webrtc: WebRtcConfig {
                gather_timeout_ms: 10_000,
                channel_capacity: 64,
                ice_transport_policy: IceTransportPolicy::default(),
                bundle_policy: BundlePolicy::default(),
                ice_servers: RTCConfiguration::default().ice_servers,
            },
        }
    }
}

impl CamSignalConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, CameraError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|e| {
            CameraError::InitializationError(format!("Failed to read config file: {}", e))
        })?;

        let config: CamSignalConfig = toml::from_str(&contents).map_err(|e| {
            CameraError::InitializationError(format!("Failed to parse config file: {}", e))
        })?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), CameraError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CameraError::InitializationError(format!(
                    "Failed to create config directory: {}",
                    e
                ))
            })?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(|e| {
            CameraError::InitializationError(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(path, toml_string).map_err(|e| {
            CameraError::InitializationError(format!("Failed to write config file: {}", e))
        })?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("camsignal.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port must be non-zero".to_string());
        }
        self.socket_addr()?;

        let [width, height] = self.camera.resolution;
        if width == 0 || height == 0 {
            return Err("Invalid camera resolution".to_string());
        }
        // I420 subsamples chroma in 2x2 blocks
        if width % 2 != 0 || height % 2 != 0 {
            return Err("Camera resolution must have even dimensions".to_string());
        }
        if width > MAX_RESOLUTION[0] || height > MAX_RESOLUTION[1] {
            return Err(format!(
                "Camera resolution {}x{} exceeds {}x{}",
                width, height, MAX_RESOLUTION[0], MAX_RESOLUTION[1]
            ));
        }
        if self.camera.fps == 0 || self.camera.fps > 240 {
            return Err("Invalid camera FPS (must be 1-240)".to_string());
        }
        if self.camera.default_device.trim().is_empty() {
            return Err("Default camera device must not be empty".to_string());
        }

        if self.encoder.bitrate == 0 {
            return Err("Encoder bitrate must be non-zero".to_string());
        }
        if self.encoder.keyframe_interval == 0 {
            return Err("Keyframe interval must be non-zero".to_string());
        }

        if self.webrtc.channel_capacity == 0 {
            return Err("Channel capacity must be non-zero".to_string());
        }
        for server in &self.webrtc.ice_servers {
            if server.urls.is_empty() {
                return Err("ICE server entry has no URLs".to_string());
            }
        }

        Ok(())
    }

    /// Address the HTTP listener binds to
    pub fn socket_addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.server.bind_address, self.server.port)
            .parse()
            .map_err(|e| format!("Invalid bind address: {}", e))
    }

    /// Stream settings derived from the camera and encoder sections
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            width: self.camera.resolution[0],
            height: self.camera.resolution[1],
            fps: self.camera.fps,
            bitrate: self.encoder.bitrate,
            keyframe_interval: self.encoder.keyframe_interval,
            capacity: self.webrtc.channel_capacity,
            idle_timeout: IDLE_TIMEOUT,
        }
    }

    /// Peer connection settings
    pub fn rtc_configuration(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: self.webrtc.ice_servers.clone(),
            ice_transport_policy: self.webrtc.ice_transport_policy,
            bundle_policy: self.webrtc.bundle_policy,
        }
    }
}
