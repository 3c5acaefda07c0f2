//! camsignal server entry point
//!
//! ```bash
//! # Serve /dev/video2 on every interface
//! camsignal --bind 0.0.0.0 --device /dev/video2
//!
//! # No camera attached
//! camsignal --synthetic
//! ```

use anyhow::{anyhow, Context};
use camsignal::webrtc::StreamMode;
use camsignal::CamSignalConfig;
use clap::Parser;
use std::path::PathBuf;

/// WebRTC signaling endpoint for a local camera
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "CAMSIGNAL_CONFIG")]
    config: Option<PathBuf>,

    /// Interface to bind
    #[arg(long, env = "CAMSIGNAL_BIND")]
    bind: Option<String>,

    /// HTTP port
    #[arg(short, long, env = "CAMSIGNAL_PORT")]
    port: Option<u16>,

    /// Device used when an offer names none
    #[arg(short, long)]
    device: Option<String>,

    /// Stream a synthetic test pattern instead of a camera
    #[arg(long)]
    synthetic: bool,

    /// Encoder target bitrate in bits per second
    #[arg(long)]
    bitrate: Option<u32>,
}

impl Args {
    fn apply(self, config: &mut CamSignalConfig) {
        if let Some(bind) = self.bind {
            config.server.bind_address = bind;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(device) = self.device {
            config.camera.default_device = device;
        }
        if self.synthetic {
            config.camera.mode = StreamMode::SyntheticTest;
        }
        if let Some(bitrate) = self.bitrate {
            config.encoder.bitrate = bitrate;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    camsignal::init_logging();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => CamSignalConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => CamSignalConfig::load_or_default(),
    };
    args.apply(&mut config);
    config.validate().map_err(|e| anyhow!("invalid configuration: {}", e))?;

    log::info!(
        "{} v{} (default device {}, {:?})",
        camsignal::NAME,
        camsignal::VERSION,
        config.camera.default_device,
        config.camera.mode
    );

    camsignal::server::run(config).await?;
    Ok(())
}
