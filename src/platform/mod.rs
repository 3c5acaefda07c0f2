//! Capture device access through nokhwa's native backend
//!
//! V4L2 on Linux, AVFoundation on macOS and MediaFoundation on Windows are all
//! reached through `ApiBackend::Auto`.

use crate::errors::CameraError;
use crate::types::{CameraDeviceInfo, CameraFrame, CameraInitParams};
use nokhwa::{
    pixel_format::RgbFormat,
    query,
    utils::{
        ApiBackend, CameraFormat as NokhwaFormat, CameraIndex, FrameFormat, RequestedFormat,
        RequestedFormatType, Resolution,
    },
    Camera,
};

/// List available cameras
pub fn list_cameras() -> Result<Vec<CameraDeviceInfo>, CameraError> {
    let cameras = query(ApiBackend::Auto)
        .map_err(|e| CameraError::InitializationError(format!("Failed to query cameras: {}", e)))?;

    log::debug!("Found {} cameras", cameras.len());

    Ok(cameras
        .into_iter()
        .map(|info| {
            CameraDeviceInfo::new(info.index().to_string(), info.human_name())
                .with_description(info.description().to_string())
        })
        .collect())
}

/// Map a device id to a capture index.
///
/// Accepts V4L2 style paths (`/dev/video2`) and bare indices (`2`).
pub fn parse_device_index(device_id: &str) -> Result<u32, CameraError> {
    let trimmed = device_id.trim();
    let index = trimmed.strip_prefix("/dev/video").unwrap_or(trimmed);

    index.parse::<u32>().map_err(|_| {
        CameraError::InitializationError(format!("Invalid device ID: {:?}", device_id))
    })
}

/// A capture device opened for RGB frames.
///
/// `nokhwa::Camera` is not `Send` on every backend, so a `PlatformCamera`
/// stays on the thread that opened it.
pub struct PlatformCamera {
    camera: Camera,
    device_id: String,
}

impl PlatformCamera {
    /// Open a device, asking for the closest MJPEG mode to the requested format
    pub fn open(params: CameraInitParams) -> Result<Self, CameraError> {
        let index = parse_device_index(&params.device_id)?;

        #[cfg(target_os = "macos")]
        nokhwa::nokhwa_initialize(|granted| {
            log::info!("Camera permission granted: {}", granted);
        });

        let wanted = NokhwaFormat::new(
            Resolution::new(params.format.width, params.format.height),
            FrameFormat::MJPEG,
            params.format.fps.round() as u32,
        );
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(wanted));

        let camera = Camera::new(CameraIndex::Index(index), requested).map_err(|e| {
            CameraError::InitializationError(format!(
                "Failed to initialize camera {}: {}",
                params.device_id, e
            ))
        })?;

        log::info!(
            "Opened camera {} ({}) at {:?}",
            params.device_id,
            camera.info().human_name(),
            camera.camera_format()
        );

        Ok(Self {
            camera,
            device_id: params.device_id,
        })
    }

    /// Start camera stream - must be called before capture_frame
    pub fn start_stream(&mut self) -> Result<(), CameraError> {
        log::debug!("Opening camera stream for device {}", self.device_id);
        self.camera
            .open_stream()
            .map_err(|e| CameraError::StreamError(format!("Failed to open stream: {}", e)))
    }

    /// Capture one frame and decode it to RGB24
    pub fn capture_frame(&mut self) -> Result<CameraFrame, CameraError> {
        let buffer = self
            .camera
            .frame()
            .map_err(|e| CameraError::CaptureError(format!("Failed to capture frame: {}", e)))?;

        let decoded = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| CameraError::CaptureError(format!("Failed to decode frame: {}", e)))?;

        let (width, height) = (decoded.width(), decoded.height());
        Ok(CameraFrame::new(
            decoded.into_raw(),
            width,
            height,
            self.device_id.clone(),
        ))
    }

    /// Stop camera stream
    pub fn stop_stream(&mut self) -> Result<(), CameraError> {
        log::debug!("Stopping camera stream for device {}", self.device_id);
        self.camera
            .stop_stream()
            .map_err(|e| CameraError::StreamError(format!("Failed to stop stream: {}", e)))
    }
}

impl Drop for PlatformCamera {
    fn drop(&mut self) {
        if self.camera.is_stream_open() {
            let _ = self.camera.stop_stream();
        }
    }
}
