use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Requested capture format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraFormat {
    pub width: u32,
    pub height: u32,
    pub fps: f32,
    pub format_type: String,
}

impl CameraFormat {
    pub fn new(width: u32, height: u32, fps: f32) -> Self {
        Self {
            width,
            height,
            fps,
            format_type: "MJPEG".to_string(),
        }
    }
}

/// A decoded RGB24 frame
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub id: String,
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
}

impl CameraFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, device_id: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            data,
            width,
            height,
            format: "RGB8".to_string(),
            timestamp: Utc::now(),
            device_id,
        }
    }

    /// Whether the buffer holds exactly one RGB24 image of the stated size
    pub fn is_valid(&self) -> bool {
        self.data.len() == self.width as usize * self.height as usize * 3
    }
}

/// Capture device as reported by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraDeviceInfo {
    pub id: String,
    pub name: String,
    pub description: String,
}

impl CameraDeviceInfo {
    pub fn new(id: String, name: String) -> Self {
        Self {
            id,
            name,
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: String) -> Self {
        self.description = description;
        self
    }
}

/// Parameters for opening a device
#[derive(Debug, Clone)]
pub struct CameraInitParams {
    pub device_id: String,
    pub format: CameraFormat,
}
