use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Failures while opening, reading or encoding a capture device.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("Camera initialization error: {0}")]
    InitializationError(String),
    #[error("Capture error: {0}")]
    CaptureError(String),
    #[error("Stream error: {0}")]
    StreamError(String),
    #[error("Encoding error: {0}")]
    EncodingError(String),
}

/// Failures reported by the WebRTC stack.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("Peer connection error: {0}")]
    PeerConnection(String),
    #[error("Invalid session description: {0}")]
    InvalidDescription(String),
    #[error("Track error: {0}")]
    Track(String),
}

/// Errors surfaced by the HTTP handlers.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Signal(#[from] SignalError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Signal(SignalError::InvalidDescription(_)) => StatusCode::BAD_REQUEST,
            ServerError::Camera(_) | ServerError::Signal(_) | ServerError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("Request failed: {}", self);
        } else {
            log::warn!("Rejected request: {}", self);
        }
        (status, self.to_string()).into_response()
    }
}
