use thiserror::Error;

/// Camera acquisition failures. Surfaced to the operator; monitoring stays off.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),
}

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("model load failed: {0}")]
    ModelLoad(String),
    #[error("model not loaded")]
    ModelNotLoaded,
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("previous inference still running")]
    Busy,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("frame not ready")]
    FrameNotReady,
    #[error("image encode error: {0}")]
    Encode(#[from] image::ImageError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("capture {0} not found")]
    NotFound(String),
}
