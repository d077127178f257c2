use thiserror::Error;

// Main Application Error Type

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration Error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Camera Error: {0}")]
    Camera(#[from] CameraError),
    #[error("Detector Error: {0}")]
    Detector(#[from] DetectorError),
    #[error("Record Error: {0}")]
    Record(#[from] std::io::Error),
    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

// Camera Error Type, covers both the snapshot/stream sources and the PTZ backends
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Camera rejected {action} with status {status}")]
    Status { action: String, status: u16 },
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Stream is not open")]
    StreamClosed,
    #[error("Failed to spawn stream process: {0}")]
    StreamSpawn(std::io::Error),
    #[error("Command not supported by this backend: {0}")]
    Unsupported(&'static str),
    #[error("Unexpected camera response: {0}")]
    InvalidResponse(String),
}

// Detector Error Type
#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Failed to connect to detector at {1}: {0}")]
    Connect(std::io::Error, String),
    #[error("Detector I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Detector payload of {0} bytes exceeds the frame limit")]
    FrameTooLarge(usize),
    #[error("Malformed detector response: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug, PartialEq)]
pub enum CommandParseError {
    #[error("Empty command")]
    Empty,
    #[error("Unknown command: {0}")]
    Unknown(String),
    #[error("Missing argument for {0}")]
    MissingArgument(&'static str),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}
