use async_trait::async_trait;
use bytes::Bytes;

use crate::error::CameraError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotQuality {
    Low,
    High,
}

/// A polled still-image endpoint.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn snapshot(&self, quality: SnapshotQuality) -> Result<Bytes, CameraError>;
}

/// A continuous video stream. `read` returns the most recent JPEG-encoded frame.
#[async_trait]
pub trait StreamSource: Send + Sync {
    async fn open(&self) -> Result<(), CameraError>;

    async fn read(&self) -> Result<Bytes, CameraError>;

    /// Liveness check.
    fn is_opened(&self) -> bool;

    async fn close(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfraredMode {
    Open,
    Close,
    Auto,
}

impl InfraredMode {
    pub const CYCLE: [InfraredMode; 3] = [InfraredMode::Open, InfraredMode::Close, InfraredMode::Auto];

    pub fn as_str(&self) -> &'static str {
        match self {
            InfraredMode::Open => "open",
            InfraredMode::Close => "close",
            InfraredMode::Auto => "auto",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "open" => Some(InfraredMode::Open),
            "close" => Some(InfraredMode::Close),
            "auto" => Some(InfraredMode::Auto),
            _ => None,
        }
    }

    pub fn next(self) -> Self {
        match self {
            InfraredMode::Open => InfraredMode::Close,
            InfraredMode::Close => InfraredMode::Auto,
            InfraredMode::Auto => InfraredMode::Open,
        }
    }
}

/// Housekeeping endpoints only the CGI surface offers.
#[async_trait]
pub trait CameraAdmin: Send + Sync {
    async fn infrared(&self) -> Result<InfraredMode, CameraError>;

    async fn set_infrared(&self, mode: InfraredMode) -> Result<(), CameraError>;

    async fn set_overlay_name(&self, name: &str) -> Result<(), CameraError>;

    async fn sync_clock(&self) -> Result<(), CameraError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infrared_cycles_open_close_auto() {
        let mut mode = InfraredMode::Open;
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(mode);
            mode = mode.next();
        }
        assert_eq!(
            seen,
            vec![
                InfraredMode::Open,
                InfraredMode::Close,
                InfraredMode::Auto,
                InfraredMode::Open
            ]
        );
    }

    #[test]
    fn infrared_parses_camera_values() {
        for mode in InfraredMode::CYCLE {
            assert_eq!(InfraredMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(InfraredMode::parse("on"), None);
    }
}
