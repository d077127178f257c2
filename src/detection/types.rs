use bytes::Bytes;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Normalized box, center and size in [0, 1] of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    pub fn new(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self { cx, cy, w, h }
    }

    /// Pixel corners `(xmin, ymin, xmax, ymax)` for a frame of the given size.
    pub fn to_pixels(&self, width: u32, height: u32) -> (i64, i64, i64, i64) {
        let (width, height) = (f64::from(width), f64::from(height));
        let (cx, cy, w, h) = (
            f64::from(self.cx),
            f64::from(self.cy),
            f64::from(self.w),
            f64::from(self.h),
        );
        (
            ((cx - w / 2.0) * width) as i64,
            ((cy - h / 2.0) * height) as i64,
            ((cx + w / 2.0) * width) as i64,
            ((cy + h / 2.0) * height) as i64,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub rect: BoundingBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, rect: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
            rect,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectionRequest {
    pub id: Uuid,
    pub jpeg: Bytes,
    /// Cancelled when the dispatcher gives up on this request.
    pub cancel: CancellationToken,
}

#[derive(Debug)]
pub enum DetectorMessage {
    Detect(DetectionRequest),
    Halt,
}

#[derive(Debug, Clone)]
pub struct DetectionResponse {
    pub id: Uuid,
    pub timestamp: DateTime<Local>,
    pub detections: Vec<Detection>,
}
