use bytes::Bytes;
use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

use crate::config::RecordSettings;
use crate::detection::types::Detection;
use crate::error::AppError;
use crate::records::annotation::pascal_voc;
use crate::records::sightings::SightingsLog;

/// Labels whose presence gets the frame saved.
pub const RECORDED_LABELS: [&str; 4] = ["bird", "cat", "bear", "person"];

pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

pub fn count_confident(detections: &[Detection], min_confidence: f32) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for detection in detections.iter().filter(|d| d.confidence > min_confidence) {
        *counts.entry(detection.label.clone()).or_insert(0) += 1;
    }
    counts
}

/// Persists frames with notable detections and keeps the sightings log.
#[derive(Debug, Clone)]
pub struct SightingRecorder {
    sightings: SightingsLog,
    images_dir: PathBuf,
    width: u32,
    height: u32,
    min_confidence: f32,
}

impl SightingRecorder {
    pub fn new(settings: &RecordSettings) -> Self {
        Self {
            sightings: SightingsLog::new(settings.sightings_log.clone()),
            images_dir: settings.images_dir.clone(),
            width: settings.annotation_width,
            height: settings.annotation_height,
            min_confidence: settings.min_confidence,
        }
    }

    pub fn counts(&self, detections: &[Detection]) -> BTreeMap<String, usize> {
        count_confident(detections, self.min_confidence)
    }

    /// Saves the frame and its annotation when a recorded label is present. Returns the image
    /// path if anything was written.
    pub async fn record(
        &self,
        detections: &[Detection],
        timestamp: DateTime<Local>,
        jpeg: &Bytes,
    ) -> Result<Option<PathBuf>, AppError> {
        let counts = self.counts(detections);
        if !RECORDED_LABELS.iter().any(|label| counts.contains_key(*label)) {
            return Ok(None);
        }
        let stamp = timestamp.format(TIMESTAMP_FORMAT).to_string();
        info!(?counts, "Sighting");

        if let Some(&birds) = counts.get("bird") {
            self.sightings.append(&stamp, birds).await?;
        }

        tokio::fs::create_dir_all(&self.images_dir).await?;
        let image_path = self.images_dir.join(format!("{}.jpg", stamp));
        tokio::fs::write(&image_path, jpeg).await?;
        let annotation = pascal_voc(&image_path, detections, self.width, self.height);
        tokio::fs::write(image_path.with_extension("xml"), annotation).await?;
        Ok(Some(image_path))
    }
}
