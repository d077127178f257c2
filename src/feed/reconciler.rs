use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::common::{FeedMode, Frame};
use crate::config::ReconcileSettings;
use crate::feed::feed_source::FeedSource;
use crate::feed::histogram::image_distance;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShiftState {
    pub realtime_override: bool,
    pub shift_expiry: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Both paths agree again, the stream is back in use.
    Restored,
    /// Still diverging or unmeasurable, the window moved forward.
    Extended,
}

/// Decides when the temporary direct-snapshot period may end.
pub struct FeedReconciler {
    state: ShiftState,
    shift_window: Duration,
    retry_step: Duration,
    threshold: f64,
    hue_bins: usize,
    saturation_bins: usize,
}

impl FeedReconciler {
    pub fn new(settings: &ReconcileSettings) -> Self {
        Self {
            state: ShiftState::default(),
            shift_window: settings.shift_window(),
            retry_step: settings.retry_step(),
            threshold: settings.threshold,
            hue_bins: settings.hue_bins,
            saturation_bins: settings.saturation_bins,
        }
    }

    pub fn state(&self) -> ShiftState {
        self.state
    }

    pub fn realtime_override(&self) -> bool {
        self.state.realtime_override
    }

    /// Any PTZ motion or zoom/focus action. A manually requested override has no expiry and
    /// is left alone.
    pub fn notify_motion(&mut self, now: Instant) {
        if !self.state.realtime_override || self.state.shift_expiry.is_some() {
            self.state.realtime_override = true;
            self.state.shift_expiry = Some(now + self.shift_window);
        }
    }

    /// Operator toggle of the direct-snapshot mode; never expires on its own.
    pub fn toggle_realtime(&mut self) -> bool {
        self.state.realtime_override = !self.state.realtime_override;
        self.state.shift_expiry = None;
        info!(realtime = self.state.realtime_override, "Realtime override toggled");
        self.state.realtime_override
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.state.shift_expiry.is_some_and(|expiry| now > expiry)
    }

    fn restore(&mut self) -> ReconcileOutcome {
        self.state.realtime_override = false;
        self.state.shift_expiry = None;
        ReconcileOutcome::Restored
    }

    /// Applies a measured distance; `None` means the frames could not be compared.
    pub fn apply_distance(&mut self, now: Instant, distance: Option<f64>) -> ReconcileOutcome {
        match distance {
            Some(distance) if distance < self.threshold => {
                info!(distance, "Stream matches snapshot, leaving direct-snapshot mode");
                self.restore()
            }
            _ => {
                debug!(?distance, "Stream still diverging from snapshot");
                self.state.shift_expiry = Some(now + self.retry_step);
                ReconcileOutcome::Extended
            }
        }
    }

    async fn measure(&self, stream: Frame, polled: Frame) -> Option<f64> {
        let (hue_bins, saturation_bins) = (self.hue_bins, self.saturation_bins);
        let measured = tokio::task::spawn_blocking(move || {
            let stream = stream.decode().ok()?;
            let polled = polled.decode().ok()?;
            Some(image_distance(&stream, &polled, hue_bins, saturation_bins))
        })
        .await;
        match measured {
            Ok(distance) => distance,
            Err(e) => {
                warn!("Histogram comparison task failed: {}", e);
                None
            }
        }
    }

    /// Runs one reconciliation step when the window has expired.
    pub async fn tick(&mut self, now: Instant, feed: &mut FeedSource) -> Option<ReconcileOutcome> {
        if !self.is_due(now) {
            return None;
        }
        if !feed.has_stream() {
            return Some(self.restore());
        }

        let stream = feed.acquire(Some(FeedMode::Stream)).await;
        let polled = feed.acquire(Some(FeedMode::Polled)).await;
        let distance = match (stream, polled) {
            (Some(stream), Some(polled)) => self.measure(stream, polled).await,
            _ => None,
        };
        Some(self.apply_distance(now, distance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeedSettings;
    use crate::feed::feed_source::tests::{StubSnapshot, StubStream};
    use crate::camera::source::StreamSource;
    use bytes::Bytes;
    use image::{DynamicImage, ImageBuffer, Rgb};
    use std::sync::Arc;

    fn reconciler() -> FeedReconciler {
        FeedReconciler::new(&ReconcileSettings::default())
    }

    fn jpeg(color: [u8; 3]) -> Bytes {
        let image = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(64, 36, Rgb(color)));
        Frame::from_image(FeedMode::Polled, &image, Instant::now())
            .unwrap()
            .jpeg()
            .clone()
    }

    #[test]
    fn motion_opens_and_extends_the_window() {
        let mut reconciler = reconciler();
        let t0 = Instant::now();
        reconciler.notify_motion(t0);
        assert!(reconciler.realtime_override());
        assert_eq!(reconciler.state().shift_expiry, Some(t0 + Duration::from_secs(2)));

        let t1 = t0 + Duration::from_millis(500);
        reconciler.notify_motion(t1);
        assert_eq!(reconciler.state().shift_expiry, Some(t1 + Duration::from_secs(2)));
        assert!(!reconciler.is_due(t1 + Duration::from_secs(2)));
        assert!(reconciler.is_due(t1 + Duration::from_millis(2001)));
    }

    #[test]
    fn close_match_clears_override() {
        let mut reconciler = reconciler();
        let t0 = Instant::now();
        reconciler.notify_motion(t0);
        let now = t0 + Duration::from_millis(2100);
        assert_eq!(reconciler.apply_distance(now, Some(0.15)), ReconcileOutcome::Restored);
        assert_eq!(reconciler.state(), ShiftState::default());
    }

    #[test]
    fn divergent_frames_push_expiry_by_retry_step() {
        let mut reconciler = reconciler();
        let t0 = Instant::now();
        reconciler.notify_motion(t0);
        let now = t0 + Duration::from_millis(2100);
        assert_eq!(reconciler.apply_distance(now, Some(0.25)), ReconcileOutcome::Extended);
        assert!(reconciler.realtime_override());
        assert_eq!(
            reconciler.state().shift_expiry,
            Some(now + Duration::from_millis(100))
        );
    }

    #[test]
    fn manual_override_is_not_cleared_by_motion() {
        let mut reconciler = reconciler();
        assert!(reconciler.toggle_realtime());
        reconciler.notify_motion(Instant::now());
        assert_eq!(reconciler.state().shift_expiry, None);
        assert!(!reconciler.is_due(Instant::now() + Duration::from_secs(60)));
        assert!(!reconciler.toggle_realtime());
    }

    #[tokio::test]
    async fn matching_feeds_restore_the_stream() {
        let stream = Arc::new(StubStream::with_payload(jpeg([30, 140, 60])));
        stream.open().await.unwrap();
        let snapshot = Arc::new(StubSnapshot::with_payload(jpeg([30, 140, 60])));
        let mut feed = FeedSource::new(snapshot, Some(stream), &FeedSettings::default());

        let mut reconciler = reconciler();
        let t0 = Instant::now();
        reconciler.notify_motion(t0);
        assert_eq!(reconciler.tick(t0 + Duration::from_secs(1), &mut feed).await, None);
        let outcome = reconciler.tick(t0 + Duration::from_millis(2100), &mut feed).await;
        assert_eq!(outcome, Some(ReconcileOutcome::Restored));
        assert!(!reconciler.realtime_override());
    }

    #[tokio::test]
    async fn differing_feeds_keep_snapshot_mode() {
        let stream = Arc::new(StubStream::with_payload(jpeg([255, 0, 0])));
        stream.open().await.unwrap();
        let snapshot = Arc::new(StubSnapshot::with_payload(jpeg([0, 0, 255])));
        let mut feed = FeedSource::new(snapshot, Some(stream), &FeedSettings::default());

        let mut reconciler = reconciler();
        let t0 = Instant::now();
        reconciler.notify_motion(t0);
        let now = t0 + Duration::from_millis(2100);
        assert_eq!(
            reconciler.tick(now, &mut feed).await,
            Some(ReconcileOutcome::Extended)
        );
        assert_eq!(
            reconciler.state().shift_expiry,
            Some(now + Duration::from_millis(100))
        );
    }

    #[tokio::test]
    async fn without_a_stream_the_window_simply_closes() {
        let mut feed = FeedSource::new(
            Arc::new(StubSnapshot::default()),
            None,
            &FeedSettings::default(),
        );
        let mut reconciler = reconciler();
        let t0 = Instant::now();
        reconciler.notify_motion(t0);
        assert_eq!(
            reconciler.tick(t0 + Duration::from_secs(3), &mut feed).await,
            Some(ReconcileOutcome::Restored)
        );
    }
}
