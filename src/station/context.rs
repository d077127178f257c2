use async_trait::async_trait;
use std::time::{Duration, Instant};

use crate::camera::source::InfraredMode;
use crate::common::Frame;
use crate::detection::types::Detection;
use crate::feed::feed_source::FrameProvider;
use crate::ptz::scheduler::PtzIntent;

/// Mutable operator-facing state, owned by the control loop and lent to component ticks.
pub struct ControlContext {
    pub intent: PtzIntent,
    pub muted: bool,
    pub infrared: Option<InfraredMode>,
    pub halted: bool,
    overlay: Vec<Detection>,
    overlay_expiry: Option<Instant>,
    overlay_hold: Duration,
    detection_frame: Option<Frame>,
    last_frame: Option<Frame>,
}

impl ControlContext {
    pub fn new(speed_modifier: f32, overlay_hold: Duration) -> Self {
        Self {
            intent: PtzIntent::new(speed_modifier),
            muted: false,
            infrared: None,
            halted: false,
            overlay: Vec::new(),
            overlay_expiry: None,
            overlay_hold,
            detection_frame: None,
            last_frame: None,
        }
    }

    /// Records this tick's read. Detection is offered `newest`, the most recent frame still
    /// buffered, when there is one. A failed read keeps the last good frame for display and
    /// offers nothing to detection.
    pub fn set_frame(&mut self, frame: Option<Frame>, newest: Option<Frame>) {
        let Some(frame) = frame else {
            self.detection_frame = None;
            return;
        };
        self.detection_frame = Some(
            newest
                .filter(|newest| newest.captured_at() >= frame.captured_at())
                .unwrap_or_else(|| frame.clone()),
        );
        self.last_frame = Some(frame);
    }

    pub fn last_frame(&self) -> Option<&Frame> {
        self.last_frame.as_ref()
    }

    pub fn show_detections(&mut self, now: Instant, detections: Vec<Detection>) {
        self.overlay = detections;
        self.overlay_expiry = Some(now + self.overlay_hold);
    }

    pub fn expire_overlay(&mut self, now: Instant) {
        if self.overlay_expiry.is_some_and(|expiry| now > expiry) {
            self.overlay.clear();
            self.overlay_expiry = None;
        }
    }

    /// Detections the renderer should currently draw.
    pub fn overlay(&self) -> &[Detection] {
        &self.overlay
    }
}

#[async_trait]
impl FrameProvider for ControlContext {
    async fn latest_frame(&mut self, _now: Instant) -> Option<Frame> {
        self.detection_frame.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::FeedMode;
    use crate::detection::types::BoundingBox;
    use bytes::Bytes;

    #[test]
    fn overlay_expires_after_hold() {
        let mut context = ControlContext::new(0.1, Duration::from_secs(3));
        let t0 = Instant::now();
        context.show_detections(
            t0,
            vec![Detection::new("bird", 0.9, BoundingBox::new(0.5, 0.5, 0.1, 0.1))],
        );
        context.expire_overlay(t0 + Duration::from_secs(2));
        assert_eq!(context.overlay().len(), 1);
        context.expire_overlay(t0 + Duration::from_millis(3001));
        assert!(context.overlay().is_empty());
    }

    #[tokio::test]
    async fn failed_read_keeps_last_frame_but_offers_nothing() {
        let mut context = ControlContext::new(0.1, Duration::from_secs(3));
        let now = Instant::now();
        let frame = Frame::new(FeedMode::Polled, Bytes::from_static(b"a"), now);
        context.set_frame(Some(frame), None);
        assert!(context.latest_frame(now).await.is_some());
        context.set_frame(None, None);
        assert!(context.latest_frame(now).await.is_none());
        assert!(context.last_frame().is_some());
    }

    #[tokio::test]
    async fn detection_gets_the_newest_buffered_frame() {
        let mut context = ControlContext::new(0.1, Duration::from_secs(3));
        let t0 = Instant::now();
        let shown = Frame::new(FeedMode::Stream, Bytes::from_static(b"old"), t0);
        let newest = Frame::new(
            FeedMode::Stream,
            Bytes::from_static(b"new"),
            t0 + Duration::from_millis(60),
        );

        context.set_frame(Some(shown.clone()), Some(newest.clone()));
        assert_eq!(context.last_frame().unwrap().id(), shown.id());
        assert_eq!(context.latest_frame(t0).await.unwrap().id(), newest.id());

        // an older buffered frame never replaces the one just read
        context.set_frame(Some(newest.clone()), Some(shown));
        assert_eq!(context.latest_frame(t0).await.unwrap().id(), newest.id());
    }
}
