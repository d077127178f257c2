use chrono::{DateTime, Local};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::mpsc::{Receiver, Sender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::common::Frame;
use crate::config::DetectorSettings;
use crate::detection::types::{Detection, DetectionRequest, DetectionResponse, DetectorMessage};
use crate::detection::worker::DetectorChannels;
use crate::feed::feed_source::FrameProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Active,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    AwaitingResult,
    Disabled,
}

/// What one poll produced. Empty unless a matching result arrived this tick.
#[derive(Debug, Default)]
pub struct DetectionOutcome {
    pub detections: Vec<Detection>,
    pub timestamp: Option<DateTime<Local>>,
    pub frame: Option<Frame>,
}

impl DetectionOutcome {
    pub fn is_empty(&self) -> bool {
        self.timestamp.is_none()
    }
}

/// The submitted frame, held until its result comes back.
struct Pending {
    id: Uuid,
    frame: Frame,
    cancel: CancellationToken,
}

/// Circuit breaker around the detector worker. Never blocks on the worker: all traffic goes
/// through `try_send` / `try_recv`.
pub struct DetectionDispatcher {
    requests: Sender<DetectorMessage>,
    results: Receiver<DetectionResponse>,
    circuit: CircuitState,
    shadow: Option<Pending>,
    processing_deadline: Instant,
    retry_deadline: Option<Instant>,
    processing_timeout: Duration,
    retry_interval: Duration,
}

impl DetectionDispatcher {
    pub fn new(channels: DetectorChannels, settings: &DetectorSettings, now: Instant) -> Self {
        Self {
            requests: channels.requests,
            results: channels.results,
            circuit: CircuitState::Active,
            shadow: None,
            processing_deadline: now + settings.processing_timeout(),
            retry_deadline: None,
            processing_timeout: settings.processing_timeout(),
            retry_interval: settings.retry_interval(),
        }
    }

    pub fn state(&self) -> DispatchState {
        match (self.circuit, &self.shadow) {
            (CircuitState::Disabled, _) => DispatchState::Disabled,
            (CircuitState::Active, Some(_)) => DispatchState::AwaitingResult,
            (CircuitState::Active, None) => DispatchState::Idle,
        }
    }

    pub fn circuit(&self) -> CircuitState {
        self.circuit
    }

    pub fn is_active(&self) -> bool {
        self.circuit == CircuitState::Active
    }

    pub fn processing_deadline(&self) -> Instant {
        self.processing_deadline
    }

    pub fn retry_deadline(&self) -> Option<Instant> {
        self.retry_deadline
    }

    pub fn has_outstanding(&self) -> bool {
        self.shadow.is_some()
    }

    fn abandon_outstanding(&mut self) {
        if let Some(pending) = self.shadow.take() {
            pending.cancel.cancel();
            debug!(id = %pending.id, "Abandoned outstanding detection request");
        }
    }

    pub fn enable(&mut self, now: Instant) {
        self.circuit = CircuitState::Active;
        self.processing_deadline = now + self.processing_timeout;
        self.retry_deadline = None;
        info!(outstanding = self.shadow.is_some(), "Detection enabled");
    }

    /// Operator disable; no automatic recovery.
    pub fn disable(&mut self) {
        self.circuit = CircuitState::Disabled;
        self.retry_deadline = None;
        self.abandon_outstanding();
        info!("Detection disabled");
    }

    pub fn toggle(&mut self, now: Instant) -> bool {
        match self.circuit {
            CircuitState::Active => self.disable(),
            CircuitState::Disabled => self.enable(now),
        }
        self.is_active()
    }

    /// Takes the result matching the outstanding request, dropping stale ones.
    fn collect(&mut self) -> Option<DetectionOutcome> {
        loop {
            let response = match self.results.try_recv() {
                Ok(response) => response,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => {
                    debug!("Detector result channel closed");
                    return None;
                }
            };
            let matches = self
                .shadow
                .as_ref()
                .is_some_and(|pending| pending.id == response.id);
            if !matches {
                debug!(id = %response.id, "Dropping stale detection result");
                continue;
            }
            let pending = self.shadow.take()?;
            debug!(
                id = %response.id,
                count = response.detections.len(),
                "Detection result received"
            );
            return Some(DetectionOutcome {
                detections: response.detections,
                timestamp: Some(response.timestamp),
                frame: Some(pending.frame),
            });
        }
    }

    fn submit(&mut self, now: Instant, frame: Frame) {
        let request = DetectionRequest {
            id: Uuid::new_v4(),
            jpeg: frame.jpeg().clone(),
            cancel: CancellationToken::new(),
        };
        let (id, cancel) = (request.id, request.cancel.clone());
        match self.requests.try_send(DetectorMessage::Detect(request)) {
            Ok(()) => {
                debug!(%id, "Submitted frame for detection");
                self.shadow = Some(Pending { id, frame, cancel });
                self.processing_deadline = now + self.processing_timeout;
            }
            Err(TrySendError::Full(_)) => warn!("Detector queue full, skipping frame"),
            Err(TrySendError::Closed(_)) => warn!("Detector worker is gone, cannot submit frame"),
        }
    }

    /// One control-loop step.
    pub async fn poll<P: FrameProvider + ?Sized>(
        &mut self,
        now: Instant,
        frames: &mut P,
    ) -> DetectionOutcome {
        if self.circuit == CircuitState::Disabled {
            if let Some(retry) = self.retry_deadline {
                if now > retry {
                    self.circuit = CircuitState::Active;
                    self.retry_deadline = None;
                    self.processing_deadline = now + self.processing_timeout;
                    info!("Retrying detection after timeout");
                }
            }
            return DetectionOutcome::default();
        }

        if self.shadow.is_some() {
            if let Some(outcome) = self.collect() {
                return outcome;
            }
            if now > self.processing_deadline {
                warn!(
                    retry_in_secs = self.retry_interval.as_secs(),
                    "Detector timed out, disabling detection"
                );
                self.abandon_outstanding();
                self.circuit = CircuitState::Disabled;
                self.retry_deadline = Some(now + self.retry_interval);
            }
            return DetectionOutcome::default();
        }

        // nothing outstanding, so anything waiting is a late answer to an abandoned request
        let _ = self.collect();
        if let Some(frame) = frames.latest_frame(now).await {
            self.submit(now, frame);
        }
        DetectionOutcome::default()
    }

    /// Sends the halt sentinel and drains both channels.
    pub fn halt(&mut self) {
        self.abandon_outstanding();
        if let Err(e) = self.requests.try_send(DetectorMessage::Halt) {
            warn!("Could not deliver halt to detector: {}", e);
        }
        self.results.close();
        while self.results.try_recv().is_ok() {}
        self.circuit = CircuitState::Disabled;
        self.retry_deadline = None;
    }
}
