use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::detection::types::{Detection, DetectionResponse, DetectorMessage};
use crate::error::DetectorError;

/// An object detector. Implementations may hold connections, hence `&mut self`.
#[async_trait]
pub trait Detector: Send {
    async fn detect(&mut self, jpeg: &Bytes) -> Result<Vec<Detection>, DetectorError>;

    /// Called after a `detect` call was abandoned partway through. Any state that could still
    /// carry the abandoned exchange must be discarded here.
    fn reset(&mut self) {}
}

/// Loop-side ends of the detector channels.
pub struct DetectorChannels {
    pub requests: Sender<DetectorMessage>,
    pub results: Receiver<DetectionResponse>,
}

pub struct DetectorTask {
    handle: JoinHandle<()>,
}

impl DetectorTask {
    /// Waits for the worker to stop, aborting it once `grace` elapses.
    pub async fn join(mut self, grace: Duration) {
        match tokio::time::timeout(grace, &mut self.handle).await {
            Ok(Ok(())) => info!("Detector worker stopped"),
            Ok(Err(e)) => warn!("Detector worker ended abnormally: {}", e),
            Err(_) => {
                warn!("Detector worker did not stop in time, aborting");
                self.handle.abort();
            }
        }
    }
}

/// Starts the detector worker on its own task. Requests are handled one at a time in order.
pub fn spawn_detector<D>(detector: D, queue: usize) -> (DetectorChannels, DetectorTask)
where
    D: Detector + 'static,
{
    let (request_tx, request_rx) = mpsc::channel(queue.max(1));
    let (result_tx, result_rx) = mpsc::channel(queue.max(1));
    let handle = tokio::spawn(run_worker(detector, request_rx, result_tx));
    (
        DetectorChannels {
            requests: request_tx,
            results: result_rx,
        },
        DetectorTask { handle },
    )
}

async fn run_worker<D: Detector>(
    mut detector: D,
    mut requests: Receiver<DetectorMessage>,
    results: Sender<DetectionResponse>,
) {
    info!("Detector worker started");
    while let Some(message) = requests.recv().await {
        let request = match message {
            DetectorMessage::Halt => {
                debug!("Detector worker received halt");
                break;
            }
            DetectorMessage::Detect(request) => request,
        };
        if request.cancel.is_cancelled() {
            debug!(id = %request.id, "Skipping cancelled detection request");
            continue;
        }

        let outcome = tokio::select! {
            _ = request.cancel.cancelled() => None,
            outcome = detector.detect(&request.jpeg) => Some(outcome),
        };
        let Some(outcome) = outcome else {
            debug!(id = %request.id, "Detection cancelled mid-flight");
            detector.reset();
            continue;
        };

        match outcome {
            Ok(detections) => {
                let response = DetectionResponse {
                    id: request.id,
                    timestamp: chrono::Local::now(),
                    detections,
                };
                if results.send(response).await.is_err() {
                    debug!("Result channel closed, stopping detector worker");
                    break;
                }
            }
            // no response; the dispatcher's deadline covers this
            Err(e) => warn!(id = %request.id, "Detection failed: {}", e),
        }
    }
    info!("Detector worker exiting");
}
