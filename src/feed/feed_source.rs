use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::camera::source::{SnapshotQuality, SnapshotSource, StreamSource};
use crate::common::{FeedMode, Frame};
use crate::config::FeedSettings;
use crate::error::{AppError, CameraError};
use crate::feed::buffer::FrameBuffer;

/// Anything that can hand the control loop its freshest frame.
#[async_trait]
pub trait FrameProvider: Send {
    async fn latest_frame(&mut self, now: Instant) -> Option<Frame>;
}

/// Continuous stream plus the reconnect bookkeeping shared with background tasks.
#[derive(Clone)]
struct StreamLink {
    source: Arc<dyn StreamSource>,
    reconnecting: Arc<AtomicBool>,
    backoff: Duration,
}

impl StreamLink {
    fn is_available(&self) -> bool {
        !self.reconnecting.load(Ordering::SeqCst) && self.source.is_opened()
    }

    /// Spawns one reconnect attempt after the backoff, unless one is already pending.
    fn schedule_reconnect(&self) {
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!(
            backoff_secs = self.backoff.as_secs_f32(),
            "Stream unavailable, serving polled snapshots until reconnect"
        );
        let link = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(link.backoff).await;
                link.source.close().await;
                match link.source.open().await {
                    Ok(()) => {
                        info!("Stream reconnected");
                        break;
                    }
                    Err(e) => warn!("Stream reconnect failed: {}", e),
                }
            }
            link.reconnecting.store(false, Ordering::SeqCst);
        });
    }
}

/// Acquires frames from the continuous stream or the polled snapshot endpoint and keeps a
/// short buffer fed by background fetches.
pub struct FeedSource {
    snapshot: Arc<dyn SnapshotSource>,
    stream: Option<StreamLink>,
    buffer: FrameBuffer,
    arrivals_tx: Sender<Frame>,
    arrivals_rx: Receiver<Frame>,
    fetch_interval: Duration,
    last_fetch: Option<Instant>,
    snapshot_override: bool,
}

impl FeedSource {
    pub fn new(
        snapshot: Arc<dyn SnapshotSource>,
        stream: Option<Arc<dyn StreamSource>>,
        settings: &FeedSettings,
    ) -> Self {
        let (arrivals_tx, arrivals_rx) = mpsc::channel(settings.capacity.max(1) * 2);
        Self {
            snapshot,
            stream: stream.map(|source| StreamLink {
                source,
                reconnecting: Arc::new(AtomicBool::new(false)),
                backoff: settings.reconnect_backoff(),
            }),
            buffer: FrameBuffer::new(settings),
            arrivals_tx,
            arrivals_rx,
            fetch_interval: settings.fetch_interval(),
            last_fetch: None,
            snapshot_override: false,
        }
    }

    /// Opens the stream if one is configured. A failure is not fatal, the reconnect loop
    /// takes over and the polled endpoint serves meanwhile.
    pub async fn start(&self) {
        if let Some(link) = &self.stream {
            match link.source.open().await {
                Ok(()) => info!("Connected to stream"),
                Err(e) => {
                    warn!("Could not open stream: {}", e);
                    link.schedule_reconnect();
                }
            }
        }
    }

    pub fn has_stream(&self) -> bool {
        self.stream.is_some()
    }

    pub fn stream_available(&self) -> bool {
        self.stream.as_ref().is_some_and(StreamLink::is_available)
    }

    /// While set, every read goes to the polled endpoint.
    pub fn set_snapshot_override(&mut self, enabled: bool) {
        if self.snapshot_override != enabled {
            debug!(enabled, "Snapshot override changed");
        }
        self.snapshot_override = enabled;
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Newest frame left in the buffer after this tick's `view`.
    pub fn newest_buffered(&self) -> Option<Frame> {
        self.buffer.newest()
    }

    fn preferred_mode(&mut self) -> FeedMode {
        if self.snapshot_override {
            return FeedMode::Polled;
        }
        match &self.stream {
            Some(link) if link.is_available() => FeedMode::Stream,
            Some(link) => {
                if !link.reconnecting.load(Ordering::SeqCst) {
                    link.schedule_reconnect();
                }
                FeedMode::Polled
            }
            None => FeedMode::Polled,
        }
    }

    async fn fetch(
        mode: FeedMode,
        snapshot: &Arc<dyn SnapshotSource>,
        stream: Option<&StreamLink>,
        quality: SnapshotQuality,
    ) -> Result<Frame, CameraError> {
        let jpeg = match mode {
            FeedMode::Stream => {
                let link = stream.ok_or(CameraError::StreamClosed)?;
                if !link.is_available() {
                    return Err(CameraError::StreamClosed);
                }
                link.source.read().await.inspect_err(|_| link.schedule_reconnect())?
            }
            FeedMode::Polled => snapshot.snapshot(quality).await?,
        };
        Ok(Frame::new(mode, jpeg, Instant::now()))
    }

    /// Direct pull bypassing the buffer. An explicit mode is honoured even if it yields
    /// nothing; without one the preferred path is used with a polled fallback.
    pub async fn acquire(&mut self, mode: Option<FeedMode>) -> Option<Frame> {
        let explicit = mode.is_some();
        let mode = mode.unwrap_or_else(|| self.preferred_mode());
        match Self::fetch(mode, &self.snapshot, self.stream.as_ref(), SnapshotQuality::Low).await {
            Ok(frame) => Some(frame),
            Err(e) if mode == FeedMode::Stream && !explicit => {
                debug!("Stream read failed, falling back to snapshot: {}", e);
                Self::fetch(FeedMode::Polled, &self.snapshot, None, SnapshotQuality::Low)
                    .await
                    .inspect_err(|e| warn!("Snapshot fetch failed: {}", e))
                    .ok()
            }
            Err(e) => {
                debug!(?mode, "Acquire failed: {}", e);
                None
            }
        }
    }

    fn drain_arrivals(&mut self) {
        while let Ok(frame) = self.arrivals_rx.try_recv() {
            self.buffer.push(frame);
        }
    }

    fn spawn_fetch(&mut self, now: Instant) {
        self.last_fetch = Some(now);
        let mode = self.preferred_mode();
        let snapshot = self.snapshot.clone();
        let stream = self.stream.clone();
        let arrivals = self.arrivals_tx.clone();
        tokio::spawn(async move {
            let frame =
                match Self::fetch(mode, &snapshot, stream.as_ref(), SnapshotQuality::Low).await {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!(?mode, "Background fetch failed: {}", e);
                        return;
                    }
                };
            match arrivals.try_send(frame) {
                Ok(_) => {}
                Err(TrySendError::Full(_)) => warn!("Dropping frame: arrival channel full"),
                Err(TrySendError::Closed(_)) => debug!("Feed source gone, discarding frame"),
            }
        });
    }

    /// Buffered read.
    pub async fn view(&mut self, now: Instant) -> Option<Frame> {
        self.drain_arrivals();
        let evicted = self.buffer.evict_stale(now);
        if evicted > 0 {
            debug!(evicted, "Evicted stale frames");
        }

        if self.buffer.is_empty() {
            return self.acquire(None).await;
        }

        let fetch_due = self
            .last_fetch
            .is_none_or(|last| now.saturating_duration_since(last) > self.fetch_interval);
        if self.buffer.is_below_low_water() && fetch_due {
            self.spawn_fetch(now);
        }

        self.buffer.take()
    }

    /// Saves a high-quality still, from the stream when it is up, otherwise from the
    /// high-quality snapshot endpoint.
    pub fn save_snapshot(&self, dir: &Path) -> JoinHandle<Result<PathBuf, AppError>> {
        let mode = if self.stream_available() {
            FeedMode::Stream
        } else {
            FeedMode::Polled
        };
        let snapshot = self.snapshot.clone();
        let stream = self.stream.clone();
        let path = dir.join(chrono::Local::now().format("%y%m%d%H%M%S.jpg").to_string());
        tokio::spawn(async move {
            let frame = Self::fetch(mode, &snapshot, stream.as_ref(), SnapshotQuality::High).await?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, frame.jpeg()).await?;
            info!(path = %path.display(), "Saved snapshot");
            Ok(path)
        })
    }

    pub async fn close(&mut self) {
        if let Some(link) = &self.stream {
            link.source.close().await;
        }
        self.arrivals_rx.close();
        while self.arrivals_rx.try_recv().is_ok() {}
    }
}
