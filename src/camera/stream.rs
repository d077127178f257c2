use async_trait::async_trait;
use bytes::Bytes;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::camera::source::StreamSource;
use crate::error::CameraError;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];
const MAX_PENDING_BYTES: usize = 16 * 1024 * 1024;

struct StreamProcess {
    child: Child,
    reader: JoinHandle<()>,
    frames: watch::Receiver<Option<Bytes>>,
}

/// Continuous stream decoded by an `ffmpeg` child process that re-encodes to MJPEG on stdout.
/// Only the most recent frame is kept.
pub struct FfmpegStream {
    url: String,
    read_timeout: Duration,
    process: Mutex<Option<StreamProcess>>,
    opened: Arc<AtomicBool>,
}

impl FfmpegStream {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            read_timeout: Duration::from_secs(5),
            process: Mutex::new(None),
            opened: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new("ffmpeg");
        command
            .args(["-loglevel", "error", "-rtsp_transport", "tcp", "-i"])
            .arg(&self.url)
            .args(["-f", "image2pipe", "-vcodec", "mjpeg", "-q:v", "3", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

/// Splits the next complete JPEG off the front of `pending`.
fn next_jpeg(pending: &mut Vec<u8>) -> Option<Bytes> {
    let start = pending.windows(2).position(|w| w == SOI)?;
    let end = pending[start + 2..].windows(2).position(|w| w == EOI)? + start + 4;
    let frame = Bytes::copy_from_slice(&pending[start..end]);
    pending.drain(..end);
    Some(frame)
}

/// Waits until the reader has published a frame and returns a copy of it.
async fn wait_for_frame(
    frames: &mut watch::Receiver<Option<Bytes>>,
    timeout: Duration,
) -> Result<Bytes, CameraError> {
    let frame = match tokio::time::timeout(timeout, frames.wait_for(|frame| frame.is_some())).await
    {
        Ok(Ok(frame)) => frame.clone().ok_or(CameraError::StreamClosed),
        Ok(Err(_)) | Err(_) => Err(CameraError::StreamClosed),
    };
    frame
}

async fn pump_frames(
    mut stdout: tokio::process::ChildStdout,
    frames: watch::Sender<Option<Bytes>>,
    opened: Arc<AtomicBool>,
) {
    let mut pending = Vec::with_capacity(512 * 1024);
    let mut chunk = vec![0u8; 64 * 1024];
    loop {
        match stdout.read(&mut chunk).await {
            Ok(0) => {
                warn!("Stream process closed its output");
                break;
            }
            Ok(n) => {
                pending.extend_from_slice(&chunk[..n]);
                let mut latest = None;
                while let Some(frame) = next_jpeg(&mut pending) {
                    latest = Some(frame);
                }
                if let Some(frame) = latest {
                    frames.send_replace(Some(frame));
                }
                if pending.len() > MAX_PENDING_BYTES {
                    warn!(bytes = pending.len(), "Discarding unframed stream data");
                    pending.clear();
                }
            }
            Err(e) => {
                warn!("Stream read failed: {}", e);
                break;
            }
        }
    }
    opened.store(false, Ordering::SeqCst);
}

#[async_trait]
impl StreamSource for FfmpegStream {
    async fn open(&self) -> Result<(), CameraError> {
        let mut process = self.process.lock().await;
        if let Some(mut previous) = process.take() {
            previous.reader.abort();
            let _ = previous.child.kill().await;
        }

        let mut child = self.command().spawn().map_err(CameraError::StreamSpawn)?;
        let stdout = child.stdout.take().ok_or(CameraError::StreamClosed)?;
        let (tx, rx) = watch::channel(None);
        self.opened.store(true, Ordering::SeqCst);
        let reader = tokio::spawn(pump_frames(stdout, tx, self.opened.clone()));
        *process = Some(StreamProcess {
            child,
            reader,
            frames: rx,
        });
        info!(url = %self.url, "Stream opened");
        Ok(())
    }

    async fn read(&self) -> Result<Bytes, CameraError> {
        if !self.is_opened() {
            return Err(CameraError::StreamClosed);
        }
        let mut frames = match self.process.lock().await.as_ref() {
            Some(process) => process.frames.clone(),
            None => return Err(CameraError::StreamClosed),
        };
        wait_for_frame(&mut frames, self.read_timeout).await
    }

    fn is_opened(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.opened.store(false, Ordering::SeqCst);
        if let Some(mut process) = self.process.lock().await.take() {
            process.reader.abort();
            if let Err(e) = process.child.kill().await {
                warn!("Failed to stop stream process: {}", e);
            }
            info!(url = %self.url, "Stream closed");
        }
    }
}
