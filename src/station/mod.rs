pub mod console;
pub mod context;

pub use console::{run_console, OperatorCommand};
pub use context::ControlContext;

use chrono::Timelike;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::camera::cgi::CgiCamera;
use crate::camera::onvif::OnvifPtz;
use crate::camera::source::{CameraAdmin, InfraredMode, SnapshotSource, StreamSource};
use crate::camera::stream::FfmpegStream;
use crate::config::{ControlBackend, Settings};
use crate::detection::darknet::DarknetClient;
use crate::detection::dispatcher::{DetectionDispatcher, DetectionOutcome};
use crate::detection::worker::{spawn_detector, Detector, DetectorTask};
use crate::error::AppError;
use crate::feed::feed_source::FeedSource;
use crate::feed::reconciler::FeedReconciler;
use crate::ptz::command::{PtzBackend, PtzCommand, ZoomDirection};
use crate::ptz::dispatch::{spawn_ptz_dispatch, PtzCommandSender};
use crate::ptz::scheduler::PtzScheduler;
use crate::records::alerts::{AlertPolicy, AlertSink, TracingAlertSink};
use crate::records::recorder::SightingRecorder;
use console::DIGITAL_ZOOM_RATE;

/// Camera-facing collaborators of a station.
pub struct StationParts {
    pub snapshot: Arc<dyn SnapshotSource>,
    pub stream: Option<Arc<dyn StreamSource>>,
    pub ptz: Arc<dyn PtzBackend>,
    pub admin: Option<Arc<dyn CameraAdmin>>,
    pub alerts: Arc<dyn AlertSink>,
}

impl StationParts {
    pub fn from_settings(settings: &Settings) -> Result<Self, AppError> {
        let cgi = Arc::new(CgiCamera::new(&settings.camera)?);
        let ptz: Arc<dyn PtzBackend> = match settings.camera.control {
            ControlBackend::Cgi => cgi.clone(),
            ControlBackend::Onvif => Arc::new(OnvifPtz::new(&settings.camera)?),
        };
        let admin = match settings.camera.control {
            ControlBackend::Cgi => Some(cgi.clone() as Arc<dyn CameraAdmin>),
            ControlBackend::Onvif => None,
        };
        let stream = settings
            .camera
            .stream_url
            .clone()
            .map(|url| Arc::new(FfmpegStream::new(url)) as Arc<dyn StreamSource>);
        Ok(Self {
            snapshot: cgi,
            stream,
            ptz,
            admin,
            alerts: Arc::new(TracingAlertSink),
        })
    }
}

/// Sends operator commands into a running station.
#[derive(Clone)]
pub struct StationHandle {
    commands: Sender<OperatorCommand>,
}

impl StationHandle {
    pub async fn send(&self, command: OperatorCommand) -> bool {
        self.commands.send(command).await.is_ok()
    }

    pub fn try_send(&self, command: OperatorCommand) -> bool {
        match self.commands.try_send(command) {
            Ok(()) => true,
            Err(TrySendError::Full(command)) => {
                warn!(?command, "Dropping operator command: queue full");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub async fn halt(&self) -> bool {
        self.send(OperatorCommand::Halt).await
    }
}

/// The control loop: operator input, PTZ scheduling, frame acquisition, detection and
/// feed reconciliation, one tick at a time.
pub struct Station {
    context: ControlContext,
    feed: FeedSource,
    reconciler: FeedReconciler,
    dispatcher: DetectionDispatcher,
    detector_task: DetectorTask,
    scheduler: PtzScheduler,
    ptz: PtzCommandSender,
    ptz_task: JoinHandle<()>,
    admin: Option<Arc<dyn CameraAdmin>>,
    recorder: SightingRecorder,
    alert_policy: AlertPolicy,
    alerts: Arc<dyn AlertSink>,
    operator: Receiver<OperatorCommand>,
    overlay_name: String,
    snapshots_dir: PathBuf,
    tick_interval: Duration,
    halt_grace: Duration,
}

impl Station {
    /// Wires a station to a Darknet detector and the camera described by `settings`.
    pub fn from_settings(settings: &Settings) -> Result<(Self, StationHandle), AppError> {
        let parts = StationParts::from_settings(settings)?;
        let detector = DarknetClient::new(settings.detector.endpoint());
        Ok(Self::new(settings, parts, detector))
    }

    pub fn new<D>(settings: &Settings, parts: StationParts, detector: D) -> (Self, StationHandle)
    where
        D: Detector + 'static,
    {
        let now = Instant::now();
        let (channels, detector_task) = spawn_detector(detector, settings.detector.request_queue);
        let scheduler = PtzScheduler::new(&settings.ptz, parts.ptz.capabilities());
        let (ptz, ptz_task) = spawn_ptz_dispatch(parts.ptz, settings.ptz.command_queue);
        let (commands, operator) = mpsc::channel(settings.station.operator_queue.max(1));

        let station = Self {
            context: ControlContext::new(
                settings.ptz.default_speed_modifier,
                settings.station.overlay_hold(),
            ),
            feed: FeedSource::new(parts.snapshot, parts.stream, &settings.feed),
            reconciler: FeedReconciler::new(&settings.reconcile),
            dispatcher: DetectionDispatcher::new(channels, &settings.detector, now),
            detector_task,
            scheduler,
            ptz,
            ptz_task,
            admin: parts.admin,
            recorder: SightingRecorder::new(&settings.records),
            alert_policy: AlertPolicy::new(settings.records.alert_cooldown()),
            alerts: parts.alerts,
            operator,
            overlay_name: settings.camera.overlay_name.clone(),
            snapshots_dir: settings.records.snapshots_dir.clone(),
            tick_interval: settings.station.tick_interval(),
            halt_grace: settings.station.halt_grace(),
        };
        (station, StationHandle { commands })
    }

    pub fn context(&self) -> &ControlContext {
        &self.context
    }

    /// Connects the stream and performs camera housekeeping. Failures are logged only.
    pub async fn start(&mut self) {
        self.feed.start().await;
        let Some(admin) = &self.admin else {
            return;
        };
        if let Err(e) = admin.set_overlay_name(&self.overlay_name).await {
            warn!("Could not set overlay name: {}", e);
        }
        if let Err(e) = admin.sync_clock().await {
            warn!("Could not sync camera clock: {}", e);
        }
        match admin.infrared().await {
            Ok(mode) => {
                info!(mode = mode.as_str(), "Infrared mode");
                self.context.infrared = Some(mode);
            }
            Err(e) => warn!("Could not read infrared mode: {}", e),
        }
    }

    fn send_ptz(&mut self, now: Instant, command: PtzCommand) {
        if !self.ptz.send(command) {
            self.scheduler.undelivered(command);
        } else if command.is_motion() {
            self.reconciler.notify_motion(now);
        }
    }

    fn apply(&mut self, now: Instant, command: OperatorCommand) {
        debug!(?command, "Operator command");
        match command {
            OperatorCommand::Axis {
                horizontal,
                vertical,
            } => {
                if let Some(horizontal) = horizontal {
                    self.context.intent.horizontal = horizontal;
                }
                if let Some(vertical) = vertical {
                    self.context.intent.vertical = vertical;
                }
            }
            OperatorCommand::Speed(speed) => self.context.intent.speed_modifier = speed,
            OperatorCommand::Zoom(direction) => match self.scheduler.zoom(direction) {
                Some(command) => self.send_ptz(now, command),
                None => {
                    self.context.intent.zoom_rate = match direction {
                        ZoomDirection::In => DIGITAL_ZOOM_RATE,
                        ZoomDirection::Out => -DIGITAL_ZOOM_RATE,
                    }
                }
            },
            OperatorCommand::Focus(direction) => match self.scheduler.focus(direction) {
                Some(command) => self.send_ptz(now, command),
                None => warn!("Camera has no focus control"),
            },
            OperatorCommand::Release => {
                self.context.intent.zoom_rate = 0.0;
                let capabilities = self.scheduler.capabilities();
                if capabilities.optical_zoom || capabilities.focus {
                    let stop = self.scheduler.release();
                    self.send_ptz(now, stop);
                }
            }
            OperatorCommand::ZoomRate(rate) => self.context.intent.zoom_rate = rate,
            OperatorCommand::GotoPreset(index) => self.send_ptz(now, PtzCommand::GotoPreset(index)),
            OperatorCommand::SetPreset(index) => {
                self.ptz.send(PtzCommand::SetPreset(index));
            }
            OperatorCommand::Home => self.send_ptz(now, PtzCommand::Home),
            OperatorCommand::ToggleDetection => {
                let active = self.dispatcher.toggle(now);
                info!(active, "Detection toggled");
            }
            OperatorCommand::ToggleRealtime => {
                let enabled = self.reconciler.toggle_realtime();
                info!(enabled, "Realtime snapshots toggled");
            }
            OperatorCommand::Snapshot => {
                let saving = self.feed.save_snapshot(&self.snapshots_dir);
                tokio::spawn(async move {
                    match saving.await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => warn!("Snapshot failed: {}", e),
                        Err(e) => warn!("Snapshot task failed: {}", e),
                    }
                });
            }
            OperatorCommand::CycleInfrared => self.cycle_infrared(),
            OperatorCommand::ToggleMute => {
                self.context.muted = !self.context.muted;
                info!(muted = self.context.muted, "Speech mute toggled");
            }
            OperatorCommand::Halt => {
                info!("Halt requested");
                self.context.halted = true;
            }
        }
    }

    fn cycle_infrared(&mut self) {
        let Some(admin) = self.admin.clone() else {
            warn!("Infrared control needs the CGI interface");
            return;
        };
        let mode = self
            .context
            .infrared
            .map(InfraredMode::next)
            .unwrap_or(InfraredMode::Open);
        self.context.infrared = Some(mode);
        tokio::spawn(async move {
            match admin.set_infrared(mode).await {
                Ok(()) => info!(mode = mode.as_str(), "Infrared mode set"),
                Err(e) => warn!("Could not set infrared mode: {}", e),
            }
        });
    }

    fn handle_detections(&mut self, now: Instant, outcome: DetectionOutcome) {
        let Some(timestamp) = outcome.timestamp else {
            return;
        };
        let counts = self.recorder.counts(&outcome.detections);
        let fired = self.alert_policy.evaluate(
            &outcome.detections,
            &counts,
            now,
            timestamp.hour(),
            self.context.muted,
        );
        for alert in &fired {
            self.alerts.play(alert);
        }

        if let Some(frame) = outcome.frame {
            let recorder = self.recorder.clone();
            let detections = outcome.detections.clone();
            tokio::spawn(async move {
                if let Err(e) = recorder.record(&detections, timestamp, frame.jpeg()).await {
                    error!("Failed to record sighting: {}", e);
                }
            });
        }
        self.context.show_detections(now, outcome.detections);
    }

    /// One pass of the control loop. Returns false once a halt was requested.
    pub async fn tick(&mut self, now: Instant) -> bool {
        while let Ok(command) = self.operator.try_recv() {
            self.apply(now, command);
        }
        if self.context.halted {
            return false;
        }

        let ptz = self.scheduler.tick(now, &mut self.context.intent);
        for command in ptz.commands {
            if !self.ptz.send(command) {
                self.scheduler.undelivered(command);
            }
        }
        if ptz.active {
            self.reconciler.notify_motion(now);
        }

        self.feed
            .set_snapshot_override(self.reconciler.realtime_override());
        let frame = self.feed.view(now).await;
        let newest = self.feed.newest_buffered();
        self.context.set_frame(frame, newest);

        let outcome = self.dispatcher.poll(now, &mut self.context).await;
        if !outcome.is_empty() {
            self.handle_detections(now, outcome);
        }
        self.context.expire_overlay(now);

        if let Some(outcome) = self.reconciler.tick(now, &mut self.feed).await {
            debug!(?outcome, "Feed reconciled");
        }
        true
    }

    /// Runs until halted, then shuts the workers down.
    pub async fn run(mut self) -> Result<(), AppError> {
        self.start().await;
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            tick_ms = self.tick_interval.as_millis() as u64,
            "Station running"
        );
        loop {
            interval.tick().await;
            if !self.tick(Instant::now()).await {
                break;
            }
        }
        self.shutdown().await;
        Ok(())
    }

    async fn shutdown(mut self) {
        info!("Shutting down");
        self.dispatcher.halt();
        self.feed.close().await;
        self.detector_task.join(self.halt_grace).await;

        drop(self.ptz);
        if tokio::time::timeout(self.halt_grace, &mut self.ptz_task)
            .await
            .is_err()
        {
            warn!("PTZ dispatch did not drain in time, aborting");
            self.ptz_task.abort();
        }
        info!("Station halted");
    }
}
