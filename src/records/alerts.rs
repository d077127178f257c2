use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tracing::info;

use crate::detection::types::Detection;

/// Labels never announced by voice.
const SILENT_LABELS: [&str; 8] = [
    "chair",
    "cake",
    "fire hydrant",
    "bird",
    "frisbee",
    "bowl",
    "spoon",
    "car",
];
const SPEECH_CONFIDENCE: f32 = 0.9;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Alert {
    Chirp,
    Meow,
    Siren,
    Intruder,
    Speech(String),
}

/// Plays alerts; audio and speech synthesis live outside this crate.
pub trait AlertSink: Send + Sync {
    fn play(&self, alert: &Alert);
}

/// Default sink that only logs.
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn play(&self, alert: &Alert) {
        match alert {
            Alert::Speech(text) => info!(text = %text, "Speaking"),
            other => info!(alert = ?other, "Playing alert"),
        }
    }
}

fn is_night(hour: u32) -> bool {
    hour >= 21 || hour < 5
}

/// Decides which alerts a detection result earns, with a per-alert cooldown.
pub struct AlertPolicy {
    cooldown: Duration,
    next_allowed: HashMap<Alert, Instant>,
}

impl AlertPolicy {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            next_allowed: HashMap::new(),
        }
    }

    fn fire(&mut self, alert: Alert, now: Instant, fired: &mut Vec<Alert>) {
        let ready = self
            .next_allowed
            .get(&alert)
            .is_none_or(|next| now >= *next);
        if ready {
            self.next_allowed.insert(alert.clone(), now + self.cooldown);
            fired.push(alert);
        }
    }

    /// `counts` holds the confident label counts; `hour` is the local hour of the result.
    pub fn evaluate(
        &mut self,
        detections: &[Detection],
        counts: &BTreeMap<String, usize>,
        now: Instant,
        hour: u32,
        muted: bool,
    ) -> Vec<Alert> {
        let mut fired = Vec::new();
        if !muted {
            for detection in detections {
                if detection.confidence > SPEECH_CONFIDENCE
                    && !SILENT_LABELS.contains(&detection.label.as_str())
                {
                    let text = detection.label.replace("person", "intruder");
                    self.fire(Alert::Speech(text), now, &mut fired);
                }
            }
        }
        if counts.contains_key("bird") {
            self.fire(Alert::Chirp, now, &mut fired);
        }
        if counts.contains_key("cat") {
            self.fire(Alert::Meow, now, &mut fired);
        }
        if counts.contains_key("bear") && is_night(hour) {
            self.fire(Alert::Siren, now, &mut fired);
        }
        if counts.contains_key("person") {
            self.fire(Alert::Intruder, now, &mut fired);
        }
        fired
    }
}
