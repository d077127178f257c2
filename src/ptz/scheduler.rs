use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::PtzSettings;
use crate::ptz::command::{Direction, PtzCapabilities, PtzCommand, ZoomDirection};

pub const MAX_DIGITAL_ZOOM: f32 = 0.95;

/// Operator intent, held in the control context and consumed each tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PtzIntent {
    /// -1 left .. 1 right, discrete from keys or continuous from an analog source.
    pub horizontal: f32,
    /// -1 down .. 1 up.
    pub vertical: f32,
    pub speed_modifier: f32,
    /// Digital zoom change per second, only used without optical zoom.
    pub zoom_rate: f32,
    pub digital_zoom: f32,
}

impl PtzIntent {
    pub fn new(speed_modifier: f32) -> Self {
        Self {
            horizontal: 0.0,
            vertical: 0.0,
            speed_modifier,
            zoom_rate: 0.0,
            digital_zoom: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Pan,
    Tilt,
}

impl Axis {
    fn other(self) -> Self {
        match self {
            Axis::Pan => Axis::Tilt,
            Axis::Tilt => Axis::Pan,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Alternation {
    axis: Axis,
    flip_at: Instant,
}

#[derive(Debug, Default)]
pub struct PtzTick {
    pub commands: Vec<PtzCommand>,
    /// Any pan, tilt or zoom activity this tick.
    pub active: bool,
}

/// Turns continuous directional intent into discrete camera commands.
pub struct PtzScheduler {
    capabilities: PtzCapabilities,
    horizontal_deadzone: f32,
    vertical_deadzone: f32,
    squared_response: bool,
    speed_threshold: f32,
    alternation_period: Duration,
    min_speed: u8,
    max_speed: u8,
    zoom_speed: u8,
    moving: bool,
    zooming: bool,
    alternation: Option<Alternation>,
    flips: u32,
    last_issued: Option<PtzCommand>,
    last_tick: Option<Instant>,
}

impl PtzScheduler {
    pub fn new(settings: &PtzSettings, capabilities: PtzCapabilities) -> Self {
        let min_speed = settings.min_speed.max(1);
        Self {
            capabilities,
            horizontal_deadzone: settings.horizontal_deadzone.clamp(0.0, 0.99),
            vertical_deadzone: settings.vertical_deadzone.clamp(0.0, 0.99),
            squared_response: settings.squared_response,
            speed_threshold: settings.speed_threshold,
            alternation_period: settings.alternation_period(),
            min_speed,
            max_speed: settings.max_speed.max(min_speed),
            zoom_speed: settings.zoom_speed,
            moving: false,
            zooming: false,
            alternation: None,
            flips: 0,
            last_issued: None,
            last_tick: None,
        }
    }

    pub fn capabilities(&self) -> PtzCapabilities {
        self.capabilities
    }

    /// Number of pan/tilt alternation flips so far.
    pub fn flips(&self) -> u32 {
        self.flips
    }

    fn shape(&self, value: f32, deadzone: f32) -> f32 {
        let magnitude = ((value.abs().min(1.0) - deadzone).max(0.0)) / (1.0 - deadzone);
        let magnitude = if self.squared_response {
            magnitude * magnitude
        } else {
            magnitude
        };
        magnitude.copysign(value)
    }

    /// Maps a speed magnitude to the camera's integer range.
    fn hardware_speed(&self, magnitude: f32) -> u8 {
        let span = f32::from(self.max_speed - self.min_speed);
        let speed = (magnitude * span + f32::from(self.min_speed)).round();
        speed.clamp(f32::from(self.min_speed), f32::from(self.max_speed)) as u8
    }

    fn axis_command(&self, axis: Axis, hspeed: f32, vspeed: f32, boost: f32) -> PtzCommand {
        let (direction, magnitude) = match axis {
            Axis::Pan => (Direction::horizontal(hspeed), hspeed.abs()),
            Axis::Tilt => (Direction::vertical(vspeed), vspeed.abs()),
        };
        PtzCommand::Move {
            direction,
            speed: self.hardware_speed(magnitude * boost),
        }
    }

    fn alternating_axis(&mut self, now: Instant) -> Axis {
        match self.alternation {
            None => {
                self.alternation = Some(Alternation {
                    axis: Axis::Pan,
                    flip_at: now + self.alternation_period,
                });
                Axis::Pan
            }
            Some(mut alternation) => {
                if now >= alternation.flip_at {
                    alternation.axis = alternation.axis.other();
                    alternation.flip_at = now + self.alternation_period;
                    self.flips += 1;
                    debug!(axis = ?alternation.axis, "Alternating axis");
                }
                self.alternation = Some(alternation);
                alternation.axis
            }
        }
    }

    fn issue(&mut self, commands: &mut Vec<PtzCommand>, command: PtzCommand) {
        if self.last_issued != Some(command) {
            self.last_issued = Some(command);
            commands.push(command);
        }
    }

    pub fn tick(&mut self, now: Instant, intent: &mut PtzIntent) -> PtzTick {
        let mut tick = PtzTick::default();
        let hspeed = self.shape(intent.horizontal, self.horizontal_deadzone) * intent.speed_modifier;
        let vspeed = self.shape(intent.vertical, self.vertical_deadzone) * intent.speed_modifier;
        let panning = hspeed.abs() > self.speed_threshold;
        let tilting = vspeed.abs() > self.speed_threshold;

        match (panning, tilting) {
            (false, false) => {
                self.alternation = None;
                if self.moving {
                    self.moving = false;
                    self.last_issued = None;
                    tick.commands.push(PtzCommand::Stop);
                }
            }
            _ if self.capabilities.continuous_move => {
                self.alternation = None;
                self.moving = true;
                let command = PtzCommand::ContinuousMove {
                    pan: if panning { hspeed } else { 0.0 },
                    tilt: if tilting { vspeed } else { 0.0 },
                    zoom: 0.0,
                };
                self.issue(&mut tick.commands, command);
            }
            (true, true) => {
                self.moving = true;
                let axis = self.alternating_axis(now);
                let command = self.axis_command(axis, hspeed, vspeed, 2.0);
                self.issue(&mut tick.commands, command);
            }
            (true, false) | (false, true) => {
                self.alternation = None;
                self.moving = true;
                let axis = if panning { Axis::Pan } else { Axis::Tilt };
                let command = self.axis_command(axis, hspeed, vspeed, 1.0);
                self.issue(&mut tick.commands, command);
            }
        }

        let elapsed = self
            .last_tick
            .map(|last| now.saturating_duration_since(last))
            .unwrap_or_default();
        self.last_tick = Some(now);
        let zoom_rate = if intent.zoom_rate.is_finite() {
            intent.zoom_rate
        } else {
            0.0
        };
        if !self.capabilities.optical_zoom && zoom_rate != 0.0 {
            let zoom = intent.digital_zoom + zoom_rate * elapsed.as_secs_f32();
            if zoom.is_finite() {
                intent.digital_zoom = zoom.clamp(0.0, MAX_DIGITAL_ZOOM);
            }
        }

        tick.active = panning || tilting || self.zooming || zoom_rate != 0.0;
        tick
    }

    /// Zoom button pressed. `None` when zoom is digital and driven by `zoom_rate` instead.
    pub fn zoom(&mut self, direction: ZoomDirection) -> Option<PtzCommand> {
        if !self.capabilities.optical_zoom {
            return None;
        }
        self.zooming = true;
        self.last_issued = None;
        Some(PtzCommand::Zoom {
            direction,
            speed: self.zoom_speed,
        })
    }

    pub fn focus(&mut self, direction: ZoomDirection) -> Option<PtzCommand> {
        if !self.capabilities.focus {
            return None;
        }
        self.zooming = true;
        self.last_issued = None;
        Some(PtzCommand::Focus {
            direction,
            speed: self.zoom_speed,
        })
    }

    /// A command from this scheduler could not be queued. Arranges for the next tick to send
    /// it again: `Stop` until it lands, a move while the intent still asks for it.
    pub fn undelivered(&mut self, command: PtzCommand) {
        debug!(?command, "PTZ command undelivered, retrying");
        match command {
            PtzCommand::Stop => {
                self.moving = true;
                self.last_issued = None;
            }
            PtzCommand::Zoom { .. } | PtzCommand::Focus { .. } => self.zooming = false,
            _ if self.last_issued == Some(command) => self.last_issued = None,
            _ => {}
        }
    }

    /// Zoom or focus button released.
    pub fn release(&mut self) -> PtzCommand {
        self.zooming = false;
        self.last_issued = None;
        PtzCommand::Stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cgi_caps() -> PtzCapabilities {
        PtzCapabilities {
            continuous_move: false,
            optical_zoom: true,
            focus: true,
        }
    }

    fn scheduler(capabilities: PtzCapabilities) -> PtzScheduler {
        PtzScheduler::new(&PtzSettings::default(), capabilities)
    }

    fn ms(t0: Instant, ms: u64) -> Instant {
        t0 + Duration::from_millis(ms)
    }

    #[test]
    fn deadzone_swallows_small_input() {
        let mut scheduler = scheduler(cgi_caps());
        let mut intent = PtzIntent::new(1.0);
        intent.horizontal = 0.09;
        intent.vertical = -0.25;
        let tick = scheduler.tick(Instant::now(), &mut intent);
        assert!(tick.commands.is_empty());
        assert!(!tick.active);
    }

    #[test]
    fn single_axis_moves_then_stops_on_release() {
        let mut scheduler = scheduler(cgi_caps());
        let t0 = Instant::now();
        let mut intent = PtzIntent::new(0.1);
        intent.horizontal = -1.0;

        let tick = scheduler.tick(t0, &mut intent);
        assert!(tick.active);
        assert_eq!(
            tick.commands,
            vec![PtzCommand::Move {
                direction: Direction::Left,
                speed: 7
            }]
        );

        // holding the key does not repeat the command
        assert!(scheduler.tick(ms(t0, 33), &mut intent).commands.is_empty());

        intent.horizontal = 0.0;
        assert_eq!(scheduler.tick(ms(t0, 66), &mut intent).commands, vec![PtzCommand::Stop]);
        // stop is only sent on the falling edge
        assert!(scheduler.tick(ms(t0, 99), &mut intent).commands.is_empty());
    }

    #[test]
    fn diagonal_alternates_axes_every_period() {
        let mut scheduler = scheduler(cgi_caps());
        let t0 = Instant::now();
        let mut intent = PtzIntent::new(0.1);
        intent.horizontal = 1.0;
        intent.vertical = 1.0;

        let mut moves = Vec::new();
        for step in 0..=60 {
            for command in scheduler.tick(ms(t0, step * 10), &mut intent).commands {
                moves.push(command);
            }
        }
        intent.horizontal = 0.0;
        intent.vertical = 0.0;
        let released = scheduler.tick(ms(t0, 610), &mut intent);

        assert_eq!(scheduler.flips(), 2);
        assert_eq!(
            moves,
            vec![
                PtzCommand::Move { direction: Direction::Right, speed: 13 },
                PtzCommand::Move { direction: Direction::Up, speed: 13 },
                PtzCommand::Move { direction: Direction::Right, speed: 13 },
            ]
        );
        assert_eq!(released.commands, vec![PtzCommand::Stop]);
    }

    #[test]
    fn continuous_backend_moves_both_axes_at_once() {
        let mut scheduler = scheduler(PtzCapabilities {
            continuous_move: true,
            optical_zoom: true,
            focus: false,
        });
        let t0 = Instant::now();
        let mut intent = PtzIntent::new(0.5);
        intent.horizontal = 1.0;
        intent.vertical = -1.0;

        let first = scheduler.tick(t0, &mut intent);
        assert_eq!(
            first.commands,
            vec![PtzCommand::ContinuousMove {
                pan: 0.5,
                tilt: -0.5,
                zoom: 0.0
            }]
        );
        for step in 1..=60 {
            scheduler.tick(ms(t0, step * 10), &mut intent);
        }
        assert_eq!(scheduler.flips(), 0);
    }

    #[test]
    fn analog_input_is_squared_and_scaled() {
        let scheduler = scheduler(cgi_caps());
        // (0.55 - 0.1) / 0.9 = 0.5, squared 0.25
        assert!((scheduler.shape(0.55, 0.1) - 0.25).abs() < 1e-6);
        assert!((scheduler.shape(-0.55, 0.1) + 0.25).abs() < 1e-6);
        assert_eq!(scheduler.hardware_speed(1.0), 63);
        assert_eq!(scheduler.hardware_speed(0.0), 1);
        assert_eq!(scheduler.hardware_speed(3.0), 63);
    }

    #[test]
    fn digital_zoom_integrates_and_clamps() {
        let mut scheduler = scheduler(PtzCapabilities::default());
        let t0 = Instant::now();
        let mut intent = PtzIntent::new(0.1);
        intent.zoom_rate = 0.5;
        scheduler.tick(t0, &mut intent);
        let tick = scheduler.tick(ms(t0, 1000), &mut intent);
        assert!(tick.active);
        assert!((intent.digital_zoom - 0.5).abs() < 1e-4);

        scheduler.tick(ms(t0, 5000), &mut intent);
        assert_eq!(intent.digital_zoom, MAX_DIGITAL_ZOOM);

        intent.zoom_rate = -1.0;
        scheduler.tick(ms(t0, 7000), &mut intent);
        assert_eq!(intent.digital_zoom, 0.0);
    }

    #[test]
    fn non_finite_zoom_rate_leaves_digital_zoom_in_range() {
        let mut scheduler = scheduler(PtzCapabilities::default());
        let t0 = Instant::now();
        let mut intent = PtzIntent::new(0.1);
        intent.digital_zoom = 0.4;

        intent.zoom_rate = f32::INFINITY;
        scheduler.tick(t0, &mut intent);
        intent.zoom_rate = f32::NAN;
        let tick = scheduler.tick(ms(t0, 500), &mut intent);
        intent.zoom_rate = f32::NEG_INFINITY;
        scheduler.tick(ms(t0, 1000), &mut intent);

        assert!(!tick.active);
        assert_eq!(intent.digital_zoom, 0.4);

        intent.zoom_rate = f32::MAX;
        scheduler.tick(ms(t0, 2000), &mut intent);
        assert_eq!(intent.digital_zoom, MAX_DIGITAL_ZOOM);
    }

    #[test]
    fn undelivered_stop_is_sent_again() {
        let mut scheduler = scheduler(cgi_caps());
        let t0 = Instant::now();
        let mut intent = PtzIntent::new(0.1);
        intent.horizontal = 1.0;
        scheduler.tick(t0, &mut intent);

        intent.horizontal = 0.0;
        let tick = scheduler.tick(ms(t0, 33), &mut intent);
        assert_eq!(tick.commands, vec![PtzCommand::Stop]);
        scheduler.undelivered(PtzCommand::Stop);

        assert_eq!(scheduler.tick(ms(t0, 66), &mut intent).commands, vec![PtzCommand::Stop]);
        assert!(scheduler.tick(ms(t0, 99), &mut intent).commands.is_empty());
    }

    #[test]
    fn undelivered_move_is_reissued_while_still_wanted() {
        let mut scheduler = scheduler(cgi_caps());
        let t0 = Instant::now();
        let mut intent = PtzIntent::new(0.1);
        intent.vertical = 1.0;
        let up = PtzCommand::Move {
            direction: Direction::Up,
            speed: 7,
        };

        assert_eq!(scheduler.tick(t0, &mut intent).commands, vec![up]);
        scheduler.undelivered(up);
        assert_eq!(scheduler.tick(ms(t0, 33), &mut intent).commands, vec![up]);
        assert!(scheduler.tick(ms(t0, 66), &mut intent).commands.is_empty());

        // a stale move no longer matching the intent is not revived
        intent.vertical = -1.0;
        let down = scheduler.tick(ms(t0, 99), &mut intent).commands;
        scheduler.undelivered(up);
        assert!(scheduler.tick(ms(t0, 132), &mut intent).commands.is_empty());
        assert_eq!(
            down,
            vec![PtzCommand::Move {
                direction: Direction::Down,
                speed: 7
            }]
        );
    }

    #[test]
    fn undelivered_zoom_is_not_counted_as_activity() {
        let mut scheduler = scheduler(cgi_caps());
        let mut intent = PtzIntent::new(0.1);
        let zoom = scheduler.zoom(ZoomDirection::In).unwrap();
        scheduler.undelivered(zoom);
        assert!(!scheduler.tick(Instant::now(), &mut intent).active);
    }

    #[test]
    fn optical_zoom_is_one_shot_with_stop_on_release() {
        let mut scheduler = scheduler(cgi_caps());
        assert_eq!(
            scheduler.zoom(ZoomDirection::In),
            Some(PtzCommand::Zoom {
                direction: ZoomDirection::In,
                speed: 50
            })
        );
        let mut intent = PtzIntent::new(0.1);
        assert!(scheduler.tick(Instant::now(), &mut intent).active);
        assert_eq!(scheduler.release(), PtzCommand::Stop);
        assert!(!scheduler.tick(Instant::now(), &mut intent).active);

        let mut digital = PtzScheduler::new(&PtzSettings::default(), PtzCapabilities::default());
        assert_eq!(digital.zoom(ZoomDirection::Out), None);
        assert_eq!(digital.focus(ZoomDirection::Out), None);
    }
}
