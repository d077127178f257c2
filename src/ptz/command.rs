use async_trait::async_trait;

use crate::error::CameraError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
}

impl Direction {
    /// Direction for a signed pan speed.
    pub fn horizontal(speed: f32) -> Self {
        if speed < 0.0 {
            Direction::Left
        } else {
            Direction::Right
        }
    }

    /// Direction for a signed tilt speed, positive is up.
    pub fn vertical(speed: f32) -> Self {
        if speed < 0.0 {
            Direction::Down
        } else {
            Direction::Up
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoomDirection {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PtzCommand {
    Move { direction: Direction, speed: u8 },
    Stop,
    Zoom { direction: ZoomDirection, speed: u8 },
    Focus { direction: ZoomDirection, speed: u8 },
    Home,
    /// Simultaneous velocities in [-1, 1], only issued to backends that support it.
    ContinuousMove { pan: f32, tilt: f32, zoom: f32 },
    GotoPreset(u8),
    SetPreset(u8),
}

impl PtzCommand {
    pub fn is_motion(&self) -> bool {
        !matches!(self, PtzCommand::Stop | PtzCommand::SetPreset(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PtzCapabilities {
    pub continuous_move: bool,
    pub optical_zoom: bool,
    pub focus: bool,
}

/// A camera control surface able to carry out PTZ commands.
#[async_trait]
pub trait PtzBackend: Send + Sync {
    fn capabilities(&self) -> PtzCapabilities;

    async fn execute(&self, command: &PtzCommand) -> Result<(), CameraError>;
}
