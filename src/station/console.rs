use std::str::FromStr;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::error::CommandParseError;
use crate::ptz::command::ZoomDirection;
use crate::station::StationHandle;

pub const SLOW_SPEED: f32 = 0.01;
pub const NORMAL_SPEED: f32 = 0.1;
pub const FAST_SPEED: f32 = 1.0;

/// Digital zoom rate applied while a zoom button is held on a camera without optical zoom.
pub const DIGITAL_ZOOM_RATE: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperatorCommand {
    /// Sets the pan/tilt intent, each in [-1, 1]. `None` leaves an axis unchanged.
    Axis {
        horizontal: Option<f32>,
        vertical: Option<f32>,
    },
    Speed(f32),
    Zoom(ZoomDirection),
    Focus(ZoomDirection),
    /// Zoom or focus button released.
    Release,
    ZoomRate(f32),
    GotoPreset(u8),
    SetPreset(u8),
    Home,
    ToggleDetection,
    ToggleRealtime,
    Snapshot,
    CycleInfrared,
    ToggleMute,
    Halt,
}

fn parse_axis_value(value: Option<&str>, name: &'static str) -> Result<f32, CommandParseError> {
    let value = value.ok_or(CommandParseError::MissingArgument(name))?;
    let parsed: f32 = value
        .parse()
        .map_err(|_| CommandParseError::InvalidArgument(value.to_string()))?;
    if !(-1.0..=1.0).contains(&parsed) {
        return Err(CommandParseError::InvalidArgument(value.to_string()));
    }
    Ok(parsed)
}

fn parse_preset(value: Option<&str>) -> Result<u8, CommandParseError> {
    let value = value.ok_or(CommandParseError::MissingArgument("preset"))?;
    match value.parse::<u8>() {
        Ok(index @ 1..=9) => Ok(index),
        _ => Err(CommandParseError::InvalidArgument(value.to_string())),
    }
}

fn parse_direction(value: Option<&str>, name: &'static str) -> Result<ZoomDirection, CommandParseError> {
    match value {
        Some("in") => Ok(ZoomDirection::In),
        Some("out") => Ok(ZoomDirection::Out),
        Some(other) => Err(CommandParseError::InvalidArgument(other.to_string())),
        None => Err(CommandParseError::MissingArgument(name)),
    }
}

impl FromStr for OperatorCommand {
    type Err = CommandParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let lowered = line.trim().to_lowercase();
        let mut words = lowered.split_whitespace();
        let command = words.next().ok_or(CommandParseError::Empty)?;
        let argument = words.next();

        let parsed = match command {
            "left" => OperatorCommand::Axis {
                horizontal: Some(-1.0),
                vertical: None,
            },
            "right" => OperatorCommand::Axis {
                horizontal: Some(1.0),
                vertical: None,
            },
            "up" => OperatorCommand::Axis {
                horizontal: None,
                vertical: Some(1.0),
            },
            "down" => OperatorCommand::Axis {
                horizontal: None,
                vertical: Some(-1.0),
            },
            "stop" => OperatorCommand::Axis {
                horizontal: Some(0.0),
                vertical: Some(0.0),
            },
            "pan" => OperatorCommand::Axis {
                horizontal: Some(parse_axis_value(argument, "pan")?),
                vertical: None,
            },
            "tilt" => OperatorCommand::Axis {
                horizontal: None,
                vertical: Some(parse_axis_value(argument, "tilt")?),
            },
            "axis" => OperatorCommand::Axis {
                horizontal: Some(parse_axis_value(argument, "axis")?),
                vertical: Some(parse_axis_value(words.next(), "axis")?),
            },
            "speed" => match argument {
                Some("slow") => OperatorCommand::Speed(SLOW_SPEED),
                Some("normal") => OperatorCommand::Speed(NORMAL_SPEED),
                Some("fast") => OperatorCommand::Speed(FAST_SPEED),
                Some(value) => match value.parse::<f32>() {
                    Ok(speed) if speed > 0.0 && speed <= 1.0 => OperatorCommand::Speed(speed),
                    _ => return Err(CommandParseError::InvalidArgument(value.to_string())),
                },
                None => return Err(CommandParseError::MissingArgument("speed")),
            },
            "zoom" => OperatorCommand::Zoom(parse_direction(argument, "zoom")?),
            "focus" => OperatorCommand::Focus(parse_direction(argument, "focus")?),
            "release" => OperatorCommand::Release,
            "zoomrate" => {
                let value = argument.ok_or(CommandParseError::MissingArgument("zoomrate"))?;
                match value.parse::<f32>() {
                    Ok(rate) if rate.is_finite() => OperatorCommand::ZoomRate(rate),
                    _ => return Err(CommandParseError::InvalidArgument(value.to_string())),
                }
            }
            "preset" => match argument {
                Some("set") => OperatorCommand::SetPreset(parse_preset(words.next())?),
                other => OperatorCommand::GotoPreset(parse_preset(other)?),
            },
            "home" => OperatorCommand::Home,
            "detect" => OperatorCommand::ToggleDetection,
            "realtime" => OperatorCommand::ToggleRealtime,
            "snapshot" => OperatorCommand::Snapshot,
            "ir" => OperatorCommand::CycleInfrared,
            "mute" => OperatorCommand::ToggleMute,
            "quit" | "exit" | "halt" => OperatorCommand::Halt,
            other => return Err(CommandParseError::Unknown(other.to_string())),
        };
        Ok(parsed)
    }
}

/// Reads operator commands line by line from stdin until EOF or halt.
pub async fn run_console(handle: StationHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("Console closed");
                break;
            }
            Err(e) => {
                warn!("Console read failed: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<OperatorCommand>() {
            Ok(command) => {
                if !handle.send(command).await || command == OperatorCommand::Halt {
                    break;
                }
            }
            Err(e) => warn!("{}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Result<OperatorCommand, CommandParseError> {
        line.parse()
    }

    #[test]
    fn parses_movement() {
        assert_eq!(
            parse("left").unwrap(),
            OperatorCommand::Axis {
                horizontal: Some(-1.0),
                vertical: None
            }
        );
        assert_eq!(
            parse("axis 0.5 -0.25").unwrap(),
            OperatorCommand::Axis {
                horizontal: Some(0.5),
                vertical: Some(-0.25)
            }
        );
        assert_eq!(
            parse("  STOP ").unwrap(),
            OperatorCommand::Axis {
                horizontal: Some(0.0),
                vertical: Some(0.0)
            }
        );
    }

    #[test]
    fn parses_speed_presets() {
        assert_eq!(parse("speed slow").unwrap(), OperatorCommand::Speed(0.01));
        assert_eq!(parse("speed fast").unwrap(), OperatorCommand::Speed(1.0));
        assert_eq!(parse("speed 0.3").unwrap(), OperatorCommand::Speed(0.3));
        assert_eq!(
            parse("speed 0"),
            Err(CommandParseError::InvalidArgument("0".into()))
        );
    }

    #[test]
    fn parses_presets() {
        assert_eq!(parse("preset 3").unwrap(), OperatorCommand::GotoPreset(3));
        assert_eq!(parse("preset set 9").unwrap(), OperatorCommand::SetPreset(9));
        assert!(parse("preset 0").is_err());
        assert_eq!(
            parse("preset"),
            Err(CommandParseError::MissingArgument("preset"))
        );
    }

    #[test]
    fn parses_toggles_and_zoom() {
        assert_eq!(parse("zoom in").unwrap(), OperatorCommand::Zoom(ZoomDirection::In));
        assert_eq!(parse("focus out").unwrap(), OperatorCommand::Focus(ZoomDirection::Out));
        assert_eq!(parse("ir").unwrap(), OperatorCommand::CycleInfrared);
        assert_eq!(parse("quit").unwrap(), OperatorCommand::Halt);
        assert!(parse("zoom sideways").is_err());
    }

    #[test]
    fn rejects_unknown_and_out_of_range() {
        assert_eq!(parse(""), Err(CommandParseError::Empty));
        assert_eq!(parse("dance"), Err(CommandParseError::Unknown("dance".into())));
        assert!(parse("pan 1.5").is_err());
        assert_eq!(parse("tilt"), Err(CommandParseError::MissingArgument("tilt")));
    }

    #[test]
    fn zoom_rate_must_be_finite() {
        assert_eq!(parse("zoomrate -0.25").unwrap(), OperatorCommand::ZoomRate(-0.25));
        for value in ["nan", "NaN", "inf", "-inf", "infinity"] {
            assert_eq!(
                parse(&format!("zoomrate {}", value)),
                Err(CommandParseError::InvalidArgument(value.into()))
            );
        }
        assert!(parse("pan nan").is_err());
        assert!(parse("speed inf").is_err());
    }
}
