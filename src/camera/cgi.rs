use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::camera::source::{CameraAdmin, InfraredMode, SnapshotQuality, SnapshotSource};
use crate::config::CameraSettings;
use crate::error::CameraError;
use crate::ptz::command::{Direction, PtzBackend, PtzCapabilities, PtzCommand, ZoomDirection};

/// Speeds at or above this are sent as 0, which the firmware treats as fastest.
const FASTEST_SPEED_FLOOR: u8 = 62;

/// HTTP CGI control surface of hi3510-based cameras.
pub struct CgiCamera {
    base_url: String,
    user: String,
    password: String,
    client: Client,
}

impl CgiCamera {
    pub fn new(settings: &CameraSettings) -> Result<Self, CameraError> {
        Self::with_timeout(
            &settings.address,
            &settings.user,
            &settings.password,
            settings.request_timeout(),
        )
    }

    pub fn with_timeout(
        address: &str,
        user: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self, CameraError> {
        let base_url = if address.starts_with("http://") || address.starts_with("https://") {
            address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", address.trim_end_matches('/'))
        };
        Ok(Self {
            base_url,
            user: user.to_string(),
            password: password.to_string(),
            client: Client::builder().timeout(timeout).build()?,
        })
    }

    fn ptz_url(&self, action: &str, speed: u8) -> String {
        let speed = if speed >= FASTEST_SPEED_FLOOR { 0 } else { speed };
        format!(
            "{}/cgi-bin/hi3510/ptzctrl.cgi?-step=0&-act={}&-speed={}",
            self.base_url, action, speed
        )
    }

    fn preset_url(&self, command: &PtzCommand) -> Option<String> {
        match command {
            PtzCommand::GotoPreset(index) => Some(format!(
                "{}/cgi-bin/hi3510/preset.cgi?-act=goto&-number={}",
                self.base_url, index
            )),
            PtzCommand::SetPreset(index) => Some(format!(
                "{}/cgi-bin/hi3510/preset.cgi?-act=set&-status=1&-number={}",
                self.base_url, index
            )),
            _ => None,
        }
    }

    fn command_url(&self, command: &PtzCommand) -> Result<String, CameraError> {
        let url = match *command {
            PtzCommand::Move { direction, speed } => {
                let action = match direction {
                    Direction::Left => "left",
                    Direction::Right => "right",
                    Direction::Up => "up",
                    Direction::Down => "down",
                };
                self.ptz_url(action, speed)
            }
            PtzCommand::Stop => self.ptz_url("stop", 1),
            PtzCommand::Home => self.ptz_url("home", 1),
            PtzCommand::Zoom { direction, speed } => match direction {
                ZoomDirection::In => self.ptz_url("zoomin", speed),
                ZoomDirection::Out => self.ptz_url("zoomout", speed),
            },
            PtzCommand::Focus { direction, speed } => match direction {
                ZoomDirection::In => self.ptz_url("focusin", speed),
                ZoomDirection::Out => self.ptz_url("focusout", speed),
            },
            PtzCommand::GotoPreset(_) | PtzCommand::SetPreset(_) => self
                .preset_url(command)
                .ok_or(CameraError::Unsupported("preset"))?,
            PtzCommand::ContinuousMove { .. } => {
                return Err(CameraError::Unsupported("continuous move"));
            }
        };
        Ok(url)
    }

    async fn get(&self, action: &str, url: &str) -> Result<reqwest::Response, CameraError> {
        debug!(action, url, "Sending CGI request");
        let response = self
            .client
            .get(url)
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CameraError::Status {
                action: action.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

/// Extracts the value from a `var infraredstat="auto";` style reply.
fn parse_infrared_reply(body: &str) -> Result<InfraredMode, CameraError> {
    let value = body
        .trim()
        .rsplit('=')
        .next()
        .unwrap_or_default()
        .trim_end_matches(';')
        .trim_matches('"');
    InfraredMode::parse(value).ok_or_else(|| CameraError::InvalidResponse(body.trim().to_string()))
}

/// Percent-encodes everything outside the unreserved URL set.
fn encode_query_value(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            other => format!("%{:02X}", other),
        })
        .collect()
}

#[async_trait]
impl SnapshotSource for CgiCamera {
    async fn snapshot(&self, quality: SnapshotQuality) -> Result<Bytes, CameraError> {
        let name = match quality {
            SnapshotQuality::Low => "auto",
            SnapshotQuality::High => "snap",
        };
        let url = format!("{}/tmpfs/{}.jpg", self.base_url, name);
        Ok(self.get("snapshot", &url).await?.bytes().await?)
    }
}

#[async_trait]
impl PtzBackend for CgiCamera {
    fn capabilities(&self) -> PtzCapabilities {
        PtzCapabilities {
            continuous_move: false,
            optical_zoom: true,
            focus: true,
        }
    }

    async fn execute(&self, command: &PtzCommand) -> Result<(), CameraError> {
        let url = self.command_url(command)?;
        self.get("ptz", &url).await?;
        Ok(())
    }
}

#[async_trait]
impl CameraAdmin for CgiCamera {
    async fn infrared(&self) -> Result<InfraredMode, CameraError> {
        let url = format!("{}/cgi-bin/hi3510/param.cgi?cmd=getinfrared", self.base_url);
        let body = self.get("getinfrared", &url).await?.text().await?;
        parse_infrared_reply(&body)
    }

    async fn set_infrared(&self, mode: InfraredMode) -> Result<(), CameraError> {
        let url = format!(
            "{}/cgi-bin/hi3510/param.cgi?cmd=setinfrared&-infraredstat={}",
            self.base_url,
            mode.as_str()
        );
        self.get("setinfrared", &url).await?;
        Ok(())
    }

    async fn set_overlay_name(&self, name: &str) -> Result<(), CameraError> {
        let url = format!(
            "{}/web/cgi-bin/hi3510/param.cgi?cmd=setoverlayattr&-region=1&-show=1&-name={}",
            self.base_url,
            encode_query_value(name)
        );
        self.get("setoverlayattr", &url).await?;
        Ok(())
    }

    async fn sync_clock(&self) -> Result<(), CameraError> {
        let now = chrono::Local::now().format("%Y.%m.%d.%H.%M.%S");
        let url = format!(
            "{}/web/cgi-bin/hi3510/param.cgi?cmd=setservertime&-time={}",
            self.base_url, now
        );
        self.get("setservertime", &url).await?;
        Ok(())
    }
}
