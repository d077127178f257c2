use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use sha1::{Digest, Sha1};
use std::time::Duration;
use tracing::{debug, error};

use crate::config::CameraSettings;
use crate::error::CameraError;
use crate::ptz::command::{Direction, PtzBackend, PtzCapabilities, PtzCommand, ZoomDirection};

const SOAP_ENVELOPE_NS: &str = r#"xmlns:s="http://www.w3.org/2003/05/soap-envelope"
            xmlns:tptz="http://www.onvif.org/ver20/ptz/wsdl"
            xmlns:tt="http://www.onvif.org/ver10/schema""#;

/// ONVIF PTZ service with WS-Security UsernameToken digest auth.
pub struct OnvifPtz {
    endpoint: String,
    profile: String,
    username: String,
    password: String,
    client: Client,
}

impl OnvifPtz {
    pub fn new(settings: &CameraSettings) -> Result<Self, CameraError> {
        let endpoint = settings
            .onvif_endpoint
            .clone()
            .unwrap_or_else(|| format!("http://{}:2020/onvif/device_service", settings.address));
        Self::with_endpoint(
            &endpoint,
            &settings.onvif_profile,
            &settings.user,
            &settings.password,
            settings.request_timeout(),
        )
    }

    pub fn with_endpoint(
        endpoint: &str,
        profile: &str,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self, CameraError> {
        Ok(Self {
            endpoint: endpoint.to_string(),
            profile: profile.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            client: Client::builder().timeout(timeout).build()?,
        })
    }

    fn ptz_service_url(&self) -> String {
        if self.endpoint.contains("/onvif/device_service") {
            return self
                .endpoint
                .replace("/onvif/device_service", "/onvif/ptz_service");
        }
        let base = self.endpoint.trim_end_matches('/');
        match base.rfind('/') {
            Some(pos) if pos > "http://".len() => format!("{}/ptz_service", &base[..pos]),
            _ => format!("{}/onvif/ptz_service", base),
        }
    }

    /// `Base64(SHA1(nonce + created + password))`
    fn password_digest(nonce: &[u8], created: &str, password: &str) -> String {
        let mut hasher = Sha1::new();
        hasher.update(nonce);
        hasher.update(created.as_bytes());
        hasher.update(password.as_bytes());
        base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
    }

    fn security_header(&self) -> String {
        let nonce: [u8; 16] = rand::random();
        let created = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let digest = Self::password_digest(&nonce, &created, &self.password);
        let nonce = base64::engine::general_purpose::STANDARD.encode(nonce);
        format!(
            r#"<s:Header>
    <Security xmlns="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd" s:mustUnderstand="true">
      <UsernameToken>
        <Username>{}</Username>
        <Password Type="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordDigest">{}</Password>
        <Nonce EncodingType="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary">{}</Nonce>
        <Created xmlns="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd">{}</Created>
      </UsernameToken>
    </Security>
  </s:Header>"#,
            self.username, digest, nonce, created
        )
    }

    /// Body element and SOAP action name for a command.
    fn body_for(&self, command: &PtzCommand) -> Result<(String, &'static str), CameraError> {
        let profile = &self.profile;
        let body = match *command {
            PtzCommand::ContinuousMove { pan, tilt, zoom } => (
                continuous_move_body(profile, pan, tilt, zoom),
                "ContinuousMove",
            ),
            PtzCommand::Move { direction, speed } => {
                let velocity = f32::from(speed) / 63.0;
                let (pan, tilt) = match direction {
                    Direction::Left => (-velocity, 0.0),
                    Direction::Right => (velocity, 0.0),
                    Direction::Up => (0.0, velocity),
                    Direction::Down => (0.0, -velocity),
                };
                (continuous_move_body(profile, pan, tilt, 0.0), "ContinuousMove")
            }
            PtzCommand::Zoom { direction, speed } => {
                let velocity = f32::from(speed) / 63.0;
                let zoom = match direction {
                    ZoomDirection::In => velocity,
                    ZoomDirection::Out => -velocity,
                };
                (continuous_move_body(profile, 0.0, 0.0, zoom), "ContinuousMove")
            }
            PtzCommand::Focus { .. } => return Err(CameraError::Unsupported("focus")),
            PtzCommand::Stop => (
                format!(
                    "<tptz:Stop><tptz:ProfileToken>{profile}</tptz:ProfileToken><tptz:PanTilt>true</tptz:PanTilt><tptz:Zoom>true</tptz:Zoom></tptz:Stop>"
                ),
                "Stop",
            ),
            PtzCommand::Home => (
                format!(
                    "<tptz:GotoHomePosition><tptz:ProfileToken>{profile}</tptz:ProfileToken></tptz:GotoHomePosition>"
                ),
                "GotoHomePosition",
            ),
            PtzCommand::GotoPreset(index) => (
                format!(
                    "<tptz:GotoPreset><tptz:ProfileToken>{profile}</tptz:ProfileToken><tptz:PresetToken>{index}</tptz:PresetToken></tptz:GotoPreset>"
                ),
                "GotoPreset",
            ),
            PtzCommand::SetPreset(index) => (
                format!(
                    "<tptz:SetPreset><tptz:ProfileToken>{profile}</tptz:ProfileToken><tptz:PresetToken>{index}</tptz:PresetToken></tptz:SetPreset>"
                ),
                "SetPreset",
            ),
        };
        Ok(body)
    }

    fn envelope(&self, body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope {}>
  {}
  <s:Body>
    {}
  </s:Body>
</s:Envelope>"#,
            SOAP_ENVELOPE_NS,
            self.security_header(),
            body
        )
    }

    async fn send(&self, body: &str, action: &str) -> Result<(), CameraError> {
        let url = self.ptz_service_url();
        debug!(url = %url, action, "Sending ONVIF PTZ request");
        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/soap+xml; charset=utf-8")
            .body(self.envelope(body))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "ONVIF PTZ request failed");
            return Err(CameraError::Status {
                action: action.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

fn continuous_move_body(profile: &str, pan: f32, tilt: f32, zoom: f32) -> String {
    format!(
        r#"<tptz:ContinuousMove><tptz:ProfileToken>{}</tptz:ProfileToken><tptz:Velocity><tt:PanTilt x="{:.2}" y="{:.2}"/><tt:Zoom x="{:.2}"/></tptz:Velocity></tptz:ContinuousMove>"#,
        profile,
        pan.clamp(-1.0, 1.0),
        tilt.clamp(-1.0, 1.0),
        zoom.clamp(-1.0, 1.0)
    )
}

#[async_trait]
impl PtzBackend for OnvifPtz {
    fn capabilities(&self) -> PtzCapabilities {
        PtzCapabilities {
            continuous_move: true,
            optical_zoom: true,
            focus: false,
        }
    }

    async fn execute(&self, command: &PtzCommand) -> Result<(), CameraError> {
        let (body, action) = self.body_for(command)?;
        self.send(&body, action).await
    }
}
