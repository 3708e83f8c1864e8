//! WPPConnect Server client.
//!
//! Drives a WhatsApp Web session hosted by a WPPConnect Server instance over
//! its REST API: token generation, session start with QR pairing, group join,
//! chat listing and message sends.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::qr::{render_ascii, QrCode, QrSink};
use crate::session::{Chat, MessagingSession, SessionProvider};

const GROUP_SUFFIX: &str = "@g.us";

/// WPPConnect Server client for one session.
#[derive(Debug, Clone)]
pub struct WppConnectClient {
    http: Client,
    base_url: String,
    session: String,
    secret_key: Option<String>,
    token: Option<String>,
    poll_interval: Duration,
    connect_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionStatus {
    pub status: String,
    #[serde(default)]
    pub qrcode: Option<String>,
    #[serde(default)]
    pub urlcode: Option<String>,
}

impl SessionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self.status.as_str(), "CONNECTED" | "inChat" | "isLogged")
    }

    pub fn is_closed(&self) -> bool {
        self.status == "CLOSED"
    }
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    response: Vec<T>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartSessionRequest {
    wait_qr_code: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JoinRequest<'a> {
    invite_code: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageRequest<'a> {
    phone: &'a str,
    is_group: bool,
    message: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendImageRequest<'a> {
    phone: &'a str,
    is_group: bool,
    filename: &'a str,
    caption: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    base64: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<&'a str>,
}

impl WppConnectClient {
    /// Create client for a session on the given server.
    pub fn new(base_url: &str, session: &str, request_timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent("deal_relay/0.1.0")
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::InvalidArgument(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            session: session.to_string(),
            secret_key: None,
            token: None,
            poll_interval: Duration::from_secs(crate::config::POLL_INTERVAL_SECS),
            connect_timeout: Duration::from_secs(crate::config::CONNECT_TIMEOUT_SECS),
        })
    }

    /// Create client from relay configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut client = Self::new(
            &config.wpp_base_url,
            &config.session_name,
            config.request_timeout,
        )?
        .with_polling(config.poll_interval, config.connect_timeout);
        client.secret_key = config.secret_key.clone();
        client.token = config.token.clone();
        Ok(client)
    }

    pub fn with_secret_key(mut self, secret_key: impl Into<String>) -> Self {
        self.secret_key = Some(secret_key.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_polling(mut self, interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = interval;
        self.connect_timeout = timeout;
        self
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/api/{}/{}", self.base_url, self.session, endpoint)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check(op: &str, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::Provider(format!(
            "{} failed ({}): {}",
            op,
            status.as_u16(),
            body
        )))
    }

    /// Exchange the server secret key for a bearer token.
    pub async fn generate_token(&self) -> Result<String> {
        let secret = self
            .secret_key
            .as_deref()
            .ok_or_else(|| Error::Config("WPPConnect secret key not configured".to_string()))?;

        let response = self
            .http
            .post(format!(
                "{}/api/{}/{}/generate-token",
                self.base_url, self.session, secret
            ))
            .send()
            .await?;
        let body: TokenResponse = Self::check("generate-token", response).await?.json().await?;
        Ok(body.token)
    }

    /// Client carrying a usable token: the configured one, or a freshly generated one.
    async fn authenticated(&self) -> Result<Self> {
        if self.secret_key.is_some() {
            let token = self.generate_token().await?;
            return Ok(self.clone().with_token(token));
        }
        if self.token.is_none() {
            return Err(Error::Config(
                "either a WPPConnect secret key or a token is required".to_string(),
            ));
        }
        Ok(self.clone())
    }

    pub async fn start_session(&self) -> Result<()> {
        let response = self
            .authorized(self.http.post(self.url("start-session")))
            .json(&StartSessionRequest { wait_qr_code: true })
            .send()
            .await?;
        Self::check("start-session", response).await?;
        Ok(())
    }

    pub async fn status(&self) -> Result<SessionStatus> {
        let response = self
            .authorized(self.http.get(self.url("status-session")))
            .send()
            .await?;
        Ok(Self::check("status-session", response).await?.json().await?)
    }

    fn qr_code(status: &SessionStatus, image: &str) -> QrCode {
        let ascii = status
            .urlcode
            .as_deref()
            .map(|content| {
                render_ascii(content).unwrap_or_else(|e| {
                    warn!(error = %e, "Cannot render QR code as text");
                    String::new()
                })
            })
            .unwrap_or_default();
        QrCode {
            base64_image: image.to_string(),
            ascii,
        }
    }

    /// Poll the session until it is connected, reporting each new QR code.
    async fn wait_connected(&self, sink: &dyn QrSink) -> Result<()> {
        let deadline = Instant::now() + self.connect_timeout;
        let mut last_qr: Option<String> = None;

        loop {
            let status = self.status().await?;
            debug!(status = %status.status, "WPPConnect session status");

            if status.is_connected() {
                return Ok(());
            }
            if status.is_closed() {
                info!(session = %self.session, "Session closed, starting it again");
                self.start_session().await?;
            }
            if let Some(image) = status.qrcode.as_deref().filter(|q| !q.is_empty()) {
                if last_qr.as_deref() != Some(image) {
                    sink.on_qr(&Self::qr_code(&status, image));
                    last_qr = Some(image.to_string());
                }
            }

            if Instant::now() >= deadline {
                return Err(Error::Timeout(format!(
                    "session '{}' not connected after {}s (last status {})",
                    self.session,
                    self.connect_timeout.as_secs(),
                    status.status
                )));
            }
            sleep(self.poll_interval).await;
        }
    }
}

/// Provider-assigned id from a join result: a string, `{id: ...}` or `{id: {_serialized}}`.
fn extract_group_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(map) => match map.get("id").or_else(|| map.get("gid"))? {
            Value::String(s) => Some(s.clone()),
            Value::Object(wid) => wid
                .get("_serialized")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        },
        _ => None,
    }
}

/// The REST API appends the group suffix itself when `isGroup` is set.
fn group_phone(chat_id: &str) -> &str {
    chat_id.strip_suffix(GROUP_SUFFIX).unwrap_or(chat_id)
}

#[async_trait]
impl SessionProvider for WppConnectClient {
    async fn connect(&self, sink: &dyn QrSink) -> Result<Arc<dyn MessagingSession>> {
        let client = self.authenticated().await?;
        info!(session = %client.session, url = %client.base_url, "Starting WhatsApp session");
        client.start_session().await?;
        client.wait_connected(sink).await?;
        info!(session = %client.session, "WhatsApp client connected");
        Ok(Arc::new(client))
    }
}

#[async_trait]
impl MessagingSession for WppConnectClient {
    async fn join_group(&self, invite_code: &str) -> Result<Option<String>> {
        let response = self
            .authorized(self.http.post(self.url("join-code")))
            .json(&JoinRequest { invite_code })
            .send()
            .await?;
        let body: Value = Self::check("join-code", response).await?.json().await?;
        Ok(body.get("response").and_then(extract_group_id))
    }

    async fn list_chats(&self) -> Result<Vec<Chat>> {
        let response = self
            .authorized(self.http.get(self.url("all-chats")))
            .send()
            .await?;
        let body: ListResponse<Chat> = Self::check("all-chats", response).await?.json().await?;
        Ok(body.response)
    }

    async fn send_text(&self, chat_id: &str, text: &str) -> Result<()> {
        let response = self
            .authorized(self.http.post(self.url("send-message")))
            .json(&SendMessageRequest {
                phone: group_phone(chat_id),
                is_group: true,
                message: text,
            })
            .send()
            .await?;
        Self::check("send-message", response).await?;
        Ok(())
    }

    async fn send_image(
        &self,
        chat_id: &str,
        image: &str,
        filename: &str,
        caption: &str,
    ) -> Result<()> {
        let is_data_uri = image.starts_with("data:");
        let response = self
            .authorized(self.http.post(self.url("send-image")))
            .json(&SendImageRequest {
                phone: group_phone(chat_id),
                is_group: true,
                filename,
                caption,
                base64: is_data_uri.then_some(image),
                path: (!is_data_uri).then_some(image),
            })
            .send()
            .await?;
        Self::check("send-image", response).await?;
        Ok(())
    }
}
