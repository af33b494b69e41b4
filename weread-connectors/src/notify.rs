//! Push Notification Channels
//!
//! Delivers session reports to push services: PushPlus, Telegram, WxPusher,
//! Bark, ntfy, Feishu, WeWork, DingTalk and Gotify.
//!
//! Each channel turns a notification into one HTTP request; the
//! [`NotificationHub`] fans a notification out to every enabled channel.
//!
//! # Configuration
//!
//! Channels are tagged by `name` with their settings inline:
//!
//! ```json
//! { "name": "bark", "enabled": true, "server": "https://api.day.app", "device_key": "..." }
//! ```

use async_trait::async_trait;
use reqwest::{Client, Method, Proxy};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{error, info, warn};

use weread_domain::ValueRange;
use weread_engine::percent_encode;
use weread_exec::{ExecError, Notification, NotificationSink};

// =============================================================================
// Constants
// =============================================================================

/// Request timeout for push services
const NOTIFY_TIMEOUT_SECS: u64 = 10;

/// Telegram is often reached through a proxy, so it gets more time
const TELEGRAM_TIMEOUT_SECS: u64 = 30;

/// Delivery attempts per channel
const MAX_ATTEMPTS: u32 = 3;

/// Link target for channels that render a card
const WEREAD_HOME: &str = "https://weread.qq.com";

/// Characters kept in card previews
const PREVIEW_CHARS: usize = 200;

// =============================================================================
// Errors
// =============================================================================

/// Errors that can occur while delivering a notification.
#[derive(Debug, Clone, Error)]
pub enum NotifyError {
    /// HTTP request failed
    #[error("{channel}: HTTP request failed: {reason}")]
    RequestFailed {
        /// Channel name
        channel: &'static str,
        /// Failure detail
        reason: String,
    },

    /// Request timed out
    #[error("{0}: request timed out")]
    Timeout(&'static str),

    /// Channel settings are unusable
    #[error("{channel}: invalid settings: {reason}")]
    InvalidSettings {
        /// Channel name
        channel: &'static str,
        /// Failure detail
        reason: String,
    },
}

// =============================================================================
// Channel Definitions
// =============================================================================

/// Feishu message layout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeishuFormat {
    /// Plain text
    #[default]
    Text,
    /// Post with title
    RichText,
}

/// WeWork (WeChat Work) message layout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeWorkFormat {
    /// Plain text
    #[default]
    Text,
    /// Markdown
    Markdown,
    /// News card linking to WeRead
    News,
}

/// DingTalk message layout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DingTalkFormat {
    /// Plain text
    #[default]
    Text,
    /// Markdown
    Markdown,
    /// Link card to WeRead
    Link,
}

/// Public Bark server
pub const DEFAULT_BARK_SERVER: &str = "https://api.day.app";

/// Public ntfy server
pub const DEFAULT_NTFY_SERVER: &str = "https://ntfy.sh";

fn default_bark_server() -> String {
    DEFAULT_BARK_SERVER.to_string()
}

fn default_ntfy_server() -> String {
    DEFAULT_NTFY_SERVER.to_string()
}

fn default_gotify_priority() -> u8 {
    5
}

/// A push service and its settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "lowercase")]
pub enum Channel {
    /// pushplus.plus
    PushPlus {
        /// User token
        token: String,
    },
    /// Telegram bot API
    Telegram {
        /// Bot token
        bot_token: String,
        /// Target chat
        chat_id: String,
        /// Optional proxy URL for reaching the bot API
        #[serde(default)]
        proxy: Option<String>,
    },
    /// WxPusher simple push token
    WxPusher {
        /// Simple push token
        spt: String,
    },
    /// Bark (iOS)
    Bark {
        /// Bark server
        #[serde(default = "default_bark_server")]
        server: String,
        /// Device key
        device_key: String,
        /// Optional notification sound
        #[serde(default)]
        sound: Option<String>,
    },
    /// ntfy topic
    Ntfy {
        /// ntfy server
        #[serde(default = "default_ntfy_server")]
        server: String,
        /// Topic name
        topic: String,
        /// Optional access token
        #[serde(default)]
        token: Option<String>,
    },
    /// Feishu group bot webhook
    Feishu {
        /// Webhook URL
        webhook_url: String,
        /// Message layout
        #[serde(default)]
        msg_type: FeishuFormat,
    },
    /// WeWork group bot webhook
    WeWork {
        /// Webhook URL
        webhook_url: String,
        /// Message layout
        #[serde(default)]
        msg_type: WeWorkFormat,
    },
    /// DingTalk group bot webhook
    DingTalk {
        /// Webhook URL
        webhook_url: String,
        /// Message layout
        #[serde(default)]
        msg_type: DingTalkFormat,
    },
    /// Self-hosted Gotify
    Gotify {
        /// Gotify server
        server: String,
        /// Application token
        token: String,
        /// Message priority
        #[serde(default = "default_gotify_priority")]
        priority: u8,
        /// Title override
        #[serde(default)]
        title: Option<String>,
    },
}

/// Body of a channel request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// No body
    Empty,
    /// JSON document
    Json(Value),
    /// UTF-8 plain text
    Text(String),
}

/// One HTTP request that delivers a notification.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRequest {
    /// HTTP method
    pub method: Method,
    /// Target URL
    pub url: String,
    /// Extra headers
    pub headers: Vec<(&'static str, String)>,
    /// Request body
    pub body: RequestBody,
}

impl ChannelRequest {
    fn post_json(url: String, body: Value) -> Self {
        Self {
            method: Method::POST,
            url,
            headers: Vec::new(),
            body: RequestBody::Json(body),
        }
    }
}

fn preview(message: &str) -> String {
    if message.chars().count() > PREVIEW_CHARS {
        let head: String = message.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        message.to_string()
    }
}

impl Channel {
    /// Channel name used in logs and config.
    pub fn name(&self) -> &'static str {
        match self {
            Channel::PushPlus { .. } => "pushplus",
            Channel::Telegram { .. } => "telegram",
            Channel::WxPusher { .. } => "wxpusher",
            Channel::Bark { .. } => "bark",
            Channel::Ntfy { .. } => "ntfy",
            Channel::Feishu { .. } => "feishu",
            Channel::WeWork { .. } => "wework",
            Channel::DingTalk { .. } => "dingtalk",
            Channel::Gotify { .. } => "gotify",
        }
    }

    /// Check required settings are present.
    pub fn validate(&self) -> Result<(), NotifyError> {
        let required: Vec<(&str, &String)> = match self {
            Channel::PushPlus { token } => vec![("token", token)],
            Channel::Telegram {
                bot_token, chat_id, ..
            } => vec![("bot_token", bot_token), ("chat_id", chat_id)],
            Channel::WxPusher { spt } => vec![("spt", spt)],
            Channel::Bark {
                server, device_key, ..
            } => vec![("server", server), ("device_key", device_key)],
            Channel::Ntfy { server, topic, .. } => vec![("server", server), ("topic", topic)],
            Channel::Feishu { webhook_url, .. }
            | Channel::WeWork { webhook_url, .. }
            | Channel::DingTalk { webhook_url, .. } => vec![("webhook_url", webhook_url)],
            Channel::Gotify { server, token, .. } => vec![("server", server), ("token", token)],
        };

        match required.into_iter().find(|(_, value)| value.trim().is_empty()) {
            Some((field, _)) => Err(NotifyError::InvalidSettings {
                channel: self.name(),
                reason: format!("{} is required", field),
            }),
            None => Ok(()),
        }
    }

    /// Build the request delivering `message` under `title`.
    pub fn request(&self, title: &str, message: &str) -> ChannelRequest {
        let titled = format!("{}\n\n{}", title, message);

        match self {
            Channel::PushPlus { token } => ChannelRequest::post_json(
                "https://www.pushplus.plus/send".to_string(),
                json!({ "token": token, "title": title, "content": message }),
            ),
            Channel::Telegram {
                bot_token, chat_id, ..
            } => ChannelRequest::post_json(
                format!("https://api.telegram.org/bot{}/sendMessage", bot_token),
                json!({ "chat_id": chat_id, "text": message }),
            ),
            Channel::WxPusher { spt } => ChannelRequest {
                method: Method::GET,
                url: format!(
                    "https://wxpusher.zjiecode.com/api/send/message/{}/{}",
                    spt,
                    percent_encode(message)
                ),
                headers: Vec::new(),
                body: RequestBody::Empty,
            },
            Channel::Bark {
                server,
                device_key,
                sound,
            } => {
                let mut body = json!({ "title": title, "body": message });
                if let Some(sound) = sound {
                    body["sound"] = json!(sound);
                }
                ChannelRequest::post_json(
                    format!("{}/{}", server.trim_end_matches('/'), device_key),
                    body,
                )
            }
            Channel::Ntfy {
                server,
                topic,
                token,
            } => {
                let mut headers = vec![
                    ("Content-Type", "text/plain; charset=utf-8".to_string()),
                    ("Title", title.to_string()),
                ];
                if let Some(token) = token {
                    headers.push(("Authorization", format!("Bearer {}", token)));
                }
                ChannelRequest {
                    method: Method::POST,
                    url: format!("{}/{}", server.trim_end_matches('/'), topic),
                    headers,
                    body: RequestBody::Text(message.to_string()),
                }
            }
            Channel::Feishu {
                webhook_url,
                msg_type,
            } => {
                let body = match msg_type {
                    FeishuFormat::RichText => json!({
                        "msg_type": "post",
                        "content": { "post": { "zh_cn": {
                            "title": title,
                            "content": [[{ "tag": "text", "text": message }]]
                        }}}
                    }),
                    FeishuFormat::Text => json!({
                        "msg_type": "text",
                        "content": { "text": titled }
                    }),
                };
                ChannelRequest::post_json(webhook_url.clone(), body)
            }
            Channel::WeWork {
                webhook_url,
                msg_type,
            } => {
                let body = match msg_type {
                    WeWorkFormat::Markdown => json!({
                        "msgtype": "markdown",
                        "markdown": { "content": format!("## {}\n\n{}", title, message) }
                    }),
                    WeWorkFormat::News => json!({
                        "msgtype": "news",
                        "news": { "articles": [{
                            "title": title,
                            "description": preview(message),
                            "url": WEREAD_HOME
                        }]}
                    }),
                    WeWorkFormat::Text => json!({
                        "msgtype": "text",
                        "text": { "content": titled }
                    }),
                };
                ChannelRequest::post_json(webhook_url.clone(), body)
            }
            Channel::DingTalk {
                webhook_url,
                msg_type,
            } => {
                let body = match msg_type {
                    DingTalkFormat::Markdown => json!({
                        "msgtype": "markdown",
                        "markdown": {
                            "title": title,
                            "text": format!("## {}\n\n{}", title, message)
                        }
                    }),
                    DingTalkFormat::Link => json!({
                        "msgtype": "link",
                        "link": {
                            "text": preview(message),
                            "title": title,
                            "messageUrl": WEREAD_HOME
                        }
                    }),
                    DingTalkFormat::Text => json!({
                        "msgtype": "text",
                        "text": { "content": titled }
                    }),
                };
                ChannelRequest::post_json(webhook_url.clone(), body)
            }
            Channel::Gotify {
                server,
                token,
                priority,
                title: title_override,
            } => ChannelRequest {
                method: Method::POST,
                url: format!("{}/message", server.trim_end_matches('/')),
                headers: vec![("X-Gotify-Key", token.clone())],
                body: RequestBody::Json(json!({
                    "message": message,
                    "priority": priority,
                    "title": title_override.as_deref().unwrap_or(title)
                })),
            },
        }
    }

    fn proxy(&self) -> Option<&str> {
        match self {
            Channel::Telegram { proxy, .. } => proxy.as_deref(),
            _ => None,
        }
    }

    fn timeout(&self) -> Duration {
        match self {
            Channel::Telegram { .. } => Duration::from_secs(TELEGRAM_TIMEOUT_SECS),
            _ => Duration::from_secs(NOTIFY_TIMEOUT_SECS),
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// A configured channel that can be switched off without deleting it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Deliver through this channel
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Service and settings
    #[serde(flatten)]
    pub channel: Channel,
}

impl ChannelConfig {
    /// Enabled channel.
    pub fn enabled(channel: Channel) -> Self {
        Self {
            enabled: true,
            channel,
        }
    }
}

// =============================================================================
// Notification Hub
// =============================================================================

/// Notification settings shared by all channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Master switch
    pub enabled: bool,
    /// Send session and pass reports (failure alerts are always sent)
    pub include_statistics: bool,
    /// Configured channels
    pub channels: Vec<ChannelConfig>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            include_statistics: true,
            channels: Vec::new(),
        }
    }
}

/// Fans notifications out to every enabled channel.
pub struct NotificationHub {
    /// Shared HTTP client for channels without a proxy
    client: Client,
    /// Settings
    config: NotificationConfig,
    /// Wait between delivery attempts
    retry_delay: ValueRange,
}

impl NotificationHub {
    /// Create a hub, rejecting channels with missing settings.
    pub fn new(config: NotificationConfig) -> Result<Self, NotifyError> {
        for entry in config.channels.iter().filter(|c| c.enabled) {
            entry.channel.validate()?;
        }

        Ok(Self {
            client: Client::new(),
            config,
            retry_delay: ValueRange::saturating(5.0, 15.0),
        })
    }

    /// Override the wait between attempts.
    pub fn with_retry_delay(mut self, retry_delay: ValueRange) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Whether this notification should go out at all.
    pub fn wants(&self, notification: &Notification) -> bool {
        if !self.config.enabled {
            return false;
        }
        match notification {
            Notification::Session { .. } | Notification::Combined { .. } => {
                self.config.include_statistics
            }
            Notification::AccountFailed { .. } => true,
        }
    }

    fn client_for(&self, channel: &Channel) -> Result<Client, NotifyError> {
        match channel.proxy() {
            Some(proxy) => {
                let invalid = |e: reqwest::Error| NotifyError::InvalidSettings {
                    channel: channel.name(),
                    reason: e.to_string(),
                };
                let proxy = Proxy::all(proxy).map_err(invalid)?;
                Client::builder().proxy(proxy).build().map_err(invalid)
            }
            None => Ok(self.client.clone()),
        }
    }

    /// Send one request once.
    async fn deliver(&self, channel: &Channel, request: &ChannelRequest) -> Result<(), NotifyError> {
        let client = self.client_for(channel)?;
        let name = channel.name();

        let mut builder = client.request(request.method.clone(), &request.url);
        for (header, value) in &request.headers {
            builder = builder.header(*header, value);
        }
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(body),
            RequestBody::Text(text) => builder.body(text.clone()),
        };

        let response = timeout(channel.timeout(), builder.send())
            .await
            .map_err(|_| NotifyError::Timeout(name))?
            .map_err(|e| NotifyError::RequestFailed {
                channel: name,
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::RequestFailed {
                channel: name,
                reason: format!("HTTP {}", status),
            });
        }
        Ok(())
    }

    /// Send through one channel, retrying up to three times.
    async fn deliver_with_retry(&self, channel: &Channel, title: &str, message: &str) -> bool {
        let request = channel.request(title, message);

        for attempt in 1..=MAX_ATTEMPTS {
            match self.deliver(channel, &request).await {
                Ok(()) => {
                    info!(channel = channel.name(), "Notification delivered");
                    return true;
                }
                Err(e) => {
                    error!(
                        channel = channel.name(),
                        attempt,
                        max_attempts = MAX_ATTEMPTS,
                        error = %e,
                        "Notification delivery failed"
                    );
                    if attempt < MAX_ATTEMPTS {
                        let delay = self.retry_delay.sample_secs(&mut rand::thread_rng());
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        false
    }
}

#[async_trait]
impl NotificationSink for NotificationHub {
    async fn notify(&self, notification: &Notification) -> Result<(), ExecError> {
        if !self.wants(notification) {
            return Ok(());
        }

        let channels: Vec<&Channel> = self
            .config
            .channels
            .iter()
            .filter(|c| c.enabled)
            .map(|c| &c.channel)
            .collect();
        if channels.is_empty() {
            warn!("No notification channel enabled");
            return Ok(());
        }

        let title = notification.title();
        let message = notification.render();

        let mut delivered = 0;
        for channel in &channels {
            if self.deliver_with_retry(channel, &title, &message).await {
                delivered += 1;
            }
        }

        info!(delivered, total = channels.len(), "Notification fan-out finished");
        if delivered == 0 {
            return Err(ExecError::Notification(format!(
                "all {} channels failed",
                channels.len()
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn failure() -> Notification {
        Notification::AccountFailed {
            account: "bob".to_string(),
            reason: "cookie expired".to_string(),
        }
    }

    #[test]
    fn test_channel_config_parses_tagged_json() {
        let json = r#"[
            {"name": "pushplus", "token": "tok"},
            {"name": "bark", "enabled": false, "device_key": "dev"},
            {"name": "dingtalk", "webhook_url": "https://oapi.dingtalk.com/x", "msg_type": "link"}
        ]"#;
        let channels: Vec<ChannelConfig> = serde_json::from_str(json).unwrap();

        assert!(channels[0].enabled);
        assert_eq!(channels[0].channel, Channel::PushPlus { token: "tok".to_string() });
        assert!(!channels[1].enabled);
        assert_eq!(
            channels[1].channel,
            Channel::Bark {
                server: "https://api.day.app".to_string(),
                device_key: "dev".to_string(),
                sound: None,
            }
        );
        assert!(matches!(
            channels[2].channel,
            Channel::DingTalk {
                msg_type: DingTalkFormat::Link,
                ..
            }
        ));
    }

    #[test]
    fn test_pushplus_request() {
        let request = Channel::PushPlus { token: "tok".to_string() }.request("T", "body");

        assert_eq!(request.method, Method::POST);
        assert_eq!(request.url, "https://www.pushplus.plus/send");
        assert_eq!(
            request.body,
            RequestBody::Json(json!({"token": "tok", "title": "T", "content": "body"}))
        );
    }

    #[test]
    fn test_wxpusher_encodes_message_in_path() {
        let request = Channel::WxPusher { spt: "SPT_x".to_string() }.request("T", "read 5 min");

        assert_eq!(request.method, Method::GET);
        assert_eq!(
            request.url,
            "https://wxpusher.zjiecode.com/api/send/message/SPT_x/read%205%20min"
        );
        assert_eq!(request.body, RequestBody::Empty);
    }

    #[test]
    fn test_ntfy_sends_plain_text_with_auth() {
        let request = Channel::Ntfy {
            server: "https://ntfy.example/".to_string(),
            topic: "books".to_string(),
            token: Some("secret".to_string()),
        }
        .request("T", "body");

        assert_eq!(request.url, "https://ntfy.example/books");
        assert!(request.headers.contains(&("Title", "T".to_string())));
        assert!(request.headers.contains(&("Authorization", "Bearer secret".to_string())));
        assert_eq!(request.body, RequestBody::Text("body".to_string()));
    }

    #[test]
    fn test_wework_news_truncates_preview() {
        let long = "x".repeat(250);
        let request = Channel::WeWork {
            webhook_url: "https://qyapi.weixin.qq.com/hook".to_string(),
            msg_type: WeWorkFormat::News,
        }
        .request("T", &long);

        let RequestBody::Json(body) = request.body else {
            panic!("expected JSON body");
        };
        let description = body["news"]["articles"][0]["description"].as_str().unwrap();
        assert_eq!(description.len(), 203);
        assert!(description.ends_with("..."));
    }

    #[test]
    fn test_feishu_text_prefixes_title() {
        let request = Channel::Feishu {
            webhook_url: "https://open.feishu.cn/hook".to_string(),
            msg_type: FeishuFormat::Text,
        }
        .request("T", "body");

        assert_eq!(
            request.body,
            RequestBody::Json(json!({"msg_type": "text", "content": {"text": "T\n\nbody"}}))
        );
    }

    #[test]
    fn test_gotify_uses_title_override_and_key_header() {
        let request = Channel::Gotify {
            server: "https://gotify.local".to_string(),
            token: "app".to_string(),
            priority: 8,
            title: Some("Reader".to_string()),
        }
        .request("T", "body");

        assert_eq!(request.url, "https://gotify.local/message");
        assert_eq!(request.headers, vec![("X-Gotify-Key", "app".to_string())]);
        assert_eq!(
            request.body,
            RequestBody::Json(json!({"message": "body", "priority": 8, "title": "Reader"}))
        );
    }

    #[test]
    fn test_validate_rejects_blank_settings() {
        let channel = Channel::Telegram {
            bot_token: "123:abc".to_string(),
            chat_id: " ".to_string(),
            proxy: None,
        };
        assert!(matches!(
            channel.validate(),
            Err(NotifyError::InvalidSettings { channel: "telegram", .. })
        ));

        let config = NotificationConfig {
            channels: vec![ChannelConfig::enabled(channel)],
            ..Default::default()
        };
        assert!(NotificationHub::new(config).is_err());
    }

    #[test]
    fn test_hub_filters_by_settings() {
        let hub = NotificationHub::new(NotificationConfig {
            include_statistics: false,
            ..Default::default()
        })
        .unwrap();
        let report = Notification::Combined {
            report: weread_exec::CombinedReport {
                accounts: Vec::new(),
                started_at: chrono::Utc::now(),
                finished_at: chrono::Utc::now(),
            },
        };

        assert!(!hub.wants(&report));
        assert!(hub.wants(&failure()));

        let muted = NotificationHub::new(NotificationConfig {
            enabled: false,
            ..Default::default()
        })
        .unwrap();
        assert!(!muted.wants(&failure()));
    }

    #[tokio::test]
    async fn test_hub_without_channels_is_a_noop() {
        let hub = NotificationHub::new(NotificationConfig::default()).unwrap();
        assert!(hub.notify(&failure()).await.is_ok());
    }
}
