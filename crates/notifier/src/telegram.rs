//! Telegram Bot API delivery.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tokio_retry::{strategy::ExponentialBackoff, RetryIf};
use tracing::{debug, warn};

use crate::{AuditEvent, AuditSink, NotificationPayload, Notifier, NotifyError};

/// Default Bot API endpoint.
pub const TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Telegram refuses messages longer than this.
const MAX_MESSAGE_LEN: usize = 4096;

/// Connection settings for the Bot API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot API base url, overridable for tests and proxies
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Bot token
    #[serde(default)]
    pub bot_token: String,
    /// Chat receiving audit events, if any
    #[serde(default)]
    pub admin_chat_id: Option<String>,
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String {
    TELEGRAM_API_URL.to_string()
}

const fn default_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize)]
struct BotResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Sends notifications through `sendMessage`.
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    http: reqwest::Client,
    send_url: String,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> Result<Self, NotifyError> {
        if config.bot_token.trim().is_empty() {
            return Err(NotifyError::Config("telegram bot token is empty".into()));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let send_url = format!(
            "{}/bot{}/sendMessage",
            config.api_url.trim_end_matches('/'),
            config.bot_token.trim()
        );

        Ok(Self { http, send_url })
    }

    async fn send_once(&self, body: &serde_json::Value) -> Result<(), NotifyError> {
        let response = self
            .http
            .post(&self.send_url)
            .json(body)
            .send()
            .await
            // The url embeds the bot token.
            .map_err(|e| NotifyError::Transport(e.without_url()))?;

        let text = response
            .text()
            .await
            .map_err(|e| NotifyError::Transport(e.without_url()))?;
        let parsed: BotResponse =
            serde_json::from_str(&text).map_err(|e| NotifyError::Decode(e.to_string()))?;

        if parsed.ok {
            Ok(())
        } else {
            Err(NotifyError::Rejected(
                parsed.description.unwrap_or_else(|| "unknown error".into()),
            ))
        }
    }
}

/// Build the `sendMessage` request body for `payload`.
fn message_body(chat_id: &str, payload: &NotificationPayload) -> serde_json::Value {
    let text: String = payload.text().chars().take(MAX_MESSAGE_LEN).collect();
    let mut body = json!({
        "chat_id": chat_id,
        "text": text,
        "disable_web_page_preview": true,
    });

    let buttons = payload.buttons();
    if !buttons.is_empty() {
        let row: Vec<_> = buttons
            .iter()
            .map(|b| json!({ "text": b.label, "callback_data": b.callback }))
            .collect();
        body["reply_markup"] = json!({ "inline_keyboard": [row] });
    }

    body
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(
        &self,
        subscriber_id: &str,
        payload: &NotificationPayload,
    ) -> Result<(), NotifyError> {
        let body = message_body(subscriber_id, payload);
        let retry_strategy = ExponentialBackoff::from_millis(10)
            .factor(20)
            .max_delay(Duration::from_secs(5))
            .take(2);

        RetryIf::start(
            retry_strategy,
            || async {
                self.send_once(&body).await.map_err(|e| {
                    if e.is_retryable() {
                        warn!(chat_id = subscriber_id, error = %e, "Telegram send failed, will retry");
                    }
                    e
                })
            },
            NotifyError::is_retryable,
        )
        .await?;

        debug!(chat_id = subscriber_id, "Telegram message delivered");
        Ok(())
    }
}

/// Forwards audit events to an admin chat.
pub struct TelegramAuditSink {
    notifier: TelegramNotifier,
    chat_id: String,
}

impl TelegramAuditSink {
    pub const fn new(notifier: TelegramNotifier, chat_id: String) -> Self {
        Self { notifier, chat_id }
    }
}

/// Render an audit event as a plain text message.
fn render_event(event: &AuditEvent) -> String {
    let mut text = format!("[{}] {}\n\n{}", event.severity, event.title, event.description);
    if !event.metadata.is_empty() {
        text.push('\n');
        for (key, value) in &event.metadata {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            text.push_str(&format!("\n{key}: {value}"));
        }
    }
    text
}

#[async_trait]
impl AuditSink for TelegramAuditSink {
    async fn emit(&self, event: AuditEvent) -> Result<(), NotifyError> {
        let payload = NotificationPayload::Text(render_event(&event));
        self.notifier.send(&self.chat_id, &payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ActionButton, Severity};
    use mockito::Matcher;

    fn config(url: String) -> TelegramConfig {
        TelegramConfig {
            api_url: url,
            bot_token: "123:token".into(),
            admin_chat_id: None,
            timeout_secs: 5,
        }
    }

    #[test]
    fn test_empty_token_rejected() {
        let mut cfg = config(TELEGRAM_API_URL.into());
        cfg.bot_token = "  ".into();
        assert!(matches!(
            TelegramNotifier::new(&cfg),
            Err(NotifyError::Config(_))
        ));
    }

    #[test]
    fn test_message_body_with_buttons() {
        let payload = NotificationPayload::WithActions {
            text: "Balance low".into(),
            buttons: vec![
                ActionButton::new("Refresh", "refresh:main"),
                ActionButton::new("Disable", "disable:main"),
            ],
        };
        let body = message_body("42", &payload);
        assert_eq!(body["chat_id"], "42");
        assert_eq!(body["text"], "Balance low");
        let row = &body["reply_markup"]["inline_keyboard"][0];
        assert_eq!(row[0]["callback_data"], "refresh:main");
        assert_eq!(row[1]["text"], "Disable");

        let plain = message_body("42", &NotificationPayload::Text("x".into()));
        assert!(plain.get("reply_markup").is_none());
    }

    #[test]
    fn test_render_event() {
        let event = AuditEvent::new(Severity::Error, "Fetch failed", "both keys failed")
            .with("primary_key", "ABCDEFGH")
            .with("primary_errors", 3);
        let text = render_event(&event);
        assert!(text.starts_with("[ERROR] Fetch failed"));
        assert!(text.contains("primary_key: ABCDEFGH"));
        assert!(text.contains("primary_errors: 3"));
    }

    #[tokio::test]
    async fn test_send_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/bot123:token/sendMessage")
            .match_body(Matcher::PartialJson(json!({ "chat_id": "42", "text": "hello" })))
            .with_status(200)
            .with_body(r#"{"ok":true,"result":{}}"#)
            .create_async()
            .await;

        let notifier = TelegramNotifier::new(&config(server.url())).unwrap();
        notifier
            .send("42", &NotificationPayload::Text("hello".into()))
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejection_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/bot123:token/sendMessage")
            .with_status(403)
            .with_body(r#"{"ok":false,"error_code":403,"description":"Forbidden: bot was blocked by the user"}"#)
            .expect(1)
            .create_async()
            .await;

        let notifier = TelegramNotifier::new(&config(server.url())).unwrap();
        let err = notifier
            .send("42", &NotificationPayload::Text("hello".into()))
            .await
            .unwrap_err();

        assert!(matches!(err, NotifyError::Rejected(ref d) if d.contains("blocked")));
        mock.assert_async().await;
    }
    #[tokio::test]
    async fn test_transport_error_surfaces_after_retries() {
        // Nothing listens on port 1, so every attempt fails to connect.
        let notifier = TelegramNotifier::new(&config("http://127.0.0.1:1".into())).unwrap();
        let err = notifier
            .send("42", &NotificationPayload::Text("hello".into()))
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert!(matches!(err, NotifyError::Transport(_)));
    }
}
