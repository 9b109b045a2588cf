//! Outbound delivery of subscriber alerts and operator diagnostics.
//!
//! Two seams are defined here:
//! - [`Notifier`] delivers a [`NotificationPayload`] to a subscriber.
//! - [`AuditSink`] receives [`AuditEvent`]s meant for operators.
//!
//! Both return explicit results; callers decide whether to log, count or
//! escalate a failure.

pub mod log;
pub mod telegram;

pub use log::{LogAuditSink, LogNotifier};
pub use telegram::{TelegramAuditSink, TelegramConfig, TelegramNotifier};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum NotifyError {
    /// Request could not be sent or the response not read
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Transport accepted the request but refused to deliver it
    #[error("Delivery rejected: {0}")]
    Rejected(String),

    /// Response body could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Invalid notifier configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl NotifyError {
    /// Only transport failures are worth another attempt.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// A button attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionButton {
    /// Text shown on the button
    pub label: String,
    /// Opaque data handed back to the bot when pressed
    pub callback: String,
}

impl ActionButton {
    pub fn new(label: impl Into<String>, callback: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            callback: callback.into(),
        }
    }
}

/// What gets delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationPayload {
    /// Plain text message
    Text(String),
    /// Text with a row of action buttons
    WithActions {
        text: String,
        buttons: Vec<ActionButton>,
    },
}

impl NotificationPayload {
    pub fn text(&self) -> &str {
        match self {
            Self::Text(text) | Self::WithActions { text, .. } => text,
        }
    }

    pub fn buttons(&self) -> &[ActionButton] {
        match self {
            Self::Text(_) => &[],
            Self::WithActions { buttons, .. } => buttons,
        }
    }
}

/// Delivers notifications to subscribers.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send `payload` to `subscriber_id`.
    async fn send(
        &self,
        subscriber_id: &str,
        payload: &NotificationPayload,
    ) -> Result<(), NotifyError>;
}

/// Severity of an operator-facing event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// A diagnostic event for operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub metadata: Map<String, Value>,
}

impl AuditEvent {
    pub fn new(severity: Severity, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            severity,
            metadata: Map::new(),
        }
    }

    /// Attach a structured metadata field.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Receives diagnostic events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn emit(&self, event: AuditEvent) -> Result<(), NotifyError>;
}

/// Emit `event`, logging and swallowing any failure.
pub async fn emit_best_effort(sink: &dyn AuditSink, event: AuditEvent) {
    let title = event.title.clone();
    if let Err(e) = sink.emit(event).await {
        warn!(title = %title, error = %e, "Failed to emit audit event");
    }
}
