//! Delivery that only writes to the local log, for dry runs and setups
//! without a bot token.

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::{AuditEvent, AuditSink, NotificationPayload, Notifier, NotifyError, Severity};

/// Logs notifications instead of delivering them. Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(
        &self,
        subscriber_id: &str,
        payload: &NotificationPayload,
    ) -> Result<(), NotifyError> {
        info!(
            subscriber_id,
            buttons = payload.buttons().len(),
            "Notification (not delivered): {}",
            payload.text()
        );
        Ok(())
    }
}

/// Writes audit events through `tracing`. Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn emit(&self, event: AuditEvent) -> Result<(), NotifyError> {
        let metadata = serde_json::Value::Object(event.metadata);
        match event.severity {
            Severity::Info => {
                info!(title = %event.title, metadata = %metadata, "{}", event.description)
            }
            Severity::Warning => {
                warn!(title = %event.title, metadata = %metadata, "{}", event.description)
            }
            Severity::Error => {
                error!(title = %event.title, metadata = %metadata, "{}", event.description)
            }
        }
        Ok(())
    }
}
