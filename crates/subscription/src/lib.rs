//! Balance alert subscriptions and their storage.
//!
//! A [`Subscription`] records who wants to be alerted, below which balance,
//! and how often they may be checked. Rows are deactivated, never deleted,
//! so alert history stays queryable.
//!
//! Every [`SubscriptionStore`] operation is fault tolerant: storage failures
//! are logged and turned into a safe default (`None`, `false`, empty list)
//! instead of being returned to the caller.

pub mod error;
pub mod memory;
pub mod sqlite;

pub use error::PersistenceError;
pub use memory::MemorySubscriptionStore;
pub use sqlite::SqliteSubscriptionStore;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a subscription: one per subscriber and monitored target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionKey {
    /// Recipient id in the messaging platform
    pub subscriber_id: String,
    /// Monitored target name, `None` for the default target
    pub target: Option<String>,
}

impl SubscriptionKey {
    pub fn new(subscriber_id: impl Into<String>, target: Option<&str>) -> Self {
        Self {
            subscriber_id: subscriber_id.into(),
            target: target.map(str::to_string),
        }
    }

    /// Key for the default target.
    pub fn default_target(subscriber_id: impl Into<String>) -> Self {
        Self::new(subscriber_id, None)
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) => write!(f, "{}@{}", self.subscriber_id, target),
            None => f.write_str(&self.subscriber_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub subscriber_id: String,
    pub target: Option<String>,
    /// Decimal string; alert when the balance is below it
    pub threshold: String,
    pub check_interval_minutes: u32,
    pub is_active: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_alert_at: Option<DateTime<Utc>>,
    pub alert_count: u32,
    /// Last observed balance in display form
    pub last_balance: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey {
            subscriber_id: self.subscriber_id.clone(),
            target: self.target.clone(),
        }
    }

    pub fn check_interval(&self) -> TimeDelta {
        TimeDelta::minutes(i64::from(self.check_interval_minutes))
    }

    /// Whether a check at `now` respects the subscription's own interval.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.last_checked_at
            .is_none_or(|last| now.signed_duration_since(last) >= self.check_interval())
    }
}

/// Persistence of subscriptions.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Create or overwrite the subscription for `key`.
    ///
    /// Reactivates it and stamps `last_checked_at` with the current time.
    /// The threshold is stored as given, zero included.
    async fn upsert(
        &self,
        key: &SubscriptionKey,
        threshold: &str,
        check_interval_minutes: u32,
    ) -> Option<Subscription>;

    async fn get(&self, key: &SubscriptionKey) -> Option<Subscription>;

    /// Flip an active subscription to inactive. True iff a row changed.
    async fn deactivate(&self, key: &SubscriptionKey) -> bool;

    async fn list_active(&self) -> Vec<Subscription>;

    /// Stamp `last_checked_at` and remember the observed balance.
    async fn record_check(&self, key: &SubscriptionKey, observed_balance: &str) -> bool;

    /// Stamp `last_alert_at` and increment `alert_count`.
    async fn record_alert(&self, key: &SubscriptionKey) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription(last_checked_at: Option<DateTime<Utc>>) -> Subscription {
        let now = Utc::now();
        Subscription {
            subscriber_id: "42".into(),
            target: None,
            threshold: "300".into(),
            check_interval_minutes: 60,
            is_active: true,
            last_checked_at,
            last_alert_at: None,
            alert_count: 0,
            last_balance: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_is_due() {
        let now = Utc::now();
        assert!(subscription(None).is_due(now));
        assert!(!subscription(Some(now - TimeDelta::minutes(10))).is_due(now));
        assert!(subscription(Some(now - TimeDelta::minutes(60))).is_due(now));
    }

    #[test]
    fn test_key_display() {
        assert_eq!(SubscriptionKey::default_target("42").to_string(), "42");
        assert_eq!(SubscriptionKey::new("42", Some("beta")).to_string(), "42@beta");
    }
}
