//! In-process subscription store, lost on restart.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::{Subscription, SubscriptionKey, SubscriptionStore};

#[derive(Debug, Default)]
pub struct MemorySubscriptionStore {
    rows: Mutex<HashMap<SubscriptionKey, Subscription>>,
    // Insertion order, so listings are stable.
    order: Mutex<Vec<SubscriptionKey>>,
}

impl MemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a row verbatim.
    pub async fn insert(&self, subscription: Subscription) {
        let key = subscription.key();
        let mut order = self.order.lock().await;
        if self.rows.lock().await.insert(key.clone(), subscription).is_none() {
            order.push(key);
        }
    }
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn upsert(
        &self,
        key: &SubscriptionKey,
        threshold: &str,
        check_interval_minutes: u32,
    ) -> Option<Subscription> {
        let now = Utc::now();
        let mut order = self.order.lock().await;
        let mut rows = self.rows.lock().await;

        let row = rows.entry(key.clone()).or_insert_with(|| {
            order.push(key.clone());
            Subscription {
                subscriber_id: key.subscriber_id.clone(),
                target: key.target.clone(),
                threshold: String::new(),
                check_interval_minutes,
                is_active: true,
                last_checked_at: None,
                last_alert_at: None,
                alert_count: 0,
                last_balance: None,
                created_at: now,
                updated_at: now,
            }
        });
        row.threshold = threshold.to_string();
        row.check_interval_minutes = check_interval_minutes;
        row.is_active = true;
        row.last_checked_at = Some(now);
        row.updated_at = now;

        tracing::info!(%key, threshold, check_interval_minutes, "Subscription upserted.");
        Some(row.clone())
    }

    async fn get(&self, key: &SubscriptionKey) -> Option<Subscription> {
        self.rows.lock().await.get(key).cloned()
    }

    async fn deactivate(&self, key: &SubscriptionKey) -> bool {
        match self.rows.lock().await.get_mut(key) {
            Some(row) if row.is_active => {
                row.is_active = false;
                row.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    async fn list_active(&self) -> Vec<Subscription> {
        let order = self.order.lock().await;
        let rows = self.rows.lock().await;
        order
            .iter()
            .filter_map(|key| rows.get(key))
            .filter(|row| row.is_active)
            .cloned()
            .collect()
    }

    async fn record_check(&self, key: &SubscriptionKey, observed_balance: &str) -> bool {
        let mut rows = self.rows.lock().await;
        let Some(row) = rows.get_mut(key) else {
            return false;
        };
        let now = Utc::now();
        row.last_checked_at = Some(now);
        row.last_balance = Some(observed_balance.to_string());
        row.updated_at = now;
        true
    }

    async fn record_alert(&self, key: &SubscriptionKey) -> bool {
        let mut rows = self.rows.lock().await;
        let Some(row) = rows.get_mut(key) else {
            return false;
        };
        let now = Utc::now();
        row.last_alert_at = Some(now);
        row.alert_count = row.alert_count.saturating_add(1);
        row.updated_at = now;
        true
    }
}
