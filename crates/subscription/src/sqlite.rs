//! SQLite-backed subscription store.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};

use crate::{PersistenceError, Subscription, SubscriptionKey, SubscriptionStore};

const SELECT_COLUMNS: &str = "SELECT subscriber_id, target, threshold, check_interval_minutes, \
     is_active, last_checked_at, last_alert_at, alert_count, last_balance, created_at, updated_at \
     FROM subscriptions";

// Helper struct for mapping from the database row
#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    subscriber_id: String,
    target: String,
    threshold: String,
    check_interval_minutes: i64,
    is_active: bool,
    last_checked_at: Option<DateTime<Utc>>,
    last_alert_at: Option<DateTime<Utc>>,
    alert_count: i64,
    last_balance: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<SubscriptionRow> for Subscription {
    fn from(row: SubscriptionRow) -> Self {
        Self {
            subscriber_id: row.subscriber_id,
            target: (!row.target.is_empty()).then_some(row.target),
            threshold: row.threshold,
            check_interval_minutes: u32::try_from(row.check_interval_minutes).unwrap_or(0),
            is_active: row.is_active,
            last_checked_at: row.last_checked_at,
            last_alert_at: row.last_alert_at,
            alert_count: u32::try_from(row.alert_count).unwrap_or(u32::MAX),
            last_balance: row.last_balance,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Column value for a key's target; the default target is stored as `''`.
fn target_column(key: &SubscriptionKey) -> &str {
    key.target.as_deref().unwrap_or("")
}

/// A [`SubscriptionStore`] persisted in SQLite.
pub struct SqliteSubscriptionStore {
    pool: SqlitePool,
}

impl SqliteSubscriptionStore {
    /// Connect to `database_url`, creating the database file if missing.
    #[tracing::instrument(level = "info")]
    pub async fn new(database_url: &str) -> Result<Self, PersistenceError> {
        tracing::debug!(database_url, "Attempting to connect to SQLite database.");
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| PersistenceError::InvalidInput(e.to_string()))?
            .create_if_missing(true);

        // Every connection to an in-memory database sees its own copy unless
        // the pool keeps exactly one alive.
        let pool_options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };

        let pool = pool_options.connect_with(options).await.map_err(|e| {
            PersistenceError::OperationFailed(format!("Failed to connect to database: {}", e))
        })?;
        tracing::info!(database_url, "Successfully connected to SQLite database.");
        Ok(Self { pool })
    }

    /// Runs database migrations.
    #[tracing::instrument(skip(self), level = "info")]
    pub async fn run_migrations(&self) -> Result<(), PersistenceError> {
        tracing::debug!("Running database migrations.");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to run database migrations.");
                PersistenceError::MigrationError(e.to_string())
            })?;
        tracing::info!("Database migrations completed successfully.");
        Ok(())
    }

    /// Closes the connection pool gracefully.
    #[tracing::instrument(skip(self), level = "info")]
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("SQLite connection pool closed.");
    }

    /// Helper to execute database queries with consistent error handling
    async fn execute_query_with_error_handling<F, T>(
        &self,
        operation: &str,
        query_fn: F,
    ) -> Result<T, PersistenceError>
    where
        F: std::future::Future<Output = Result<T, sqlx::Error>>,
    {
        query_fn.await.map_err(|e| {
            tracing::error!(error = %e, operation = %operation, "Database operation failed.");
            PersistenceError::OperationFailed(e.to_string())
        })
    }

    pub async fn try_upsert(
        &self,
        key: &SubscriptionKey,
        threshold: &str,
        check_interval_minutes: u32,
    ) -> Result<Subscription, PersistenceError> {
        let now = Utc::now();
        self.execute_query_with_error_handling(
            "upsert subscription",
            sqlx::query(
                "INSERT INTO subscriptions \
                 (subscriber_id, target, threshold, check_interval_minutes, is_active, \
                  last_checked_at, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, 1, ?, ?, ?) \
                 ON CONFLICT (subscriber_id, target) DO UPDATE SET \
                    threshold = excluded.threshold, \
                    check_interval_minutes = excluded.check_interval_minutes, \
                    is_active = 1, \
                    last_checked_at = excluded.last_checked_at, \
                    updated_at = excluded.updated_at",
            )
            .bind(&key.subscriber_id)
            .bind(target_column(key))
            .bind(threshold)
            .bind(i64::from(check_interval_minutes))
            .bind(now)
            .bind(now)
            .bind(now)
            .execute(&self.pool),
        )
        .await?;

        tracing::info!(%key, threshold, check_interval_minutes, "Subscription upserted.");
        self.try_get(key)
            .await?
            .ok_or_else(|| PersistenceError::OperationFailed(format!("{key} missing after upsert")))
    }

    pub async fn try_get(
        &self,
        key: &SubscriptionKey,
    ) -> Result<Option<Subscription>, PersistenceError> {
        let sql = format!("{SELECT_COLUMNS} WHERE subscriber_id = ? AND target = ?");
        let row = self
            .execute_query_with_error_handling(
                "get subscription",
                sqlx::query_as::<_, SubscriptionRow>(&sql)
                    .bind(&key.subscriber_id)
                    .bind(target_column(key))
                    .fetch_optional(&self.pool),
            )
            .await?;
        Ok(row.map(Subscription::from))
    }

    pub async fn try_deactivate(&self, key: &SubscriptionKey) -> Result<bool, PersistenceError> {
        let result = self
            .execute_query_with_error_handling(
                "deactivate subscription",
                sqlx::query(
                    "UPDATE subscriptions SET is_active = 0, updated_at = ? \
                     WHERE subscriber_id = ? AND target = ? AND is_active = 1",
                )
                .bind(Utc::now())
                .bind(&key.subscriber_id)
                .bind(target_column(key))
                .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn try_list_active(&self) -> Result<Vec<Subscription>, PersistenceError> {
        let sql = format!("{SELECT_COLUMNS} WHERE is_active = 1 ORDER BY id");
        let rows = self
            .execute_query_with_error_handling(
                "list active subscriptions",
                sqlx::query_as::<_, SubscriptionRow>(&sql).fetch_all(&self.pool),
            )
            .await?;
        Ok(rows.into_iter().map(Subscription::from).collect())
    }

    pub async fn try_record_check(
        &self,
        key: &SubscriptionKey,
        observed_balance: &str,
    ) -> Result<bool, PersistenceError> {
        let now = Utc::now();
        let result = self
            .execute_query_with_error_handling(
                "record subscription check",
                sqlx::query(
                    "UPDATE subscriptions SET last_checked_at = ?, last_balance = ?, updated_at = ? \
                     WHERE subscriber_id = ? AND target = ?",
                )
                .bind(now)
                .bind(observed_balance)
                .bind(now)
                .bind(&key.subscriber_id)
                .bind(target_column(key))
                .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn try_record_alert(&self, key: &SubscriptionKey) -> Result<bool, PersistenceError> {
        let now = Utc::now();
        let result = self
            .execute_query_with_error_handling(
                "record subscription alert",
                sqlx::query(
                    "UPDATE subscriptions SET last_alert_at = ?, alert_count = alert_count + 1, \
                     updated_at = ? WHERE subscriber_id = ? AND target = ?",
                )
                .bind(now)
                .bind(now)
                .bind(&key.subscriber_id)
                .bind(target_column(key))
                .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SubscriptionStore for SqliteSubscriptionStore {
    async fn upsert(
        &self,
        key: &SubscriptionKey,
        threshold: &str,
        check_interval_minutes: u32,
    ) -> Option<Subscription> {
        self.try_upsert(key, threshold, check_interval_minutes)
            .await
            .inspect_err(|e| tracing::error!(%key, error = %e, "Failed to upsert subscription."))
            .ok()
    }

    async fn get(&self, key: &SubscriptionKey) -> Option<Subscription> {
        self.try_get(key)
            .await
            .inspect_err(|e| tracing::error!(%key, error = %e, "Failed to load subscription."))
            .ok()
            .flatten()
    }

    async fn deactivate(&self, key: &SubscriptionKey) -> bool {
        self.try_deactivate(key)
            .await
            .inspect_err(|e| tracing::error!(%key, error = %e, "Failed to deactivate subscription."))
            .unwrap_or(false)
    }

    async fn list_active(&self) -> Vec<Subscription> {
        self.try_list_active()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Failed to list active subscriptions."))
            .unwrap_or_default()
    }

    async fn record_check(&self, key: &SubscriptionKey, observed_balance: &str) -> bool {
        self.try_record_check(key, observed_balance)
            .await
            .inspect_err(|e| tracing::error!(%key, error = %e, "Failed to record subscription check."))
            .unwrap_or(false)
    }

    async fn record_alert(&self, key: &SubscriptionKey) -> bool {
        self.try_record_alert(key)
            .await
            .inspect_err(|e| tracing::error!(%key, error = %e, "Failed to record subscription alert."))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_db() -> SqliteSubscriptionStore {
        let store = SqliteSubscriptionStore::new("sqlite::memory:")
            .await
            .expect("Failed to set up in-memory database");
        store
            .run_migrations()
            .await
            .expect("Failed to run migrations");
        store
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = setup_db().await;
        let key = SubscriptionKey::default_target("42");

        store.upsert(&key, "500", 30).await.unwrap();
        let second = store.upsert(&key, "750", 60).await.unwrap();

        let active = store.list_active().await;
        assert_eq!(active.len(), 1);
        assert_eq!(second.threshold, "750");
        assert_eq!(second.check_interval_minutes, 60);
        assert!(second.last_checked_at.is_some());
    }

    #[tokio::test]
    async fn test_targets_are_separate_rows() {
        let store = setup_db().await;
        store
            .upsert(&SubscriptionKey::default_target("42"), "100", 30)
            .await
            .unwrap();
        store
            .upsert(&SubscriptionKey::new("42", Some("beta")), "200", 5)
            .await
            .unwrap();

        let active = store.list_active().await;
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].target, None);
        assert_eq!(active[1].target.as_deref(), Some("beta"));
    }

    #[tokio::test]
    async fn test_deactivate_keeps_history() {
        let store = setup_db().await;
        let key = SubscriptionKey::default_target("42");
        store.upsert(&key, "300", 30).await.unwrap();
        assert!(store.record_check(&key, "250").await);
        assert!(store.record_alert(&key).await);

        assert!(store.deactivate(&key).await);
        // Second call flips nothing.
        assert!(!store.deactivate(&key).await);

        let row = store.get(&key).await.unwrap();
        assert!(!row.is_active);
        assert_eq!(row.alert_count, 1);
        assert_eq!(row.last_balance.as_deref(), Some("250"));
        assert!(store.list_active().await.is_empty());

        // Upsert reactivates the same row.
        let again = store.upsert(&key, "300", 30).await.unwrap();
        assert!(again.is_active);
        assert_eq!(again.alert_count, 1);
    }

    #[tokio::test]
    async fn test_record_alert_increments() {
        let store = setup_db().await;
        let key = SubscriptionKey::default_target("7");
        store.upsert(&key, "10", 30).await.unwrap();

        store.record_alert(&key).await;
        store.record_alert(&key).await;

        let row = store.get(&key).await.unwrap();
        assert_eq!(row.alert_count, 2);
        assert!(row.last_alert_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_key() {
        let store = setup_db().await;
        let key = SubscriptionKey::default_target("nobody");
        assert!(store.get(&key).await.is_none());
        assert!(!store.deactivate(&key).await);
        assert!(!store.record_check(&key, "1").await);
        assert!(!store.record_alert(&key).await);
    }

    #[tokio::test]
    async fn test_failures_return_safe_defaults() {
        let store = setup_db().await;
        let key = SubscriptionKey::default_target("42");
        store.upsert(&key, "300", 30).await.unwrap();
        store.close().await;

        assert!(store.upsert(&key, "300", 30).await.is_none());
        assert!(store.get(&key).await.is_none());
        assert!(!store.deactivate(&key).await);
        assert!(store.list_active().await.is_empty());
        assert!(!store.record_check(&key, "1").await);
        assert!(!store.record_alert(&key).await);
    }
}
