//! Reminder use cases behind the bot commands.

use std::sync::Arc;

use balance::{
    units::{parse_units, UnitsError},
    BalanceFetcher, BalanceQuery, BalanceSnapshot, FetchError, TokenBalanceApi,
};
use config::{ConfigError, TargetConfig, TargetRegistry, MAX_INTERVAL_MINUTES};
use subscription::{Subscription, SubscriptionKey, SubscriptionStore};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("target {0} is not active")]
    InactiveTarget(String),

    #[error("invalid threshold: {0}")]
    InvalidThreshold(#[from] UnitsError),

    #[error("check interval must be between {min} and {max} minutes")]
    InvalidInterval { min: u32, max: u32 },

    #[error("failed to store subscription {0}")]
    Storage(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Result of a "set reminder" request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReminderOutcome {
    /// Subscription created or updated
    Enabled(Subscription),
    /// Zero threshold turned an active subscription off
    Disabled,
    /// Zero threshold, but nothing was active
    NothingToDisable,
}

/// Subscriber-facing operations on reminders and balances.
pub struct ReminderService<A> {
    fetcher: Arc<BalanceFetcher<A>>,
    store: Arc<dyn SubscriptionStore>,
    registry: Arc<TargetRegistry>,
}

impl<A> ReminderService<A>
where
    A: TokenBalanceApi,
{
    pub const fn new(
        fetcher: Arc<BalanceFetcher<A>>,
        store: Arc<dyn SubscriptionStore>,
        registry: Arc<TargetRegistry>,
    ) -> Self {
        Self {
            fetcher,
            store,
            registry,
        }
    }

    pub const fn registry(&self) -> &Arc<TargetRegistry> {
        &self.registry
    }

    /// Look up the target and build the subscription key for it.
    ///
    /// Naming the default target explicitly yields the same key as naming none.
    fn key_for<'a>(
        &'a self,
        subscriber_id: &str,
        target: Option<&str>,
    ) -> Result<(&'a TargetConfig, SubscriptionKey), ServiceError> {
        let config = self.registry.resolve_name(target)?;
        let target = (config.name != self.registry.default_name()).then_some(config.name.as_str());
        Ok((config, SubscriptionKey::new(subscriber_id, target)))
    }

    /// Create, update or (with a zero threshold) disable a reminder.
    pub async fn set_reminder(
        &self,
        subscriber_id: &str,
        threshold: &str,
        check_interval_minutes: u32,
        target: Option<&str>,
    ) -> Result<ReminderOutcome, ServiceError> {
        let (config, key) = self.key_for(subscriber_id, target)?;

        // Disabling must keep working for retired or misconfigured targets.
        let threshold_raw = parse_units(threshold, config.decimals)?;
        if threshold_raw.is_zero() {
            return Ok(if self.store.deactivate(&key).await {
                info!(%key, "Reminder disabled by zero threshold");
                ReminderOutcome::Disabled
            } else {
                ReminderOutcome::NothingToDisable
            });
        }

        if !config.active {
            return Err(ServiceError::InactiveTarget(config.name.clone()));
        }
        config.resolve()?;

        if !config.accepts_interval(check_interval_minutes) {
            return Err(ServiceError::InvalidInterval {
                min: config.min_interval_minutes,
                max: MAX_INTERVAL_MINUTES,
            });
        }

        self.store
            .upsert(&key, threshold.trim(), check_interval_minutes)
            .await
            .map(ReminderOutcome::Enabled)
            .ok_or_else(|| ServiceError::Storage(key.to_string()))
    }

    /// Turn a reminder off. True iff one was active.
    pub async fn disable_reminder(
        &self,
        subscriber_id: &str,
        target: Option<&str>,
    ) -> Result<bool, ServiceError> {
        let (_, key) = self.key_for(subscriber_id, target)?;
        Ok(self.store.deactivate(&key).await)
    }

    /// Stored reminder, active or not, with its target.
    pub async fn reminder_status(
        &self,
        subscriber_id: &str,
        target: Option<&str>,
    ) -> Result<(TargetConfig, Option<Subscription>), ServiceError> {
        let (config, key) = self.key_for(subscriber_id, target)?;
        Ok((config.clone(), self.store.get(&key).await))
    }

    /// Current balance of a target.
    ///
    /// Missing wallet or contract configuration is reported here, before any
    /// request is made.
    pub async fn balance_report(
        &self,
        target: Option<&str>,
        force_refresh: bool,
    ) -> Result<(TargetConfig, BalanceSnapshot), ServiceError> {
        let config = self.registry.resolve_name(target)?;
        let resolved = config.resolve()?;
        let snapshot = self
            .fetcher
            .fetch_balance(&BalanceQuery::from(&resolved), force_refresh)
            .await?;
        Ok((config.clone(), snapshot))
    }
}
