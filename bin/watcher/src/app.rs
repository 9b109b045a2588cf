//! Builds the runtime components from a [`Config`].

use std::{sync::Arc, time::Duration};

use balance::{BalanceFetcher, Credentials};
use client::{ApiKey, ExplorerClient};
use config::TargetRegistry;
use eyre::WrapErr;
use notifier::{
    AuditSink, LogAuditSink, LogNotifier, Notifier, TelegramAuditSink, TelegramNotifier,
};
use subscription::{MemorySubscriptionStore, SqliteSubscriptionStore, SubscriptionStore};
use tracing::{info, warn};

use crate::{config::Config, scheduler::Scheduler, service::ReminderService};

/// Everything the binaries need, wired once.
pub struct App {
    pub config: Config,
    pub registry: Arc<TargetRegistry>,
    pub store: Arc<dyn SubscriptionStore>,
    pub fetcher: Arc<BalanceFetcher<ExplorerClient>>,
    pub notifier: Arc<dyn Notifier>,
    pub audit: Arc<dyn AuditSink>,
}

impl App {
    /// Validate `config` and connect every component.
    ///
    /// With `in_memory` the subscription store lives in process memory and
    /// `database_url` is ignored.
    pub async fn build(config: Config, in_memory: bool) -> eyre::Result<Self> {
        config.validate().wrap_err("invalid configuration")?;
        let registry = Arc::new(config.registry()?);

        let store: Arc<dyn SubscriptionStore> = if in_memory {
            info!("Using in-memory subscription store");
            Arc::new(MemorySubscriptionStore::new())
        } else {
            let store = SqliteSubscriptionStore::new(&config.database_url).await?;
            store.run_migrations().await?;
            Arc::new(store)
        };

        let (notifier, audit) = delivery(&config)?;

        let explorer = &config.explorer;
        let api = ExplorerClient::new(&explorer.base_url, Duration::from_secs(explorer.timeout_secs))?;
        let credentials = Credentials::new(
            ApiKey::new(explorer.primary_key.as_str()),
            explorer.secondary_key.as_deref().map(ApiKey::new),
        );
        if credentials.primary().is_empty() {
            warn!("No explorer API key configured, balance checks will fail");
        }
        let fetcher = Arc::new(
            BalanceFetcher::new(api, credentials, config.scheduler.cache_ttl())
                .with_audit(Arc::clone(&audit)),
        );

        Ok(Self {
            config,
            registry,
            store,
            fetcher,
            notifier,
            audit,
        })
    }

    pub fn scheduler(&self) -> Scheduler<ExplorerClient> {
        Scheduler::new(
            Arc::clone(&self.fetcher),
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
        )
        .with_notifier(Arc::clone(&self.notifier))
        .with_audit(Arc::clone(&self.audit))
        .with_breaker(self.config.breaker.clone())
        .with_policy(self.config.scheduler.policy)
        .with_notify_delay(self.config.scheduler.notify_delay())
    }

    pub fn service(&self) -> ReminderService<ExplorerClient> {
        ReminderService::new(
            Arc::clone(&self.fetcher),
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
        )
    }
}

/// Telegram delivery when a bot token is configured, logging otherwise.
fn delivery(config: &Config) -> eyre::Result<(Arc<dyn Notifier>, Arc<dyn AuditSink>)> {
    let Some(telegram) = config
        .telegram
        .as_ref()
        .filter(|t| !t.bot_token.trim().is_empty())
    else {
        warn!("No Telegram bot token configured, notifications are only logged");
        return Ok((Arc::new(LogNotifier), Arc::new(LogAuditSink)));
    };

    let notifier = TelegramNotifier::new(telegram)?;
    let audit: Arc<dyn AuditSink> = match &telegram.admin_chat_id {
        Some(chat_id) => Arc::new(TelegramAuditSink::new(notifier.clone(), chat_id.clone())),
        None => Arc::new(LogAuditSink),
    };

    Ok((Arc::new(notifier), audit))
}
