use crate::{BalanceQuery, BalanceSnapshot, TokenBalanceApi};
use alloy_primitives::Address;
use client::{ApiKey, ClientError};
use notifier::{emit_best_effort, AuditEvent, AuditSink, LogAuditSink, Severity};
use std::{collections::HashMap, fmt, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, error, info, warn};

/// Which configured API key an attempt used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialSlot {
    Primary,
    Secondary,
}

impl fmt::Display for CredentialSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::Secondary => f.write_str("secondary"),
        }
    }
}

/// Explorer API keys in failover order.
#[derive(Debug, Clone)]
pub struct Credentials {
    primary: ApiKey,
    secondary: Option<ApiKey>,
}

impl Credentials {
    pub fn new(primary: ApiKey, secondary: Option<ApiKey>) -> Self {
        let secondary = secondary.filter(|key| !key.is_empty());
        Self { primary, secondary }
    }

    pub const fn primary(&self) -> &ApiKey {
        &self.primary
    }

    pub const fn secondary(&self) -> Option<&ApiKey> {
        self.secondary.as_ref()
    }

    /// Keys to try, the secondary only when it differs from the primary.
    fn attempts(&self) -> Vec<(CredentialSlot, &ApiKey)> {
        let mut attempts = vec![(CredentialSlot::Primary, &self.primary)];
        if let Some(secondary) = self.secondary.as_ref().filter(|k| **k != self.primary) {
            attempts.push((CredentialSlot::Secondary, secondary));
        }
        attempts
    }
}

/// One failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialFailure {
    pub slot: CredentialSlot,
    /// First 8 characters of the key
    pub key_prefix: String,
    pub error: String,
    pub transient: bool,
    /// Consecutive failures of this key including this one
    pub consecutive: u32,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// No primary API key configured; nothing was sent
    #[error("no explorer API key configured")]
    MissingCredentials,

    /// Every configured key failed
    #[error("all {} credential attempts failed", .0.len())]
    Exhausted(Vec<CredentialFailure>),
}

impl FetchError {
    /// True when every attempt failed in a way that looks temporary.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::MissingCredentials => false,
            Self::Exhausted(failures) => failures.iter().all(|f| f.transient),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    wallet: Address,
    contract: Address,
    chain_id: u64,
}

impl From<&BalanceQuery> for CacheKey {
    fn from(query: &BalanceQuery) -> Self {
        Self {
            wallet: query.wallet,
            contract: query.contract,
            chain_id: query.chain_id,
        }
    }
}

#[derive(Debug, Clone)]
struct CachedSnapshot {
    snapshot: BalanceSnapshot,
    expires_at: Instant,
}

/// Balance fetcher with key failover and a short-lived cache.
///
/// Cache and error counters belong to the instance; separate fetchers share
/// nothing.
pub struct BalanceFetcher<A> {
    api: A,
    credentials: Credentials,
    cache_ttl: Duration,
    cache: Mutex<HashMap<CacheKey, CachedSnapshot>>,
    error_counters: Mutex<HashMap<CredentialSlot, u32>>,
    audit: Arc<dyn AuditSink>,
}

impl<A> BalanceFetcher<A>
where
    A: TokenBalanceApi,
{
    pub fn new(api: A, credentials: Credentials, cache_ttl: Duration) -> Self {
        Self {
            api,
            credentials,
            cache_ttl,
            cache: Mutex::new(HashMap::new()),
            error_counters: Mutex::new(HashMap::new()),
            audit: Arc::new(LogAuditSink),
        }
    }

    /// Send diagnostics for exhausted fetches to `audit`.
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub const fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    /// Consecutive failures recorded for `slot`.
    pub async fn error_count(&self, slot: CredentialSlot) -> u32 {
        self.error_counters
            .lock()
            .await
            .get(&slot)
            .copied()
            .unwrap_or(0)
    }

    /// Drop any cached snapshot for `query`.
    pub async fn invalidate(&self, query: &BalanceQuery) {
        self.cache.lock().await.remove(&CacheKey::from(query));
    }

    /// Fetch the balance described by `query`.
    ///
    /// A live cache entry is returned without a network call unless
    /// `force_refresh` is set, in which case the entry is dropped first and
    /// replaced by the fresh result.
    pub async fn fetch_balance(
        &self,
        query: &BalanceQuery,
        force_refresh: bool,
    ) -> Result<BalanceSnapshot, FetchError> {
        let key = CacheKey::from(query);

        if force_refresh {
            self.cache.lock().await.remove(&key);
        } else if let Some(snapshot) = self.cached(&key).await {
            debug!(wallet = %query.wallet, "Balance cache hit");
            return Ok(snapshot);
        }

        if self.credentials.primary.is_empty() {
            error!(wallet = %query.wallet, "No explorer API key configured, cannot fetch balance");
            return Err(FetchError::MissingCredentials);
        }

        let mut failures = Vec::new();
        for (slot, api_key) in self.credentials.attempts() {
            match self
                .api
                .token_balance(query.chain_id, query.contract, query.wallet, api_key)
                .await
            {
                Ok(raw) => {
                    self.reset_errors(slot).await;
                    let snapshot = BalanceSnapshot::new(query, raw);
                    self.cache.lock().await.insert(
                        key,
                        CachedSnapshot {
                            snapshot: snapshot.clone(),
                            expires_at: Instant::now() + self.cache_ttl,
                        },
                    );
                    if slot == CredentialSlot::Secondary {
                        info!(wallet = %query.wallet, "Balance fetched with secondary API key");
                    }
                    return Ok(snapshot);
                }
                Err(e) => {
                    let failure = self.record_error(slot, api_key, &e).await;
                    failures.push(failure);
                }
            }
        }

        self.report_exhausted(query, &failures).await;
        Err(FetchError::Exhausted(failures))
    }

    async fn cached(&self, key: &CacheKey) -> Option<BalanceSnapshot> {
        let mut cache = self.cache.lock().await;
        match cache.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.snapshot.clone()),
            Some(_) => {
                cache.remove(key);
                None
            }
            None => None,
        }
    }

    async fn reset_errors(&self, slot: CredentialSlot) {
        self.error_counters.lock().await.insert(slot, 0);
    }

    async fn record_error(
        &self,
        slot: CredentialSlot,
        api_key: &ApiKey,
        error: &ClientError,
    ) -> CredentialFailure {
        let consecutive = {
            let mut counters = self.error_counters.lock().await;
            let count = counters.entry(slot).or_insert(0);
            *count = count.saturating_add(1);
            *count
        };
        let transient = error.is_transient();

        if transient {
            warn!(%slot, key = %api_key, consecutive, error = %error, "Balance request failed (transient)");
        } else {
            error!(%slot, key = %api_key, consecutive, error = %error, "Balance request failed");
        }

        CredentialFailure {
            slot,
            key_prefix: api_key.prefix(),
            error: error.to_string(),
            transient,
            consecutive,
        }
    }

    async fn report_exhausted(&self, query: &BalanceQuery, failures: &[CredentialFailure]) {
        let all_transient = failures.iter().all(|f| f.transient);
        let severity = if all_transient {
            Severity::Warning
        } else {
            Severity::Error
        };

        let primary_errors = self.error_count(CredentialSlot::Primary).await;
        let secondary_errors = self.error_count(CredentialSlot::Secondary).await;
        let secondary_prefix = self
            .credentials
            .secondary()
            .map(ApiKey::prefix)
            .unwrap_or_else(|| "none".to_string());
        let last_error = failures
            .last()
            .map(|f| f.error.clone())
            .unwrap_or_default();

        let event = AuditEvent::new(
            severity,
            "Balance fetch failed",
            format!(
                "All explorer API keys failed for {} on chain {}",
                query.wallet, query.chain_id
            ),
        )
        .with("wallet", query.wallet.to_string())
        .with("contract", query.contract.to_string())
        .with("chain_id", query.chain_id)
        .with("primary_key", self.credentials.primary.prefix())
        .with("primary_errors", primary_errors)
        .with("secondary_key", secondary_prefix)
        .with("secondary_errors", secondary_errors)
        .with("last_error", last_error);

        emit_best_effort(self.audit.as_ref(), event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, U256};
    use async_trait::async_trait;
    use notifier::NotifyError;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Scripted responses per API key, with a call log.
    #[derive(Default)]
    struct ScriptedApi {
        responses: StdMutex<HashMap<String, VecDeque<Result<U256, ClientError>>>>,
        calls: StdMutex<Vec<String>>,
    }

    impl ScriptedApi {
        fn respond(&self, key: &str, result: Result<U256, ClientError>) {
            self.responses
                .lock()
                .unwrap()
                .entry(key.to_string())
                .or_default()
                .push_back(result);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl TokenBalanceApi for Arc<ScriptedApi> {
        async fn token_balance(
            &self,
            _chain_id: u64,
            _contract: Address,
            _wallet: Address,
            api_key: &ApiKey,
        ) -> Result<U256, ClientError> {
            let key = api_key.expose().to_string();
            self.calls.lock().unwrap().push(key.clone());
            self.responses
                .lock()
                .unwrap()
                .get_mut(&key)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| Err(ClientError::Decode("no scripted response".into())))
        }
    }

    #[derive(Default)]
    struct RecordingAudit(StdMutex<Vec<AuditEvent>>);

    #[async_trait]
    impl AuditSink for RecordingAudit {
        async fn emit(&self, event: AuditEvent) -> Result<(), NotifyError> {
            self.0.lock().unwrap().push(event);
            Ok(())
        }
    }

    const PRIMARY: &str = "PRIMARYKEY-0001";
    const SECONDARY: &str = "SECONDARYKEY-0002";

    fn query() -> BalanceQuery {
        BalanceQuery {
            wallet: address!("1111111111111111111111111111111111111111"),
            contract: address!("55d398326f99059fF775485246999027B3197955"),
            chain_id: 56,
            symbol: "USDT".into(),
            decimals: 18,
        }
    }

    fn upstream(result: &str) -> ClientError {
        ClientError::Upstream {
            status: "0".into(),
            message: "NOTOK".into(),
            result: result.into(),
        }
    }

    fn one_token() -> U256 {
        U256::from(10u64).pow(U256::from(18u64))
    }

    fn fetcher(
        api: &Arc<ScriptedApi>,
        secondary: Option<&str>,
    ) -> (BalanceFetcher<Arc<ScriptedApi>>, Arc<RecordingAudit>) {
        let audit = Arc::new(RecordingAudit::default());
        let credentials = Credentials::new(ApiKey::new(PRIMARY), secondary.map(ApiKey::new));
        let fetcher = BalanceFetcher::new(api.clone(), credentials, Duration::from_secs(240))
            .with_audit(audit.clone());
        (fetcher, audit)
    }

    #[tokio::test]
    async fn test_primary_success_formats_and_caches() {
        let api = Arc::new(ScriptedApi::default());
        api.respond(PRIMARY, Ok("1234500000000000000".parse().unwrap()));
        let (fetcher, _) = fetcher(&api, Some(SECONDARY));

        let snapshot = fetcher.fetch_balance(&query(), false).await.unwrap();
        assert_eq!(snapshot.formatted, "1.2345");
        assert_eq!(snapshot.symbol, "USDT");

        // Served from cache: no second call.
        let cached = fetcher.fetch_balance(&query(), false).await.unwrap();
        assert_eq!(cached.raw, snapshot.raw);
        assert_eq!(api.calls(), vec![PRIMARY]);
    }

    #[tokio::test]
    async fn test_failover_to_secondary_once() {
        let api = Arc::new(ScriptedApi::default());
        api.respond(PRIMARY, Err(upstream("Max rate limit reached")));
        api.respond(SECONDARY, Ok(one_token()));
        let (fetcher, audit) = fetcher(&api, Some(SECONDARY));

        let snapshot = fetcher.fetch_balance(&query(), false).await.unwrap();
        assert_eq!(snapshot.formatted, "1");
        assert_eq!(api.calls(), vec![PRIMARY, SECONDARY]);
        assert_eq!(fetcher.error_count(CredentialSlot::Primary).await, 1);
        assert_eq!(fetcher.error_count(CredentialSlot::Secondary).await, 0);
        assert!(audit.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_identical_secondary_not_retried() {
        let api = Arc::new(ScriptedApi::default());
        api.respond(PRIMARY, Err(upstream("Invalid API Key")));
        let (fetcher, _) = fetcher(&api, Some(PRIMARY));

        let err = fetcher.fetch_balance(&query(), false).await.unwrap_err();
        assert!(matches!(err, FetchError::Exhausted(ref f) if f.len() == 1));
        assert_eq!(api.calls(), vec![PRIMARY]);
    }

    #[tokio::test]
    async fn test_both_fail_emits_masked_diagnostic() {
        let api = Arc::new(ScriptedApi::default());
        api.respond(PRIMARY, Err(upstream("Invalid API Key")));
        api.respond(SECONDARY, Err(upstream("Max rate limit reached")));
        let (fetcher, audit) = fetcher(&api, Some(SECONDARY));

        let err = fetcher.fetch_balance(&query(), false).await.unwrap_err();
        assert!(!err.is_transient());

        let events = audit.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.severity, Severity::Error);
        assert_eq!(event.metadata["primary_key"], "PRIMARYK");
        assert_eq!(event.metadata["secondary_key"], "SECONDAR");
        assert_eq!(event.metadata["primary_errors"], 1);
        assert_eq!(event.metadata["secondary_errors"], 1);
        let rendered = serde_json::to_string(event).unwrap();
        assert!(!rendered.contains(PRIMARY));
        assert!(!rendered.contains(SECONDARY));
    }

    #[tokio::test]
    async fn test_transient_failures_are_warnings() {
        let api = Arc::new(ScriptedApi::default());
        api.respond(PRIMARY, Err(upstream("Max rate limit reached")));
        api.respond(SECONDARY, Err(upstream("Service temporarily unavailable")));
        let (fetcher, audit) = fetcher(&api, Some(SECONDARY));

        let err = fetcher.fetch_balance(&query(), false).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(audit.0.lock().unwrap()[0].severity, Severity::Warning);
    }

    #[tokio::test]
    async fn test_counters_accumulate_and_reset() {
        let api = Arc::new(ScriptedApi::default());
        api.respond(PRIMARY, Err(upstream("NOTOK")));
        api.respond(PRIMARY, Err(upstream("NOTOK")));
        api.respond(PRIMARY, Ok(one_token()));
        let (fetcher, _) = fetcher(&api, None);

        assert!(fetcher.fetch_balance(&query(), false).await.is_err());
        assert!(fetcher.fetch_balance(&query(), false).await.is_err());
        assert_eq!(fetcher.error_count(CredentialSlot::Primary).await, 2);

        fetcher.fetch_balance(&query(), false).await.unwrap();
        assert_eq!(fetcher.error_count(CredentialSlot::Primary).await, 0);
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_and_overwrites_cache() {
        let api = Arc::new(ScriptedApi::default());
        api.respond(PRIMARY, Ok(one_token()));
        api.respond(PRIMARY, Ok(one_token() * U256::from(2u8)));
        let (fetcher, _) = fetcher(&api, None);

        fetcher.fetch_balance(&query(), false).await.unwrap();
        let fresh = fetcher.fetch_balance(&query(), true).await.unwrap();
        assert_eq!(fresh.formatted, "2");

        let cached = fetcher.fetch_balance(&query(), false).await.unwrap();
        assert_eq!(cached.formatted, "2");
        assert_eq!(api.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_leaves_no_stale_entry() {
        let api = Arc::new(ScriptedApi::default());
        api.respond(PRIMARY, Ok(one_token()));
        api.respond(PRIMARY, Err(upstream("NOTOK")));
        let (fetcher, _) = fetcher(&api, None);

        fetcher.fetch_balance(&query(), false).await.unwrap();
        assert!(fetcher.fetch_balance(&query(), true).await.is_err());
        // Next plain fetch must go to the network again.
        assert!(fetcher.fetch_balance(&query(), false).await.is_err());
        assert_eq!(api.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_expires_after_ttl() {
        let api = Arc::new(ScriptedApi::default());
        api.respond(PRIMARY, Ok(one_token()));
        api.respond(PRIMARY, Ok(one_token()));
        let (fetcher, _) = fetcher(&api, None);

        fetcher.fetch_balance(&query(), false).await.unwrap();
        tokio::time::advance(Duration::from_secs(241)).await;
        fetcher.fetch_balance(&query(), false).await.unwrap();
        assert_eq!(api.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_primary_key() {
        let api = Arc::new(ScriptedApi::default());
        let fetcher = BalanceFetcher::new(
            api.clone(),
            Credentials::new(ApiKey::new(""), None),
            Duration::from_secs(60),
        );

        let err = fetcher.fetch_balance(&query(), false).await.unwrap_err();
        assert_eq!(err, FetchError::MissingCredentials);
        assert!(api.calls().is_empty());
    }
}
