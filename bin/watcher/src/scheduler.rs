//! Periodic balance checks and alert dispatch.
//!
//! Each tick lists the active subscriptions, fetches one balance per target
//! that needs it and compares it against every subscriber's threshold. Two
//! policies are supported:
//!
//! - [`SchedulePolicy::PerSubscription`] fetches for the subscriptions whose
//!   own interval has elapsed and alerts immediately.
//! - [`SchedulePolicy::PerTarget`] fetches once per target and fans out to its
//!   subscribers after a fixed delay.
//!
//! A failed fetch never produces an alert or a bookkeeping update. Consecutive
//! failures feed a [`CircuitBreaker`] that suspends ticks for a cooldown and
//! escalates once per failure episode.

use std::{
    collections::{HashMap, HashSet},
    future::Future,
    sync::{Arc, Mutex as StdMutex, PoisonError},
    time::Duration,
};

use balance::{
    units::parse_units, BalanceFetcher, BalanceQuery, BalanceSnapshot, FetchError,
    TokenBalanceApi,
};
use breaker::{BreakerConfig, CircuitBreaker};
use chrono::{DateTime, TimeDelta, Utc};
use config::{TargetConfig, TargetRegistry};
use notifier::{
    emit_best_effort, AuditEvent, AuditSink, LogAuditSink, LogNotifier, Notifier, Severity,
};
use serde::{Deserialize, Serialize};
use subscription::{Subscription, SubscriptionStore};
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::{message, metrics::Metrics};

const DEFAULT_NOTIFY_DELAY: Duration = Duration::from_secs(5 * 60);

/// How subscriptions are turned into balance checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulePolicy {
    /// Check each subscription on its own interval and alert immediately.
    #[default]
    PerSubscription,
    /// Fetch once per target, then notify its subscribers after a delay.
    PerTarget,
}

/// Outcome of comparing one balance against a target's subscribers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluationReport {
    pub target: String,
    /// Subscriptions whose check was recorded
    pub checked: usize,
    pub alerts_sent: usize,
    pub alerts_failed: usize,
    /// Subscriptions left alone because their interval had not elapsed
    pub not_due: usize,
    /// Subscriptions ignored for a zero or unusable threshold
    pub ignored: usize,
}

/// Outcome of a single tick.
#[derive(Debug, Default)]
pub struct TickReport {
    /// The breaker was open; nothing was fetched
    pub skipped: bool,
    /// Targets fetched successfully
    pub fetched: usize,
    /// Targets whose fetch failed
    pub failed: usize,
    /// Targets that could not be queried because of missing configuration
    pub misconfigured: usize,
    /// Evaluations completed during the tick
    pub evaluations: Vec<EvaluationReport>,
    /// Fan-outs scheduled to run after the notify delay
    pub deferred: Vec<JoinHandle<EvaluationReport>>,
}

impl TickReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    /// Wait for every deferred fan-out and return all evaluations.
    pub async fn settle(mut self) -> Vec<EvaluationReport> {
        for handle in self.deferred.drain(..) {
            match handle.await {
                Ok(report) => self.evaluations.push(report),
                Err(e) => error!(error = %e, "Deferred notification task failed"),
            }
        }
        self.evaluations
    }

    pub fn alerts_sent(&self) -> usize {
        self.evaluations.iter().map(|e| e.alerts_sent).sum()
    }
}

/// Compares balances with thresholds, notifies and records the outcome.
///
/// Cheap to clone so deferred fan-outs can own one.
#[derive(Clone)]
struct Dispatcher {
    store: Arc<dyn SubscriptionStore>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditSink>,
    metrics: Metrics,
}

impl Dispatcher {
    async fn evaluate(
        &self,
        target: &TargetConfig,
        snapshot: &BalanceSnapshot,
        subscriptions: Vec<Subscription>,
        now: DateTime<Utc>,
    ) -> EvaluationReport {
        let mut report = EvaluationReport {
            target: target.name.clone(),
            ..EvaluationReport::default()
        };

        for sub in subscriptions {
            if !sub.is_due(now) {
                report.not_due += 1;
                continue;
            }

            let threshold = match parse_units(&sub.threshold, snapshot.decimals) {
                Ok(threshold) if threshold.is_zero() => {
                    debug!(key = %sub.key(), "Threshold is zero, alert disabled");
                    report.ignored += 1;
                    continue;
                }
                Ok(threshold) => threshold,
                Err(e) => {
                    warn!(key = %sub.key(), threshold = %sub.threshold, error = %e, "Unusable threshold, skipping");
                    report.ignored += 1;
                    continue;
                }
            };

            let key = sub.key();
            if threshold > snapshot.raw {
                let payload = message::low_balance_alert(target, snapshot, &sub.threshold);
                match self.notifier.send(&sub.subscriber_id, &payload).await {
                    Ok(()) => {
                        info!(%key, balance = %snapshot.formatted, threshold = %sub.threshold, "Low balance alert sent");
                        self.store.record_alert(&key).await;
                        self.metrics.record_alert_sent(&target.name);
                        report.alerts_sent += 1;
                    }
                    Err(e) => {
                        warn!(%key, error = %e, "Failed to deliver low balance alert");
                        self.metrics.record_alert_failed(&target.name);
                        report.alerts_failed += 1;
                        let event = AuditEvent::new(
                            Severity::Warning,
                            "Alert delivery failed",
                            format!("Could not notify {} about {}: {}", sub.subscriber_id, target.label(), e),
                        )
                        .with("subscriber_id", sub.subscriber_id.as_str())
                        .with("target", target.name.as_str())
                        .with("balance", snapshot.formatted.as_str())
                        .with("threshold", sub.threshold.as_str());
                        emit_best_effort(self.audit.as_ref(), event).await;
                    }
                }
            }

            self.store.record_check(&key, &snapshot.formatted).await;
            report.checked += 1;
        }

        report
    }
}

/// Drives balance checks for all active subscriptions.
pub struct Scheduler<A> {
    fetcher: Arc<BalanceFetcher<A>>,
    registry: Arc<TargetRegistry>,
    dispatcher: Dispatcher,
    breaker: Mutex<CircuitBreaker>,
    policy: SchedulePolicy,
    notify_delay: Duration,
    // Targets with a fan-out still waiting to run.
    pending: Arc<StdMutex<HashSet<String>>>,
}

impl<A> Scheduler<A>
where
    A: TokenBalanceApi,
{
    /// Scheduler that logs instead of notifying, with default policy and breaker.
    pub fn new(
        fetcher: Arc<BalanceFetcher<A>>,
        store: Arc<dyn SubscriptionStore>,
        registry: Arc<TargetRegistry>,
    ) -> Self {
        Self {
            fetcher,
            registry,
            dispatcher: Dispatcher {
                store,
                notifier: Arc::new(LogNotifier),
                audit: Arc::new(LogAuditSink),
                metrics: Metrics::new(),
            },
            breaker: Mutex::new(CircuitBreaker::new(BreakerConfig::default())),
            policy: SchedulePolicy::default(),
            notify_delay: DEFAULT_NOTIFY_DELAY,
            pending: Arc::new(StdMutex::new(HashSet::new())),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.dispatcher.notifier = notifier;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.dispatcher.audit = audit;
        self
    }

    pub fn with_breaker(mut self, config: BreakerConfig) -> Self {
        self.breaker = Mutex::new(CircuitBreaker::new(config));
        self
    }

    pub const fn with_policy(mut self, policy: SchedulePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub const fn with_notify_delay(mut self, delay: Duration) -> Self {
        self.notify_delay = delay;
        self
    }

    pub const fn policy(&self) -> SchedulePolicy {
        self.policy
    }

    pub async fn consecutive_failures(&self) -> u32 {
        self.breaker.lock().await.consecutive_failures()
    }

    pub async fn tick(&self) -> TickReport {
        self.tick_at(Utc::now()).await
    }

    /// Run one tick, judging subscription intervals against `now`.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let started = Instant::now();

        if self.breaker.lock().await.is_suspended() {
            info!("Circuit breaker open, skipping tick");
            self.dispatcher.metrics.record_tick_skipped();
            return TickReport::skipped();
        }

        let active = self.dispatcher.store.list_active().await;
        let plan = self.plan(&active, now).await;
        debug!(subscriptions = active.len(), targets = plan.len(), policy = ?self.policy, "Tick planned");

        let mut report = TickReport::default();
        for (target, due) in plan {
            let query = match target.resolve() {
                Ok(resolved) => BalanceQuery::from(&resolved),
                Err(e) => {
                    error!(target = %target.name, error = %e, "Target misconfigured, cannot check balance");
                    report.misconfigured += 1;
                    continue;
                }
            };

            match self.fetcher.fetch_balance(&query, false).await {
                Ok(snapshot) => {
                    report.fetched += 1;
                    self.on_fetch_success(&target, &snapshot).await;
                    match self.policy {
                        SchedulePolicy::PerSubscription => {
                            let evaluation =
                                self.dispatcher.evaluate(&target, &snapshot, due, now).await;
                            report.evaluations.push(evaluation);
                        }
                        SchedulePolicy::PerTarget => {
                            report.deferred.push(self.spawn_fan_out(target, snapshot, now));
                        }
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    self.on_fetch_failure(&target, &e, &active).await;
                }
            }
        }

        self.dispatcher.metrics.record_tick(started.elapsed());
        report
    }

    /// Group the subscriptions that need a fetch by target, in priority order.
    async fn plan(
        &self,
        active: &[Subscription],
        now: DateTime<Utc>,
    ) -> Vec<(TargetConfig, Vec<Subscription>)> {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let mut by_target: HashMap<&str, Vec<Subscription>> = HashMap::new();

        for sub in active.iter().filter(|s| s.is_due(now)) {
            let name = sub.target.as_deref().unwrap_or(self.registry.default_name());
            match self.registry.get(name) {
                Some(target) if target.active => {
                    by_target.entry(&target.name).or_default().push(sub.clone());
                }
                Some(_) => debug!(key = %sub.key(), "Target inactive, skipping subscription"),
                None => warn!(key = %sub.key(), "Subscription references an unknown target"),
            }
        }

        self.registry
            .active_by_priority()
            .into_iter()
            .filter(|target| {
                self.policy == SchedulePolicy::PerSubscription || !pending.contains(&target.name)
            })
            .filter_map(|target| {
                by_target
                    .remove(target.name.as_str())
                    .map(|subs| (target.clone(), subs))
            })
            .collect()
    }

    async fn on_fetch_success(&self, target: &TargetConfig, snapshot: &BalanceSnapshot) {
        let metrics = &self.dispatcher.metrics;
        metrics.record_fetch_success(&target.name, &snapshot.formatted);

        let mut breaker = self.breaker.lock().await;
        breaker.record_success();
        metrics.set_consecutive_failures(breaker.consecutive_failures());
        debug!(target = %target.name, balance = %snapshot.formatted, "Balance fetched");
    }

    async fn on_fetch_failure(&self, target: &TargetConfig, err: &FetchError, active: &[Subscription]) {
        let metrics = &self.dispatcher.metrics;
        metrics.record_fetch_failure(&target.name);

        let outcome = {
            let mut breaker = self.breaker.lock().await;
            let outcome = breaker.record_failure();
            metrics.set_consecutive_failures(outcome.consecutive);
            outcome
        };

        if err.is_transient() {
            warn!(target = %target.name, consecutive = outcome.consecutive, error = %err, "Balance fetch failed");
        } else {
            error!(target = %target.name, consecutive = outcome.consecutive, error = %err, "Balance fetch failed");
        }

        if outcome.escalate {
            let event = escalation_event(target, err, outcome.consecutive, active);
            emit_best_effort(self.dispatcher.audit.as_ref(), event).await;
        }
    }

    fn spawn_fan_out(
        &self,
        target: TargetConfig,
        snapshot: BalanceSnapshot,
        now: DateTime<Utc>,
    ) -> JoinHandle<EvaluationReport> {
        let claim = PendingFanOut::claim(&self.pending, &target.name);
        let dispatcher = self.dispatcher.clone();
        let default_name = self.registry.default_name().to_string();
        let delay = self.notify_delay;
        let due_at = now + TimeDelta::from_std(delay).unwrap_or(TimeDelta::zero());

        tokio::spawn(async move {
            let _claim = claim;
            time::sleep(delay).await;

            let subscriptions: Vec<_> = dispatcher
                .store
                .list_active()
                .await
                .into_iter()
                .filter(|s| s.target.as_deref().unwrap_or(&default_name) == target.name)
                .collect();
            dispatcher
                .evaluate(&target, &snapshot, subscriptions, due_at)
                .await
        })
    }

    /// Tick every `period` until `shutdown` resolves.
    ///
    /// A shutdown requested while a tick is running ends the loop once that
    /// tick returns. Deferred fan-outs still waiting are dropped.
    pub async fn run<F>(&self, period: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.tick().await;
                    info!(
                        skipped = report.skipped,
                        fetched = report.fetched,
                        failed = report.failed,
                        misconfigured = report.misconfigured,
                        alerts_sent = report.alerts_sent(),
                        deferred = report.deferred.len(),
                        "Tick complete"
                    );
                }
                () = &mut shutdown => {
                    info!("Shutting down, pending notifications are dropped");
                    break;
                }
            }
        }
    }
}

/// Marks a target as having a fan-out in flight.
///
/// Released on drop, so a fan-out that panics or is aborted does not keep
/// its target out of later ticks.
struct PendingFanOut {
    pending: Arc<StdMutex<HashSet<String>>>,
    target: String,
}

impl PendingFanOut {
    fn claim(pending: &Arc<StdMutex<HashSet<String>>>, target: &str) -> Self {
        pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target.to_string());
        Self {
            pending: Arc::clone(pending),
            target: target.to_string(),
        }
    }
}

impl Drop for PendingFanOut {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.target);
    }
}

/// Operator summary of everyone affected by a failing upstream.
fn escalation_event(
    target: &TargetConfig,
    err: &FetchError,
    consecutive: u32,
    active: &[Subscription],
) -> AuditEvent {
    let mut description = format!(
        "{consecutive} consecutive balance fetches failed (last: {}: {err}).\nActive subscriptions: {}",
        target.name,
        active.len()
    );
    for sub in active {
        let last_checked = sub
            .last_checked_at
            .map_or_else(|| "never".to_string(), |t| t.to_rfc3339());
        description.push_str(&format!(
            "\n- {} threshold={} interval={}m last_checked={} alerts={}",
            sub.key(),
            sub.threshold,
            sub.check_interval_minutes,
            last_checked,
            sub.alert_count
        ));
    }

    AuditEvent::new(Severity::Error, "Balance checks failing", description)
        .with("consecutive_failures", consecutive)
        .with("target", target.name.as_str())
        .with("active_subscriptions", active.len())
        .with("last_error", err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_fan_out_released_on_panic() {
        let pending = Arc::new(StdMutex::new(HashSet::new()));

        let claim = PendingFanOut::claim(&pending, "main");
        assert!(pending.lock().unwrap().contains("main"));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _claim = claim;
            panic!("fan-out failed");
        }));
        assert!(result.is_err());
        assert!(pending.lock().unwrap().is_empty());
    }

    #[test]
    fn test_policy_serde() {
        let policy: SchedulePolicy = serde_json::from_str("\"per_target\"").unwrap();
        assert_eq!(policy, SchedulePolicy::PerTarget);
        assert_eq!(SchedulePolicy::default(), SchedulePolicy::PerSubscription);
    }

    #[test]
    fn test_escalation_summary_lists_subscriptions() {
        let target = config::TargetConfigBuilder::new("main").build();
        let now = Utc::now();
        let sub = Subscription {
            subscriber_id: "42".into(),
            target: None,
            threshold: "300".into(),
            check_interval_minutes: 30,
            is_active: true,
            last_checked_at: None,
            last_alert_at: None,
            alert_count: 2,
            last_balance: None,
            created_at: now,
            updated_at: now,
        };

        let event = escalation_event(&target, &FetchError::MissingCredentials, 3, &[sub]);
        assert_eq!(event.severity, Severity::Error);
        assert_eq!(event.metadata["active_subscriptions"], 1);
        assert!(event.description.contains("42 threshold=300 interval=30m last_checked=never alerts=2"));
    }
}
