//! Consecutive-failure circuit breaker.
//!
//! Counts consecutive upstream failures. Once the count reaches the failure
//! threshold the breaker reports itself suspended until the cooldown window
//! since the last failure has elapsed; the first check after that resets the
//! count. Separately, reaching the escalation threshold is reported exactly
//! once per failure episode so the caller can alert operators.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_escalation_threshold() -> u32 {
    3
}

const fn default_cooldown_secs() -> u64 {
    30 * 60
}

/// Breaker tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that suspend scheduling
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Consecutive failures that trigger the operator escalation
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: u32,
    /// How long a suspension lasts after the last failure, in seconds
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            escalation_threshold: default_escalation_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl BreakerConfig {
    pub const fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Describe the first inconsistency, if any.
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 || self.escalation_threshold == 0 {
            return Err("breaker thresholds must be at least 1".into());
        }
        if self.escalation_threshold > self.failure_threshold {
            return Err(format!(
                "escalation_threshold ({}) must not exceed failure_threshold ({})",
                self.escalation_threshold, self.failure_threshold
            ));
        }
        Ok(())
    }
}

/// What a recorded failure means for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    /// Failures in a row including this one
    pub consecutive: u32,
    /// Escalation threshold was reached by this failure
    pub escalate: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    escalated: bool,
}

impl CircuitBreaker {
    pub const fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            consecutive_failures: 0,
            last_failure_at: None,
            escalated: false,
        }
    }

    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub const fn last_failure_at(&self) -> Option<Instant> {
        self.last_failure_at
    }

    pub const fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Close the current failure episode.
    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 {
            info!(
                failures = self.consecutive_failures,
                "Upstream recovered, resetting breaker"
            );
        }
        self.consecutive_failures = 0;
        self.escalated = false;
    }

    pub fn record_failure(&mut self) -> FailureOutcome {
        self.record_failure_at(Instant::now())
    }

    pub fn record_failure_at(&mut self, now: Instant) -> FailureOutcome {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure_at = Some(now);

        let escalate =
            !self.escalated && self.consecutive_failures >= self.config.escalation_threshold;
        if escalate {
            self.escalated = true;
        }

        if self.consecutive_failures == self.config.failure_threshold {
            warn!(
                failures = self.consecutive_failures,
                cooldown_secs = self.config.cooldown_secs,
                "Failure threshold reached, suspending scheduling"
            );
        }

        FailureOutcome {
            consecutive: self.consecutive_failures,
            escalate,
        }
    }

    pub fn is_suspended(&mut self) -> bool {
        self.is_suspended_at(Instant::now())
    }

    /// Whether scheduling is suspended at `now`.
    ///
    /// An expired suspension resets the counter here rather than eagerly.
    pub fn is_suspended_at(&mut self, now: Instant) -> bool {
        if self.consecutive_failures < self.config.failure_threshold {
            return false;
        }

        let within_cooldown = self
            .last_failure_at
            .is_some_and(|last| now.saturating_duration_since(last) < self.config.cooldown());
        if within_cooldown {
            return true;
        }

        info!(
            failures = self.consecutive_failures,
            "Breaker cooldown elapsed, resuming scheduling"
        );
        self.consecutive_failures = 0;
        self.escalated = false;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            failure_threshold: 3,
            escalation_threshold: 2,
            cooldown_secs: 600,
        })
    }

    #[test]
    fn test_suspends_after_threshold_within_cooldown() {
        let mut breaker = breaker();
        let t0 = Instant::now();

        breaker.record_failure_at(t0);
        breaker.record_failure_at(t0);
        assert!(!breaker.is_suspended_at(t0));

        breaker.record_failure_at(t0 + Duration::from_secs(1));
        assert!(breaker.is_suspended_at(t0 + Duration::from_secs(2)));
        assert!(breaker.is_suspended_at(t0 + Duration::from_secs(600)));
    }

    #[test]
    fn test_cooldown_resets_lazily() {
        let mut breaker = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            breaker.record_failure_at(t0);
        }

        // Counter is untouched until the next check.
        assert_eq!(breaker.consecutive_failures(), 3);
        assert!(!breaker.is_suspended_at(t0 + Duration::from_secs(601)));
        assert_eq!(breaker.consecutive_failures(), 0);
        assert!(!breaker.is_suspended_at(t0 + Duration::from_secs(602)));
    }

    #[test]
    fn test_success_resets() {
        let mut breaker = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            breaker.record_failure_at(t0);
        }
        breaker.record_success();
        assert_eq!(breaker.consecutive_failures(), 0);
        assert!(!breaker.is_suspended_at(t0));
    }

    #[test]
    fn test_escalates_once_per_episode() {
        let mut breaker = breaker();
        let t0 = Instant::now();

        let outcomes: Vec<_> = (0..5).map(|_| breaker.record_failure_at(t0)).collect();
        let escalations: Vec<_> = outcomes.iter().map(|o| o.escalate).collect();
        assert_eq!(escalations, vec![false, true, false, false, false]);
        assert_eq!(outcomes[4].consecutive, 5);

        // New episode after recovery escalates again.
        breaker.record_success();
        assert!(!breaker.record_failure_at(t0).escalate);
        assert!(breaker.record_failure_at(t0).escalate);
    }

    #[test]
    fn test_cooldown_reset_starts_new_episode() {
        let mut breaker = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            breaker.record_failure_at(t0);
        }
        let later = t0 + Duration::from_secs(700);
        assert!(!breaker.is_suspended_at(later));

        breaker.record_failure_at(later);
        assert!(breaker.record_failure_at(later).escalate);
    }

    #[test]
    fn test_config_validation() {
        assert!(BreakerConfig::default().validate().is_ok());
        let bad = BreakerConfig {
            failure_threshold: 2,
            escalation_threshold: 3,
            cooldown_secs: 1,
        };
        assert!(bad.validate().is_err());
        let zero = BreakerConfig {
            failure_threshold: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
    }
}
