//! Monitored target (partner) configuration.
//!
//! A target is a named wallet + token + chain tuple whose balance is polled
//! on behalf of subscribers.

use alloy_primitives::{address, Address};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// BNB Smart Chain mainnet chain id.
pub const BSC_CHAIN_ID: u64 = 56;

/// BSC-USD (Binance-Peg USDT) token contract on BSC mainnet.
// https://bscscan.com/token/0x55d398326f99059fF775485246999027B3197955
pub const BSC_USDT: Address = address!("0x55d398326f99059fF775485246999027B3197955");

/// Largest number of decimals whose power of ten still fits in a `U256`.
pub const MAX_DECIMALS: u8 = 77;

/// Upper bound of any check interval, in minutes (one day).
pub const MAX_INTERVAL_MINUTES: u32 = 1440;

const fn default_active() -> bool {
    true
}

const fn default_min_interval() -> u32 {
    30
}

const fn default_chain_id() -> u64 {
    BSC_CHAIN_ID
}

const fn default_contract() -> Option<Address> {
    Some(BSC_USDT)
}

const fn default_decimals() -> u8 {
    18
}

fn default_symbol() -> String {
    "USDT".to_string()
}

/// A monitored target as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Stable unique key
    pub name: String,
    /// Human readable name used in messages
    #[serde(default)]
    pub display_name: Option<String>,
    /// Wallet whose balance is reported
    #[serde(default)]
    pub wallet: Option<Address>,
    /// Token contract address, USDT on BSC unless set
    #[serde(default = "default_contract")]
    pub contract: Option<Address>,
    /// Chain id passed to the explorer API
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    /// Token symbol
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// Token decimals
    #[serde(default = "default_decimals")]
    pub decimals: u8,
    /// Soft-delete flag; inactive targets are never polled
    #[serde(default = "default_active")]
    pub active: bool,
    /// Display priority, lower first
    #[serde(default)]
    pub priority: i32,
    /// Smallest check interval subscribers may pick for this target
    #[serde(default = "default_min_interval")]
    pub min_interval_minutes: u32,
}

impl TargetConfig {
    /// USDT on BSC mainnet for the given wallet.
    pub fn bsc_usdt(name: impl Into<String>, wallet: Address) -> Self {
        TargetConfigBuilder::new(name).wallet(wallet).build()
    }

    /// Name shown to users, falls back to the key.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// Check that everything needed to query a balance is present.
    pub fn resolve(&self) -> Result<ResolvedTarget, ConfigError> {
        let wallet = self
            .wallet
            .ok_or_else(|| ConfigError::MissingWallet(self.name.clone()))?;
        let contract = self
            .contract
            .ok_or_else(|| ConfigError::MissingContract(self.name.clone()))?;

        Ok(ResolvedTarget {
            name: self.name.clone(),
            wallet,
            contract,
            chain_id: self.chain_id,
            symbol: self.symbol.clone(),
            decimals: self.decimals,
        })
    }

    /// Whether `minutes` is an acceptable check interval for this target.
    pub const fn accepts_interval(&self, minutes: u32) -> bool {
        minutes >= self.min_interval_minutes && minutes <= MAX_INTERVAL_MINUTES
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("target name must not be empty".into()));
        }
        if self.decimals > MAX_DECIMALS {
            return Err(ConfigError::Invalid(format!(
                "target {}: decimals {} exceeds {}",
                self.name, self.decimals, MAX_DECIMALS
            )));
        }
        if self.min_interval_minutes == 0 || self.min_interval_minutes > MAX_INTERVAL_MINUTES {
            return Err(ConfigError::Invalid(format!(
                "target {}: min_interval_minutes must be in [1, {}]",
                self.name, MAX_INTERVAL_MINUTES
            )));
        }
        Ok(())
    }
}

/// A target with every field required for a balance query present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub name: String,
    pub wallet: Address,
    pub contract: Address,
    pub chain_id: u64,
    pub symbol: String,
    pub decimals: u8,
}

/// Builder for custom targets, starting from BSC/USDT defaults.
#[derive(Debug, Clone)]
pub struct TargetConfigBuilder {
    target: TargetConfig,
}

impl TargetConfigBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            target: TargetConfig {
                name: name.into(),
                display_name: None,
                wallet: None,
                contract: Some(BSC_USDT),
                chain_id: BSC_CHAIN_ID,
                symbol: default_symbol(),
                decimals: default_decimals(),
                active: true,
                priority: 0,
                min_interval_minutes: default_min_interval(),
            },
        }
    }

    pub fn display_name(mut self, display_name: impl Into<String>) -> Self {
        self.target.display_name = Some(display_name.into());
        self
    }

    pub const fn wallet(mut self, wallet: Address) -> Self {
        self.target.wallet = Some(wallet);
        self
    }

    /// Override the token contract and its metadata.
    pub fn token(mut self, contract: Address, symbol: impl Into<String>, decimals: u8) -> Self {
        self.target.contract = Some(contract);
        self.target.symbol = symbol.into();
        self.target.decimals = decimals;
        self
    }

    pub const fn chain_id(mut self, chain_id: u64) -> Self {
        self.target.chain_id = chain_id;
        self
    }

    pub const fn priority(mut self, priority: i32) -> Self {
        self.target.priority = priority;
        self
    }

    pub const fn min_interval_minutes(mut self, minutes: u32) -> Self {
        self.target.min_interval_minutes = minutes;
        self
    }

    pub const fn inactive(mut self) -> Self {
        self.target.active = false;
        self
    }

    pub fn build(self) -> TargetConfig {
        self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WALLET: Address = address!("1111111111111111111111111111111111111111");

    #[test]
    fn test_bsc_usdt_preset() {
        let target = TargetConfig::bsc_usdt("main", WALLET);
        assert_eq!(target.chain_id, 56);
        assert_eq!(target.contract, Some(BSC_USDT));
        assert_eq!(target.decimals, 18);
        assert_eq!(target.label(), "main");

        let resolved = target.resolve().unwrap();
        assert_eq!(resolved.wallet, WALLET);
    }

    #[test]
    fn test_resolve_missing_wallet() {
        let target = TargetConfigBuilder::new("empty").build();
        assert!(matches!(
            target.resolve(),
            Err(ConfigError::MissingWallet(name)) if name == "empty"
        ));
    }

    #[test]
    fn test_interval_bounds() {
        let target = TargetConfigBuilder::new("fast")
            .wallet(WALLET)
            .min_interval_minutes(5)
            .build();
        assert!(!target.accepts_interval(4));
        assert!(target.accepts_interval(5));
        assert!(target.accepts_interval(1440));
        assert!(!target.accepts_interval(1441));
    }

    #[test]
    fn test_deserialize_defaults() {
        let target: TargetConfig = toml::from_str(
            r#"
            name = "partner-a"
            display_name = "Partner A"
            wallet = "0x1111111111111111111111111111111111111111"
            contract = "0x55d398326f99059fF775485246999027B3197955"
            "#,
        )
        .unwrap();

        assert_eq!(target.chain_id, BSC_CHAIN_ID);
        assert_eq!(target.symbol, "USDT");
        assert!(target.active);
        assert_eq!(target.min_interval_minutes, 30);
        assert_eq!(target.label(), "Partner A");
    }

    #[test]
    fn test_deserialize_without_contract_matches_builder() {
        let target: TargetConfig = toml::from_str(
            r#"
            name = "partner-b"
            wallet = "0x1111111111111111111111111111111111111111"
            "#,
        )
        .unwrap();

        assert_eq!(target.contract, Some(BSC_USDT));
        assert_eq!(target.contract, TargetConfigBuilder::new("partner-b").build().contract);
        assert_eq!(target.resolve().unwrap().contract, BSC_USDT);
    }
}
