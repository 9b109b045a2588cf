//! Token balance fetching for monitored wallets.
//!
//! This crate provides the [`BalanceFetcher`](fetcher::BalanceFetcher): it
//! queries an explorer API with a primary and an optional secondary API key,
//! caches snapshots briefly, and tracks consecutive failures per key.

pub mod explorer;
pub mod fetcher;
pub mod units;

pub use fetcher::{BalanceFetcher, CredentialFailure, CredentialSlot, Credentials, FetchError};

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use client::{ApiKey, ClientError};
use config::ResolvedTarget;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// What to query: a token balance of a wallet on a chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BalanceQuery {
    /// Wallet holding the tokens
    pub wallet: Address,
    /// Token contract
    pub contract: Address,
    /// Chain id understood by the explorer
    pub chain_id: u64,
    /// Token symbol, for display
    pub symbol: String,
    /// Token decimals
    pub decimals: u8,
}

impl From<&ResolvedTarget> for BalanceQuery {
    fn from(target: &ResolvedTarget) -> Self {
        Self {
            wallet: target.wallet,
            contract: target.contract,
            chain_id: target.chain_id,
            symbol: target.symbol.clone(),
            decimals: target.decimals,
        }
    }
}

/// A single balance observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub wallet: Address,
    pub contract: Address,
    pub chain_id: u64,
    /// Raw on-chain integer amount
    pub raw: U256,
    /// Display form, see [`units::format_units`]
    pub formatted: String,
    pub symbol: String,
    pub decimals: u8,
    pub fetched_at: DateTime<Utc>,
}

impl BalanceSnapshot {
    pub fn new(query: &BalanceQuery, raw: U256) -> Self {
        Self {
            wallet: query.wallet,
            contract: query.contract,
            chain_id: query.chain_id,
            raw,
            formatted: units::format_units(raw, query.decimals),
            symbol: query.symbol.clone(),
            decimals: query.decimals,
            fetched_at: Utc::now(),
        }
    }
}

/// Source of raw token balances.
pub trait TokenBalanceApi: Send + Sync {
    /// Fetch the raw balance of `wallet` for `contract` using `api_key`.
    fn token_balance(
        &self,
        chain_id: u64,
        contract: Address,
        wallet: Address,
        api_key: &ApiKey,
    ) -> impl Future<Output = Result<U256, ClientError>> + Send;
}
