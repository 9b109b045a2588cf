//! HTTP client for Etherscan-compatible explorer APIs.
//!
//! Only the `account/tokenbalance` endpoint is used: it returns the raw
//! integer token balance of a wallet for a given contract and chain.

use alloy_primitives::{Address, U256};
use reqwest::Url;
use serde::Deserialize;
use std::{fmt, time::Duration};
use thiserror::Error;
use tracing::debug;

/// Default Etherscan V2 multichain endpoint.
pub const ETHERSCAN_V2_URL: &str = "https://api.etherscan.io/v2/api";

/// Substrings marking an upstream error as likely to clear on its own.
const TRANSIENT_MARKERS: [&str; 3] = ["rate limit", "maintenance", "temporarily unavailable"];

#[derive(Error, Debug)]
pub enum ClientError {
    /// Error parsing or validating URLs
    #[error("Invalid API URL: {0}")]
    InvalidUrl(String),

    /// Error building the HTTP client or sending the request
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-success HTTP status
    #[error("HTTP status {0}")]
    Http(u16),

    /// Well-formed response that does not signal success
    #[error("Upstream error: status={status} message={message} result={result}")]
    Upstream {
        status: String,
        message: String,
        result: String,
    },

    /// Response body could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Successful response with a result that is not an integer
    #[error("Invalid balance in response: {0}")]
    InvalidBalance(String),
}

impl ClientError {
    /// Whether the failure looks like it will clear without intervention.
    ///
    /// Used for log severity only; every error counts as a failure.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Http(status) => *status == 429 || *status >= 500,
            other => {
                let text = other.to_string().to_lowercase();
                TRANSIENT_MARKERS.iter().any(|m| text.contains(m))
            }
        }
    }
}

/// An explorer API key.
///
/// `Debug` and `Display` only ever show the first 8 characters.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into().trim().to_string())
    }

    /// Non-secret prefix safe to log.
    pub fn prefix(&self) -> String {
        self.0.chars().take(8).collect()
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiKey({}…)", self.prefix())
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}…", self.prefix())
    }
}

/// Raw response envelope of the explorer API.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    message: String,
    #[serde(default)]
    result: serde_json::Value,
}

/// Explorer API client.
#[derive(Debug, Clone)]
pub struct ExplorerClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ExplorerClient {
    /// Create a client for the explorer endpoint at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let base_url = base_url
            .parse()
            .map_err(|e| ClientError::InvalidUrl(format!("{}", e)))?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self { http, base_url })
    }

    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Query the raw token balance of `wallet` for `contract` on `chain_id`.
    pub async fn token_balance(
        &self,
        chain_id: u64,
        contract: Address,
        wallet: Address,
        api_key: &ApiKey,
    ) -> Result<U256, ClientError> {
        debug!(
            chain_id,
            contract = %contract,
            wallet = %wallet,
            key = %api_key,
            "Querying token balance"
        );

        let chain_id = chain_id.to_string();
        let contract = contract.to_string();
        let wallet = wallet.to_string();
        let params = [
            ("chainid", chain_id.as_str()),
            ("module", "account"),
            ("action", "tokenbalance"),
            ("contractaddress", contract.as_str()),
            ("address", wallet.as_str()),
            ("tag", "latest"),
            ("apikey", api_key.expose()),
        ];

        let response = self
            .http
            .get(self.base_url.clone())
            .query(&params)
            .send()
            .await
            // Request URLs carry the key; never surface them.
            .map_err(|e| ClientError::Transport(e.without_url()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Http(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ClientError::Transport(e.without_url()))?;
        parse_balance_response(&body)
    }
}

/// Parse an explorer response body into a raw balance.
///
/// `status == "1" && message == "OK"` is the only success signal.
pub fn parse_balance_response(body: &str) -> Result<U256, ClientError> {
    let response: ApiResponse =
        serde_json::from_str(body).map_err(|e| ClientError::Decode(e.to_string()))?;

    let result = match response.result {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    };

    if response.status != "1" || response.message != "OK" {
        return Err(ClientError::Upstream {
            status: response.status,
            message: response.message,
            result,
        });
    }

    parse_raw_balance(&result)
}

fn parse_raw_balance(raw: &str) -> Result<U256, ClientError> {
    let raw = raw.trim();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ClientError::InvalidBalance(raw.to_string()));
    }
    raw.parse::<U256>()
        .map_err(|_| ClientError::InvalidBalance(raw.to_string()))
}
