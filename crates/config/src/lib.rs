//! Configuration types for partner balance monitoring.
//!
//! This crate provides:
//! - Monitored target (partner) definitions and chain presets
//! - A validated registry of targets with a default target
//! - Configuration errors shared by the other crates

pub mod registry;
pub mod target;

pub use registry::TargetRegistry;
pub use target::{
    ResolvedTarget, TargetConfig, TargetConfigBuilder, BSC_CHAIN_ID, BSC_USDT,
    MAX_INTERVAL_MINUTES,
};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Target has no wallet address configured
    #[error("target {0} has no wallet address configured")]
    MissingWallet(String),

    /// Target has no token contract configured
    #[error("target {0} has no token contract configured")]
    MissingContract(String),

    /// Target name not present in the registry
    #[error("unknown target: {0}")]
    UnknownTarget(String),

    /// Two targets share a name
    #[error("duplicate target name: {0}")]
    DuplicateTarget(String),

    /// Any other invalid setting
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
