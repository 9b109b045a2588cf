//! Lookup over the configured monitored targets.

use std::collections::HashSet;

use crate::{ConfigError, TargetConfig};

/// Validated set of monitored targets plus the name of the default one.
///
/// Subscriptions without an explicit target watch the default target.
#[derive(Debug, Clone)]
pub struct TargetRegistry {
    targets: Vec<TargetConfig>,
    default_target: String,
}

impl TargetRegistry {
    /// Validate `targets` and build a registry.
    ///
    /// Fails on duplicate names, out-of-range settings, or when
    /// `default_target` is not one of the targets.
    pub fn new(
        targets: Vec<TargetConfig>,
        default_target: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let default_target = default_target.into();

        let mut seen = HashSet::new();
        for target in &targets {
            target.validate()?;
            if !seen.insert(target.name.as_str()) {
                return Err(ConfigError::DuplicateTarget(target.name.clone()));
            }
        }

        if !seen.contains(default_target.as_str()) {
            return Err(ConfigError::UnknownTarget(default_target));
        }

        Ok(Self {
            targets,
            default_target,
        })
    }

    /// Find a target by name, active or not.
    pub fn get(&self, name: &str) -> Option<&TargetConfig> {
        self.targets.iter().find(|t| t.name == name)
    }

    pub fn default_name(&self) -> &str {
        &self.default_target
    }

    pub fn default_target(&self) -> &TargetConfig {
        // Presence is checked in `new`.
        self.get(&self.default_target)
            .unwrap_or_else(|| &self.targets[0])
    }

    /// Resolve an optional target name, `None` meaning the default target.
    pub fn resolve_name(&self, name: Option<&str>) -> Result<&TargetConfig, ConfigError> {
        match name {
            None => Ok(self.default_target()),
            Some(name) => self
                .get(name)
                .ok_or_else(|| ConfigError::UnknownTarget(name.to_string())),
        }
    }

    /// Active targets sorted by display priority, then name.
    pub fn active_by_priority(&self) -> Vec<&TargetConfig> {
        let mut active: Vec<_> = self.targets.iter().filter(|t| t.active).collect();
        active.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        active
    }

    /// Smallest check interval any active target accepts.
    pub fn min_interval_minutes(&self) -> Option<u32> {
        self.targets
            .iter()
            .filter(|t| t.active)
            .map(|t| t.min_interval_minutes)
            .min()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TargetConfig> {
        self.targets.iter()
    }
}
