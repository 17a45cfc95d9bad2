//! Engine configuration.
//!
//! Every protocol constant the handlers use lives here so a network can be
//! tuned without code changes. Defaults match the production network; all
//! nodes of one network must run with identical values.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Full configuration for the settlement engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub protocol: ProtocolConfig,

    #[serde(default)]
    pub groups: GroupConfig,

    #[serde(default)]
    pub links: LinkConfig,

    #[serde(default)]
    pub recovery: RecoveryConfig,

    #[serde(default)]
    pub sponsorship: SponsorshipConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Verification name that marks an identity as trusted: it may become
    /// a parent and gets its own rate-limit bucket.
    #[serde(default = "default_trusted_verification")]
    pub trusted_verification: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Accepted operation version.
    #[serde(default = "default_version")]
    pub version: u32,
    /// How far a client timestamp may run ahead of the node clock.
    #[serde(default = "default_clock_skew_ms")]
    pub clock_skew_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Lifetime of an invitation.
    #[serde(default = "default_day_ms")]
    pub invite_ttl_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Trailing window for the per-context link cap.
    #[serde(default = "default_day_ms")]
    pub window_ms: i64,
    /// New context ids one identity may link per context and window.
    #[serde(default = "default_max_links")]
    pub max_per_window: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Age a recovery connection needs before it may sign a key reset.
    #[serde(default = "default_week_ms")]
    pub activation_delay_ms: i64,
    /// Window after the first recovery connection in which new ones are
    /// trusted immediately.
    #[serde(default = "default_day_ms")]
    pub bootstrap_window_ms: i64,
    /// How long a downgraded recovery connection keeps signing rights.
    #[serde(default = "default_week_ms")]
    pub revocation_grace_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SponsorshipConfig {
    /// Lifetime of a placeholder reserved for a context id not yet linked.
    #[serde(default = "default_hour_ms")]
    pub placeholder_ttl_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_window_ms")]
    pub window_ms: i64,
    /// Operations per bucket and window.
    #[serde(default = "default_rate_limit")]
    pub limit: u32,
}

impl EngineConfig {
    /// Parse from TOML. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            protocol: ProtocolConfig::default(),
            groups: GroupConfig::default(),
            links: LinkConfig::default(),
            recovery: RecoveryConfig::default(),
            sponsorship: SponsorshipConfig::default(),
            rate_limit: RateLimitConfig::default(),
            trusted_verification: default_trusted_verification(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            clock_skew_ms: default_clock_skew_ms(),
        }
    }
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            invite_ttl_ms: default_day_ms(),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            window_ms: default_day_ms(),
            max_per_window: default_max_links(),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            activation_delay_ms: default_week_ms(),
            bootstrap_window_ms: default_day_ms(),
            revocation_grace_ms: default_week_ms(),
        }
    }
}

impl Default for SponsorshipConfig {
    fn default() -> Self {
        Self {
            placeholder_ttl_ms: default_hour_ms(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: default_rate_window_ms(),
            limit: default_rate_limit(),
        }
    }
}

// Default value functions
fn default_version() -> u32 {
    idchain_core::OPERATION_VERSION
}
fn default_clock_skew_ms() -> i64 {
    default_hour_ms()
}
fn default_hour_ms() -> i64 {
    60 * 60 * 1000
}
fn default_day_ms() -> i64 {
    24 * default_hour_ms()
}
fn default_week_ms() -> i64 {
    7 * default_day_ms()
}
fn default_max_links() -> usize {
    3
}
fn default_rate_window_ms() -> i64 {
    60 * 1000
}
fn default_rate_limit() -> u32 {
    30
}
fn default_trusted_verification() -> String {
    "BrightID".into()
}
