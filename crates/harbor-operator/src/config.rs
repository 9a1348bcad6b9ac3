//! Operator configuration store
//!
//! A process-wide, read-mostly registry populated once at startup from the
//! command line, the environment and an optional YAML file. Readers take a
//! cheap snapshot with [`current`]; mutations go through [`update`].

use crate::error::Result;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

static STORE: LazyLock<RwLock<OperatorConfig>> =
    LazyLock::new(|| RwLock::new(OperatorConfig::default()));

/// Name reported in `status.operator.controllerName` and used as field manager
pub const OPERATOR_NAME: &str = "harbor-operator";

/// Operator version reported on every managed child
pub const OPERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Git commit the binary was built from, when known at build time
pub const OPERATOR_GIT_COMMIT: &str = match option_env!("HARBOR_OPERATOR_GIT_COMMIT") {
    Some(commit) => commit,
    None => "none",
};

/// Character budget for generated passwords and keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordBudget {
    /// Total length
    pub length: usize,
    /// Minimum number of digits
    pub digits: usize,
    /// Minimum number of special characters
    pub specials: usize,
}

impl PasswordBudget {
    pub const fn new(length: usize, digits: usize, specials: usize) -> Self {
        Self {
            length,
            digits,
            specials,
        }
    }
}

/// Image override for one component
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageOverride {
    /// Repository, e.g. `registry.example.com/goharbor/harbor-core`
    #[serde(default)]
    pub repository: Option<String>,
    /// Tag, e.g. `v2.4.3`
    #[serde(default)]
    pub tag: Option<String>,
}

/// Internal TLS certificate lifetimes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateDurations {
    /// Certificate validity
    #[serde(with = "humane_duration")]
    pub duration: Duration,
    /// Renew this long before expiry
    #[serde(with = "humane_duration")]
    pub renew_before: Duration,
}

impl Default for CertificateDurations {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(90 * 24 * 3600),
            renew_before: Duration::from_secs(15 * 24 * 3600),
        }
    }
}

/// Operator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorConfig {
    /// Only reconcile owners whose class annotation matches (empty: all unannotated owners)
    #[serde(default)]
    pub harbor_class: String,

    /// Maximum parallel reconciles per controlled kind
    #[serde(default = "default_max_concurrent_reconciles")]
    pub max_concurrent_reconciles: u16,

    /// Default image repository prefix for components
    #[serde(default = "default_image_registry")]
    pub image_registry: String,

    /// Per-component image overrides, keyed by component name (`core`, `registry`, ...)
    #[serde(default)]
    pub images: BTreeMap<String, ImageOverride>,

    /// Internal TLS certificate lifetimes
    #[serde(default)]
    pub internal_tls: CertificateDurations,

    /// Bcrypt cost used for registry htpasswd entries
    #[serde(default = "default_bcrypt_cost")]
    pub htpasswd_cost: u32,

    /// Budget for generated passwords
    #[serde(default = "default_password_budget")]
    pub password_budget: PasswordBudget,

    /// Upstream tokens, keyed by purpose (`github` for Trivy DB downloads)
    #[serde(default)]
    pub upstream_tokens: BTreeMap<String, String>,

    /// Requeue delay when a child is not ready yet
    #[serde(default = "default_requeue_seconds")]
    pub requeue_seconds: u64,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            harbor_class: String::new(),
            max_concurrent_reconciles: default_max_concurrent_reconciles(),
            image_registry: default_image_registry(),
            images: BTreeMap::new(),
            internal_tls: CertificateDurations::default(),
            htpasswd_cost: default_bcrypt_cost(),
            password_budget: default_password_budget(),
            upstream_tokens: BTreeMap::new(),
            requeue_seconds: default_requeue_seconds(),
        }
    }
}

fn default_max_concurrent_reconciles() -> u16 {
    1
}

fn default_image_registry() -> String {
    "docker.io/goharbor".to_string()
}

fn default_bcrypt_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

fn default_password_budget() -> PasswordBudget {
    PasswordBudget::new(16, 2, 0)
}

fn default_requeue_seconds() -> u64 {
    5
}

impl OperatorConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            crate::error::OperatorError::InvalidConfig(format!(
                "cannot read {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml(&raw)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Requeue delay for children that are not ready yet
    pub fn requeue_after(&self) -> Duration {
        Duration::from_secs(self.requeue_seconds.max(1))
    }
}

/// Replace the whole store, typically once at startup
pub fn init(config: OperatorConfig) {
    *STORE.write() = config;
}

/// Snapshot of the current configuration
pub fn current() -> OperatorConfig {
    STORE.read().clone()
}

/// Mutate the store in place
pub fn update(f: impl FnOnce(&mut OperatorConfig)) {
    f(&mut STORE.write());
}

/// Read a single value without cloning the whole configuration
pub fn with<T>(f: impl FnOnce(&OperatorConfig) -> T) -> T {
    f(&STORE.read())
}

/// Durations written as `90d`, `360h`, `30m` or plain seconds
mod humane_duration {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{}s", value.as_secs()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_duration(&raw).ok_or_else(|| D::Error::custom(format!("invalid duration '{raw}'")))
    }
}

/// Parse `90d`, `12h`, `30m`, `45s` or a bare number of seconds
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let (digits, unit) = match raw.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => raw.split_at(idx),
        None => (raw, "s"),
    };
    let value: u64 = digits.parse().ok()?;
    let secs = match unit {
        "s" => value,
        "m" => value.checked_mul(60)?,
        "h" => value.checked_mul(3600)?,
        "d" => value.checked_mul(24 * 3600)?,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}

/// Format a duration the way cert-manager expects it (`2160h0m0s`)
pub fn go_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}h{}m{}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OperatorConfig::default();
        assert_eq!(config.max_concurrent_reconciles, 1);
        assert_eq!(config.image_registry, "docker.io/goharbor");
        assert_eq!(config.password_budget.length, 16);
        assert!(config.harbor_class.is_empty());
    }

    #[test]
    fn test_from_yaml() {
        let config = OperatorConfig::from_yaml(
            r#"
harborClass: blue
maxConcurrentReconciles: 4
images:
  core:
    repository: mirror.local/harbor-core
    tag: v2.4.3-patched
internalTls:
  duration: 30d
  renewBefore: 72h
htpasswdCost: 6
upstreamTokens:
  github: ghp_token
"#,
        )
        .unwrap();
        assert_eq!(config.harbor_class, "blue");
        assert_eq!(config.max_concurrent_reconciles, 4);
        assert_eq!(
            config.images["core"].repository.as_deref(),
            Some("mirror.local/harbor-core")
        );
        assert_eq!(config.internal_tls.duration, Duration::from_secs(30 * 86400));
        assert_eq!(config.internal_tls.renew_before, Duration::from_secs(72 * 3600));
        assert_eq!(config.htpasswd_cost, 6);
        assert_eq!(config.upstream_tokens["github"], "ghp_token");
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("45"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1d"), Some(Duration::from_secs(86400)));
        assert_eq!(parse_duration("1w"), None);
        assert_eq!(parse_duration("abc"), None);
    }

    #[test]
    fn test_go_duration() {
        assert_eq!(go_duration(Duration::from_secs(90 * 86400)), "2160h0m0s");
        assert_eq!(go_duration(Duration::from_secs(3725)), "1h2m5s");
    }
}
