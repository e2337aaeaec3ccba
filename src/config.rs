//! Configuration loader and validator for the donation ledger engine.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub donations: Donations,
    pub gateway: Gateway,
    pub receipts: Receipts,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub poll_interval_ms: u64,
    pub max_backoff_seconds: u64,
}

/// Donation-intake policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Donations {
    /// ISO currency code echoed into checkout payloads. Single currency only.
    pub currency: String,
    /// Floor for unauthenticated cash gifts, in minor units. Registered
    /// donors giving to a specific child have no floor.
    pub min_anonymous_amount_minor: i64,
    /// Stock bucket that goods donations land in.
    pub default_category: String,
    pub default_location: String,
}

/// External payment gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Gateway {
    pub base_url: String,
    pub secret_key: String,
    pub callback_url: String,
    pub return_url: String,
    pub request_timeout_ms: u64,
    /// Degraded mode for deployments the gateway cannot call back into:
    /// cash donations are marked received at creation instead of waiting
    /// for reconciliation. Off unless a deployment explicitly opts in.
    #[serde(default)]
    pub assume_received_on_create: bool,
}

/// Receipt-issuance collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Receipts {
    pub endpoint: String,
    pub token: String,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_ms must be > 0"));
    }

    if cfg.donations.currency.trim().is_empty() {
        return Err(ConfigError::Invalid("donations.currency must be non-empty"));
    }
    if cfg.donations.min_anonymous_amount_minor < 0 {
        return Err(ConfigError::Invalid(
            "donations.min_anonymous_amount_minor must be >= 0",
        ));
    }
    if cfg.donations.default_category.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "donations.default_category must be non-empty",
        ));
    }
    if cfg.donations.default_location.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "donations.default_location must be non-empty",
        ));
    }

    if cfg.gateway.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("gateway.base_url must be non-empty"));
    }
    if cfg.gateway.secret_key.trim().is_empty() {
        return Err(ConfigError::Invalid("gateway.secret_key must be non-empty"));
    }
    if cfg.gateway.callback_url.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "gateway.callback_url must be non-empty",
        ));
    }
    if cfg.gateway.return_url.trim().is_empty() {
        return Err(ConfigError::Invalid("gateway.return_url must be non-empty"));
    }
    if cfg.gateway.request_timeout_ms == 0 {
        return Err(ConfigError::Invalid(
            "gateway.request_timeout_ms must be > 0",
        ));
    }

    if cfg.receipts.endpoint.trim().is_empty() {
        return Err(ConfigError::Invalid("receipts.endpoint must be non-empty"));
    }
    if cfg.receipts.token.trim().is_empty() {
        return Err(ConfigError::Invalid("receipts.token must be non-empty"));
    }

    Ok(())
}

/// Canonical example configuration, used by tests and `--print-example`.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  poll_interval_ms: 500
  max_backoff_seconds: 60

donations:
  currency: "NGN"
  min_anonymous_amount_minor: 10000
  default_category: "general"
  default_location: "main"

gateway:
  base_url: "https://api.flutterwave.com/"
  secret_key: "YOUR_GATEWAY_SECRET_KEY"
  callback_url: "https://portal.example.org/donations/callback"
  return_url: "https://portal.example.org/donations/thanks"
  request_timeout_ms: 10000
  assume_received_on_create: false

receipts:
  endpoint: "https://portal.example.org/internal/receipts"
  token: "YOUR_RECEIPTS_TOKEN"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert!(!cfg.gateway.assume_received_on_create);
    }

    #[test]
    fn invalid_gateway_fields() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.gateway.secret_key = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("gateway.secret_key")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.gateway.request_timeout_ms = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.gateway.callback_url = " ".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_donation_policy() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.donations.min_anonymous_amount_minor = -1;
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("min_anonymous_amount_minor")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.donations.currency = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_receipts_fields() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.receipts.endpoint = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.receipts.token = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.donations.currency, "NGN");
    }
}
