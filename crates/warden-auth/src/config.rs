//! Token service configuration.
//!
//! Configuration is read from an optional TOML file and overridden by
//! `WARDEN__*` environment variables (see [`loader::load_config`]).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::token::jwt::SigningAlgorithm;

/// Root configuration of the token lifecycle engine.
///
/// # Example (TOML)
///
/// ```toml
/// issuer = "https://auth.example.com"
/// audience = ["https://api.example.com"]
/// access_token_lifetime = "15m"
/// rpt_max_permissions = 10
/// expired_token_retention_hours = 24
///
/// [signing]
/// algorithm = "HS256"
/// secret = "change-me"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenServiceConfig {
    /// Token issuer (`iss` claim).
    pub issuer: String,

    /// Token audience (`aud` claim). Not checked on parse when empty.
    pub audience: Vec<String>,

    /// Access token lifetime.
    #[serde(with = "humantime_serde")]
    pub access_token_lifetime: Duration,

    /// Refresh token lifetime.
    #[serde(with = "humantime_serde")]
    pub refresh_token_lifetime: Duration,

    /// Maximum number of permissions embedded in a single RPT.
    pub rpt_max_permissions: usize,

    /// How long expired tokens are kept before the periodic cleanup deletes them.
    pub expired_token_retention_hours: u32,

    /// Interval of the periodic cleanup task.
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,

    /// Token signing configuration.
    pub signing: SigningConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Default for TokenServiceConfig {
    fn default() -> Self {
        Self {
            issuer: "http://localhost:8089".to_string(),
            audience: Vec::new(),
            access_token_lifetime: Duration::from_secs(3600),
            refresh_token_lifetime: Duration::from_secs(30 * 24 * 3600),
            rpt_max_permissions: 10,
            expired_token_retention_hours: 24,
            cleanup_interval: Duration::from_secs(3600),
            signing: SigningConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Token signing configuration.
///
/// HS256 uses `secret`; RS256 and RS384 use the PEM-encoded key pair.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Signing algorithm.
    pub algorithm: SigningAlgorithm,

    /// Shared HMAC secret.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    /// PEM-encoded RSA private key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key_pem: Option<String>,

    /// PEM-encoded RSA public key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key_pem: Option<String>,

    /// Key ID written to the `kid` header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),

    /// The configuration sources could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(String),
}

impl TokenServiceConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - The issuer is empty
    /// - `rpt_max_permissions` is zero
    /// - A token lifetime or the cleanup interval is zero
    ///
    /// Returns `ConfigError::Missing` if the key material required by the
    /// signing algorithm is not set.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.is_empty() {
            return Err(ConfigError::InvalidValue(
                "issuer cannot be empty".to_string(),
            ));
        }

        if self.rpt_max_permissions == 0 {
            return Err(ConfigError::InvalidValue(
                "rpt_max_permissions must be > 0".to_string(),
            ));
        }

        if self.access_token_lifetime.is_zero() || self.refresh_token_lifetime.is_zero() {
            return Err(ConfigError::InvalidValue(
                "token lifetimes must be > 0".to_string(),
            ));
        }

        if self.cleanup_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "cleanup_interval must be > 0".to_string(),
            ));
        }

        if self.signing.algorithm.is_rsa() {
            if self.signing.private_key_pem.is_none() {
                return Err(ConfigError::Missing("signing.private_key_pem".to_string()));
            }
            if self.signing.public_key_pem.is_none() {
                return Err(ConfigError::Missing("signing.public_key_pem".to_string()));
            }
        } else if self.signing.secret.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::Missing("signing.secret".to_string()));
        }

        Ok(())
    }
}

pub mod loader {
    use std::path::PathBuf;

    use config::{Config, Environment, File};

    use super::{ConfigError, TokenServiceConfig};

    /// Default configuration file looked up when no path is given.
    pub const DEFAULT_CONFIG_FILE: &str = "warden.toml";

    /// Prefix of environment variable overrides.
    pub const ENV_PREFIX: &str = "WARDEN";

    /// Loads and validates the configuration.
    ///
    /// The file at `path` (or `warden.toml` when `None`) is read if it exists.
    /// Environment variables override file values, e.g.
    /// `WARDEN__RPT_MAX_PERMISSIONS=20` or `WARDEN__SIGNING__SECRET=...`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Load` if a source cannot be read or deserialized,
    /// or a validation error from [`TokenServiceConfig::validate`].
    pub fn load_config(path: Option<&str>) -> Result<TokenServiceConfig, ConfigError> {
        let mut builder = Config::builder();
        let path = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if path.exists() {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .separator("__"),
        );

        let cfg = builder
            .build()
            .map_err(|e| ConfigError::Load(format!("config build error: {e}")))?;
        let merged: TokenServiceConfig = cfg
            .try_deserialize()
            .map_err(|e| ConfigError::Load(format!("config deserialize error: {e}")))?;

        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn valid_config() -> TokenServiceConfig {
        let mut config = TokenServiceConfig::default();
        config.signing.secret = Some("secret".to_string());
        config
    }

    #[test]
    fn test_default_config() {
        let config = TokenServiceConfig::default();
        assert_eq!(config.rpt_max_permissions, 10);
        assert_eq!(config.expired_token_retention_hours, 24);
        assert_eq!(config.access_token_lifetime, Duration::from_secs(3600));
        assert_eq!(config.signing.algorithm, SigningAlgorithm::HS256);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_default_config_requires_secret() {
        let err = TokenServiceConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_zero_max_permissions_fails_validation() {
        let mut config = valid_config();
        config.rpt_max_permissions = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
        assert!(err.to_string().contains("rpt_max_permissions"));
    }

    #[test]
    fn test_empty_issuer_fails_validation() {
        let mut config = valid_config();
        config.issuer = String::new();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("issuer"));
    }

    #[test]
    fn test_rsa_requires_pem_keys() {
        let mut config = valid_config();
        config.signing.algorithm = SigningAlgorithm::RS256;
        let err = config.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing required configuration: signing.private_key_pem"
        );
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
issuer = "https://auth.example.com"
audience = ["https://api.example.com"]
access_token_lifetime = "15m"
rpt_max_permissions = 5
cleanup_interval = "30m"

[signing]
secret = "from-file"
"#
        )
        .unwrap();

        let path = file.path().to_string_lossy().to_string();
        let config = loader::load_config(Some(&path)).unwrap();
        assert_eq!(config.issuer, "https://auth.example.com");
        assert_eq!(config.audience, vec!["https://api.example.com".to_string()]);
        assert_eq!(config.access_token_lifetime, Duration::from_secs(900));
        assert_eq!(config.rpt_max_permissions, 5);
        assert_eq!(config.cleanup_interval, Duration::from_secs(1800));
        assert_eq!(config.signing.secret.as_deref(), Some("from-file"));
        assert_eq!(config.refresh_token_lifetime, Duration::from_secs(30 * 24 * 3600));
    }

    #[test]
    fn test_load_config_validates() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "rpt_max_permissions = 0\n[signing]\nsecret = \"s\"").unwrap();

        let path = file.path().to_string_lossy().to_string();
        let err = loader::load_config(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn test_toml_written_config_loads_back() {
        let mut config = valid_config();
        config.rpt_max_permissions = 7;
        config.cleanup_interval = Duration::from_secs(600);

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "{}", toml::to_string(&config).unwrap()).unwrap();

        let path = file.path().to_string_lossy().to_string();
        let loaded = loader::load_config(Some(&path)).unwrap();
        assert_eq!(loaded.rpt_max_permissions, 7);
        assert_eq!(loaded.cleanup_interval, Duration::from_secs(600));
        assert_eq!(loaded.signing.secret.as_deref(), Some("secret"));
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = valid_config();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: TokenServiceConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.issuer, parsed.issuer);
        assert_eq!(config.cleanup_interval, parsed.cleanup_interval);
        assert_eq!(config.signing.secret, parsed.signing.secret);
    }
}
