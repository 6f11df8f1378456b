//! Pod configuration
//!
//! Loaded from TOML. Durations are human readable (`"5s"`, `"250ms"`).
//!
//! ```toml
//! domain = "pod.example"
//! delivery_timeout = "5s"
//! max_comment_length = 65535
//! auto_follow_back = false
//!
//! [logging]
//! level = "info"
//! json = false
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use spora_core::{SporaError, SporaResult, DEFAULT_MAX_COMMENT_LENGTH};

/// Logging setup
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` overrides it
    pub level: String,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Spora pod configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PodConfig {
    /// Host name of this pod; users hosted here have handles `user@domain`
    pub domain: String,
    /// Per-recipient fan-out timeout
    #[serde(with = "duration_str")]
    pub delivery_timeout: Duration,
    /// Maximum comment length in characters
    pub max_comment_length: usize,
    /// Default for new users: share back when someone starts sharing
    pub auto_follow_back: bool,
    pub logging: LoggingConfig,
}

impl Default for PodConfig {
    fn default() -> Self {
        PodConfig {
            domain: "localhost".to_string(),
            delivery_timeout: Duration::from_secs(5),
            max_comment_length: DEFAULT_MAX_COMMENT_LENGTH,
            auto_follow_back: false,
            logging: LoggingConfig::default(),
        }
    }
}

impl PodConfig {
    /// Config for a pod at `domain` with everything else defaulted
    pub fn for_domain(domain: impl Into<String>) -> Self {
        PodConfig {
            domain: domain.into(),
            ..Default::default()
        }
    }

    pub fn from_toml_str(raw: &str) -> SporaResult<Self> {
        let config: PodConfig =
            toml::from_str(raw).map_err(|e| SporaError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> SporaResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SporaError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&raw)
    }

    pub fn to_toml_string(&self) -> SporaResult<String> {
        toml::to_string(self).map_err(|e| SporaError::Config(e.to_string()))
    }

    pub fn validate(&self) -> SporaResult<()> {
        if self.domain.trim().is_empty() || self.domain.contains('@') {
            return Err(SporaError::Config(format!("invalid domain {:?}", self.domain)));
        }
        if self.delivery_timeout.is_zero() {
            return Err(SporaError::Config("delivery_timeout must be positive".into()));
        }
        if self.max_comment_length == 0 {
            return Err(SporaError::Config("max_comment_length must be positive".into()));
        }
        Ok(())
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
