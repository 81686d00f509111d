use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Env var that routes log output to the local syslog socket.
pub const SYSLOG_ENV: &str = "TABLECLEANER_SYSLOG";

/// Env var that raises the log level to debug.
pub const DEBUG_ENV: &str = "TDEBUG";

/// Prefix for nested configuration overrides, e.g. `TABLECLEANER__STORE__PAGE_SIZE`.
pub const ENV_PREFIX: &str = "TABLECLEANER__";

/// CQL consistency level applied to every request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyLevel {
    Any,
    One,
    Two,
    Three,
    #[default]
    Quorum,
    All,
    LocalQuorum,
    EachQuorum,
    LocalOne,
}

impl fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Any => "ANY",
            Self::One => "ONE",
            Self::Two => "TWO",
            Self::Three => "THREE",
            Self::Quorum => "QUORUM",
            Self::All => "ALL",
            Self::LocalQuorum => "LOCAL_QUORUM",
            Self::EachQuorum => "EACH_QUORUM",
            Self::LocalOne => "LOCAL_ONE",
        };
        f.write_str(name)
    }
}

/// Tunables for talking to the store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Consistency level for reads and deletes.
    ///
    /// Env: TABLECLEANER__STORE__CONSISTENCY
    #[serde(default)]
    pub consistency: ConsistencyLevel,

    /// Per-request timeout, applied uniformly to every statement.
    ///
    /// Env: TABLECLEANER__STORE__REQUEST_TIMEOUT
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,

    /// Page size used by the driver when streaming result sets.
    ///
    /// Env: TABLECLEANER__STORE__PAGE_SIZE
    #[serde(default = "default_page_size")]
    pub page_size: i32,

    /// Rows requested per round-trip by the token-range walk.
    ///
    /// Env: TABLECLEANER__STORE__FALLBACK_PAGE_SIZE
    #[serde(default = "default_fallback_page_size")]
    pub fallback_page_size: i32,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_page_size() -> i32 {
    20
}

fn default_fallback_page_size() -> i32 {
    20
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            consistency: ConsistencyLevel::default(),
            request_timeout: default_request_timeout(),
            page_size: default_page_size(),
            fallback_page_size: default_fallback_page_size(),
        }
    }
}

/// Logging switches, normally driven by the legacy env flags.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Send log records to `/dev/log` instead of stderr.
    #[serde(default)]
    pub syslog: bool,
    /// Log at debug level instead of info.
    #[serde(default)]
    pub debug: bool,
}

impl LoggingConfig {
    pub fn default_directive(&self) -> &'static str {
        if self.debug { "debug" } else { "info" }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Figment(#[from] Box<figment::Error>),

    #[error("invalid {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

impl Configuration {
    /// Layer defaults, an optional TOML file, prefixed env vars and the
    /// legacy `TABLECLEANER_SYSLOG` / `TDEBUG` flags.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigLoadError> {
        let mut figment = Figment::from(Serialized::defaults(Configuration::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        if env_flag(SYSLOG_ENV) {
            figment = figment.merge(Serialized::default("logging.syslog", true));
        }
        if env_flag(DEBUG_ENV) {
            figment = figment.merge(Serialized::default("logging.debug", true));
        }

        let config: Configuration = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.store.page_size <= 0 {
            return Err(ConfigLoadError::Invalid {
                field: "store.page_size",
                message: format!("must be positive, got {}", self.store.page_size),
            });
        }
        if self.store.fallback_page_size <= 0 {
            return Err(ConfigLoadError::Invalid {
                field: "store.fallback_page_size",
                message: format!("must be positive, got {}", self.store.fallback_page_size),
            });
        }
        if self.store.request_timeout.is_zero() {
            return Err(ConfigLoadError::Invalid {
                field: "store.request_timeout",
                message: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

/// A flag counts as set when present and not empty, "0" or "false".
fn env_flag(name: &str) -> bool {
    match std::env::var(name) {
        Ok(value) => {
            let value = value.trim();
            !(value.is_empty() || value == "0" || value.eq_ignore_ascii_case("false"))
        }
        Err(_) => false,
    }
}
