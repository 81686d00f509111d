//! Process-wide logging setup.

pub mod syslog;

use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;
use syslog::{SYSLOG_SOCKET, SyslogLayer};

/// Name used as the syslog tag.
pub const APP_NAME: &str = "tablecleaner";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to connect to syslog socket {path}: {source}")]
    Syslog {
        path: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to install global subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence; otherwise the level comes from `TDEBUG`.
/// Records from the `log` facade are bridged into the same subscriber.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directive()));

    if config.syslog {
        let layer = SyslogLayer::connect(APP_NAME, SYSLOG_SOCKET).map_err(|source| {
            LoggingError::Syslog {
                path: SYSLOG_SOCKET,
                source,
            }
        })?;
        tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()?;
    }

    Ok(())
}
