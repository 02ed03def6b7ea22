//! Logging setup

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{FlowSrvError, Result};

/// Initialize console logging.
///
/// `level` is the default filter; `RUST_LOG` overrides it when set.
pub fn init_logging(level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| FlowSrvError::ConfigError(format!("invalid log level: {e}")))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .compact()
                .with_target(true)
                .with_thread_ids(false),
        )
        .try_init()
        .map_err(|e| FlowSrvError::InternalError(format!("failed to init logging: {e}")))?;

    Ok(())
}
