//! Tracing subscriber setup

use crate::config::LoggingSection;
use tracing_subscriber::EnvFilter;

/// Subscriber initialisation failure
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Level directive does not parse
    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    /// A global subscriber is already installed
    #[error("failed to install subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Filter from `RUST_LOG`, falling back to the configured level
///
/// # Errors
/// [`TelemetryError::Filter`] if `level` is not a valid directive.
pub fn env_filter(level: &str) -> Result<EnvFilter, TelemetryError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(level)?),
    }
}

/// Install the global subscriber
///
/// # Errors
/// Bad filter directive, or a subscriber was already set.
pub fn init_tracing(logging: &LoggingSection) -> Result<(), TelemetryError> {
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = env_filter(&logging.level)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if logging.json {
        builder.json().finish().try_init()?;
    } else {
        builder
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .finish()
            .try_init()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_level_is_rejected() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert!(matches!(
            env_filter("swapguard=loud"),
            Err(TelemetryError::Filter(_))
        ));
    }

    #[test]
    fn plain_level_accepted() {
        assert!(env_filter("debug").is_ok());
    }
}
