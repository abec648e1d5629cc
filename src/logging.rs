use std::sync::Once;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Default filter used when RUST_LOG is not defined
const DEFAULT_FILTER: &str = "fedrl=info";

/// Initialize the tracing subscriber.
///
/// Safe to call more than once; only the first call installs a subscriber.
/// When `ansi_colors` is false the output is plain text on stderr, so stdout
/// stays clean for machine-readable results.
pub fn init_logging(ansi_colors: bool) {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        let result = if ansi_colors {
            fmt::Subscriber::builder()
                .with_ansi(true)
                .with_env_filter(filter)
                .with_target(true)
                .try_init()
        } else {
            fmt::Subscriber::builder()
                .with_ansi(false)
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .with_target(false)
                .without_time()
                .try_init()
        };

        if let Err(e) = result {
            // Another subscriber was installed by the host application
            eprintln!("Warning: tracing initialization skipped: {}", e);
            return;
        }

        tracing::info!("fedrl v{} logging initialized", crate::version());
    });
}

/// Log an error with context; the call site goes into a `location` field
#[macro_export]
macro_rules! log_error {
    ($err:expr, $context:expr) => {
        tracing::error!(location = concat!(file!(), ":", line!()), "{}: {}", $context, $err)
    };
    ($err:expr) => {
        tracing::error!(location = concat!(file!(), ":", line!()), "{}", $err)
    };
}

/// Log a warning with context; the call site goes into a `location` field
#[macro_export]
macro_rules! log_warn {
    ($msg:expr, $context:expr) => {
        tracing::warn!(location = concat!(file!(), ":", line!()), "{}: {}", $context, $msg)
    };
    ($msg:expr) => {
        tracing::warn!(location = concat!(file!(), ":", line!()), "{}", $msg)
    };
}

#[cfg(test)]
mod tests {
    use crate::error::FedError;

    #[test]
    fn test_init_logging_is_idempotent() {
        super::init_logging(false);
        super::init_logging(false);
    }

    #[test]
    fn test_macros_accept_errors_and_messages() {
        super::init_logging(false);
        let err = FedError::EmptyAggregation;
        log_error!(err, "aggregation");
        log_error!("plain message");
        log_warn!(err, "aggregation");
        log_warn!("plain warning");
    }
}
