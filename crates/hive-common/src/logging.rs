// Logging setup for the worker process.
//
// Diagnostics always go to stderr: stdin/stdout and the protocol descriptors
// belong to the parent.

use std::sync::OnceLock;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{reload, EnvFilter, Registry};

use crate::constants::variables;

/// Handle on the installed filter, so a job can raise the debug level.
static FILTER: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// How the worker's diagnostic log is emitted.
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    /// Levels above 1 turn on debug output and the protocol echo.
    pub debug_level: i64,
    /// Emit one JSON object per log line.
    pub json: bool,
}

impl LoggingConfig {
    /// Build the configuration from the debug level and the environment.
    pub fn from_env(debug_level: i64) -> Self {
        let json = std::env::var(variables::LOG_FORMAT)
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        Self { debug_level, json }
    }

    /// The filter used when `RUST_LOG` is not set.
    pub fn default_directive(&self) -> &'static str {
        directive_for(self.debug_level)
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.default_directive()))
    }
}

fn directive_for(debug_level: i64) -> &'static str {
    if debug_level > 1 {
        "debug"
    } else {
        "info"
    }
}

/// Install the global `tracing` subscriber.
///
/// Returns `false` if a subscriber was already installed (e.g. by a test).
pub fn init_logging(config: &LoggingConfig) -> bool {
    let (filter, handle) = reload::Layer::new(config.env_filter());
    let registry = tracing_subscriber::registry().with(filter);
    let output = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let installed = if config.json {
        registry.with(output.json()).try_init().is_ok()
    } else {
        registry.with(output).try_init().is_ok()
    };
    if installed {
        let _ = FILTER.set(handle);
    }
    installed
}

/// Switch the installed filter to the one for `debug_level`.
///
/// Does nothing when `RUST_LOG` is set or [`init_logging`] did not install
/// the subscriber. Returns whether the filter changed.
pub fn set_debug_level(debug_level: i64) -> bool {
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        return false;
    }
    FILTER
        .get()
        .is_some_and(|handle| apply_debug_level(handle, debug_level))
}

fn apply_debug_level<S>(handle: &reload::Handle<EnvFilter, S>, debug_level: i64) -> bool {
    handle
        .reload(EnvFilter::new(directive_for(debug_level)))
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_default_directive_follows_debug_level() {
        let quiet = LoggingConfig { debug_level: 1, json: false };
        assert_eq!(quiet.default_directive(), "info");
        let loud = LoggingConfig { debug_level: 2, json: false };
        assert_eq!(loud.default_directive(), "debug");
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_debug_level_can_change_after_init() {
        let captured = Captured::default();
        let writer = captured.clone();
        let (filter, handle) = reload::Layer::new(EnvFilter::new("info"));
        let subscriber = tracing_subscriber::registry().with(filter).with(
            tracing_subscriber::fmt::layer()
                .with_writer(move || writer.clone())
                .with_ansi(false),
        );

        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!("before the job");
            assert!(apply_debug_level(&handle, 2));
            tracing::debug!("WORKER 1 send_message: {{}}");
            assert!(apply_debug_level(&handle, 0));
            tracing::debug!("after the job");
        });

        let text = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(text.contains("send_message"), "{text}");
        assert!(!text.contains("before the job"), "{text}");
        assert!(!text.contains("after the job"), "{text}");
    }

    #[test]
    fn test_second_init_is_reported() {
        let config = LoggingConfig::default();
        let _ = init_logging(&config);
        assert!(!init_logging(&config));
    }
}
