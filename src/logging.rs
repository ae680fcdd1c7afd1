//! Logging initialization.
//!
//! Library code only emits `tracing` events; the binary decides where they
//! go by calling [`init`] once at startup. Diagnostics always go to stderr
//! so that stdout stays reserved for command output.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogProfile {
    /// Compact human-readable lines.
    #[default]
    Human,
    /// One JSON object per event.
    Json,
}

static INIT_ONCE: Once = Once::new();

/// Maps a `-v` count to a filter directive.
pub fn level_for_verbosity(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Installs the global subscriber. Later calls are no-ops.
pub fn init(profile: LogProfile, verbosity: u8) {
    INIT_ONCE.call_once(|| {
        let filter = EnvFilter::new(level_for_verbosity(verbosity));
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false);

        // A subscriber installed by an embedding application wins.
        let _ = match profile {
            LogProfile::Human => builder.compact().try_init(),
            LogProfile::Json => builder.json().try_init(),
        };
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init(LogProfile::Human, 0);
        init(LogProfile::Json, 3);
    }

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(level_for_verbosity(0), "warn");
        assert_eq!(level_for_verbosity(1), "info");
        assert_eq!(level_for_verbosity(2), "debug");
        assert_eq!(level_for_verbosity(9), "trace");
    }
}
