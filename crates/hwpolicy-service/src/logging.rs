//! Process-wide tracing setup for the daemon.

use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "HWPOLICY_LOG";
pub const LOG_FORMAT_ENV: &str = "HWPOLICY_LOG_FORMAT";

/// Installs the global subscriber. Output always goes to stderr so the stdio
/// transport owns stdout. Filtering follows `HWPOLICY_LOG` (default `info`);
/// `HWPOLICY_LOG_FORMAT=json` switches to structured JSON lines.
///
/// Calling this twice is harmless; the second call leaves the first
/// subscriber in place.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|v| v.trim().eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    let _ = if json {
        builder.json().with_thread_ids(true).try_init()
    } else {
        builder.try_init()
    };
}
