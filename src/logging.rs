// 📝 Logging - tracing subscriber setup for the binaries
//
// Levels: info per run, debug for blocking and per-stage detail, warn for
// truncated rows. RUST_LOG overrides the verbosity flag when set.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Level name for a `-v` count: 0 = info, 1 = debug, 2+ = trace
pub fn level_for_verbosity(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber, writing to stderr so stdout stays clean for reports.
/// Returns false if a subscriber was already installed.
pub fn init_logging(verbosity: u8, json: bool) -> bool {
    let level = level_for_verbosity(verbosity);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,fuzzy_linkage={level},linkage_server={level}")));

    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .is_ok()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .is_ok()
    }
}
