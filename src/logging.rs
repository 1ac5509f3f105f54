//! Logging setup built on `tracing`.
//!
//! Library code logs through the `tracing` macros only; the binary installs
//! a subscriber once at startup:
//!
//! - `--verbose`: debug level for faultline
//! - `--quiet`: errors only
//! - otherwise `RUST_LOG`, falling back to `faultline=info`
//!
//! Logs go to stderr so JSON reports on stdout stay machine-readable.

use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "faultline=info";

static INSTALLED: OnceCell<()> = OnceCell::new();

/// Filter for the given verbosity flags. `verbose` wins over `quiet`.
pub fn filter_for(verbose: bool, quiet: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("faultline=debug")
    } else if quiet {
        EnvFilter::new("faultline=error")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_logger(verbose: bool, quiet: bool, no_color: bool) {
    INSTALLED.get_or_init(|| {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_level(true)
            .with_ansi(!no_color)
            .compact();

        // Another subscriber may already be set (tests, embedding tools).
        let _ = tracing_subscriber::registry()
            .with(filter_for(verbose, quiet))
            .with(fmt_layer)
            .try_init();
    });
}

/// Whether colored output should be used, honoring `NO_COLOR`.
pub fn colors_enabled(no_color_flag: bool) -> bool {
    !no_color_flag && std::env::var_os("NO_COLOR").is_none()
}
