//! Logging setup.
//!
//! All crates log through `tracing`. The binary calls [`init`] once; the
//! level comes from `SHORTENER_LOG_LEVEL` and `RUST_LOG` wins when set.
//!
//! # Environment Variables
//!
//! - `SHORTENER_LOG_LEVEL=<level>` - 0=off, 1=error, 2=warn, 3=info, 4=debug,
//!   5=trace (names accepted too)
//! - `RUST_LOG=<filter>` - full `tracing_subscriber::EnvFilter` syntax

use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::EnvFilter;

use crate::env::env_string;

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Map a `SHORTENER_LOG_LEVEL` value to a filter directive.
pub fn level_directive(val: &str) -> &'static str {
    match val.trim().to_ascii_lowercase().as_str() {
        "off" | "0" => "off",
        "error" | "1" => "error",
        "warn" | "2" => "warn",
        "info" | "3" => "info",
        "debug" | "4" => "debug",
        "trace" | "5" => "trace",
        _ => "info",
    }
}

/// Install the global subscriber. `debug` raises the default to `debug`.
/// Later calls are no-ops.
pub fn init(debug: bool) {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    let fallback = if debug { "debug" } else { "info" };
    let level = level_directive(&env_string("SHORTENER_LOG_LEVEL", fallback));
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives() {
        assert_eq!(level_directive("0"), "off");
        assert_eq!(level_directive("WARN"), "warn");
        assert_eq!(level_directive(" 4 "), "debug");
        assert_eq!(level_directive("chatty"), "info");
    }

    #[test]
    fn init_twice_is_harmless() {
        init(false);
        init(true);
        tracing::info!("logging initialised");
    }
}
