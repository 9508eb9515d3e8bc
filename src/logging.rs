//! Logging init: tracing-subscriber on stderr, filtered by `RUST_LOG` or verbosity.

use std::io::IsTerminal;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber
///
/// `RUST_LOG` wins when set. Otherwise everything logs at `info` and this crate at
/// `info`, `debug` (`-v`) or `trace` (`-vv`). Calling it twice is harmless; the
/// second call keeps the first subscriber.
pub fn init_logging(verbosity: u8) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbosity)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();
}

fn default_directives(verbosity: u8) -> String {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    format!("info,cluster_dl={level}")
}
