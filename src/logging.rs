//! Tracing subscriber setup for the command line

use std::io::{self, IsTerminal};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::error::{Error, Result};

/// Install the global subscriber
///
/// `RUST_LOG` wins over `verbosity` when set. JSON output is meant for log
/// collectors; otherwise human-readable lines are written to stderr.
pub fn init_logging(verbosity: u8, json_output: bool) -> Result<()> {
    let default_directives = match verbosity {
        0 => "maestro_train=info,warn",
        1 => "maestro_train=debug,info",
        2 => "maestro_train=trace,debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let result = if json_output {
        let json_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(io::stderr)
            .with_filter(env_filter);

        tracing_subscriber::registry().with(json_layer).try_init()
    } else {
        let fmt_layer = fmt::layer()
            .with_target(false)
            .with_ansi(io::stderr().is_terminal())
            .with_writer(io::stderr)
            .with_filter(env_filter);

        tracing_subscriber::registry().with(fmt_layer).try_init()
    };

    result.map_err(|e| Error::config(format!("failed to initialize logging: {}", e)))
}
