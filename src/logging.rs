//! Tracing initialisation.

use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static INIT: Once = Once::new();

/// Install the global subscriber once.
///
/// Reads `TRANSMUTE_LOG` (e.g. `TRANSMUTE_LOG=transmute::scheduler=debug`),
/// falling back to `transmute=info`, or `transmute=debug` when `verbose`.
pub fn init_tracing(verbose: bool) {
    INIT.call_once(|| {
        let fallback = if verbose { "transmute=debug" } else { "transmute=info" };
        let filter =
            EnvFilter::try_from_env("TRANSMUTE_LOG").unwrap_or_else(|_| EnvFilter::new(fallback));

        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .with(filter)
            .init();
    });
}
