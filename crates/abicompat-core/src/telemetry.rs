//! Tracing setup for abicompat binaries.
//!
//! Diagnostics always go to stderr so stdout carries only the report
//! narrative. [`build_dispatch`] returns an explicit [`Dispatch`] that the
//! caller installs (globally or scoped to one engine run).

use tracing::{Dispatch, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Build a subscriber writing to stderr.
///
/// * `json`: emit newline-delimited JSON instead of human-readable lines.
/// * `level`: default verbosity when `RUST_LOG` is not set.
pub fn build_dispatch(json: bool, level: Level) -> Dispatch {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if json {
        Dispatch::new(
            tracing_subscriber::registry().with(env_filter).with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .json(),
            ),
        )
    } else {
        Dispatch::new(
            tracing_subscriber::registry().with(env_filter).with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            ),
        )
    }
}

/// Install `dispatch` as the process-wide default.
///
/// Only the first call takes effect.
pub fn init_global(dispatch: Dispatch) {
    tracing::dispatcher::set_global_default(dispatch).ok();
}
