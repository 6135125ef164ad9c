//! Logging initialization shared by the `migrator` binary and by tests
//! that want span output. Kept as its own tiny crate, same role the
//! teacher gave its `logger` path-dependency, but built on `tracing`
//! rather than `log` since the upload/dump drivers report progress as
//! spans (one per pass, one per closure iteration).

use tracing_subscriber::EnvFilter;

/// Verbosity requested on the CLI; translated to an `EnvFilter` default
/// when `RUST_LOG` is unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    fn default_filter(self) -> &'static str {
        match self {
            Verbosity::Quiet => "warn",
            Verbosity::Normal => "info",
            Verbosity::Verbose => "debug",
        }
    }
}

/// Installs a global `tracing` subscriber. Safe to call more than once
/// per process (subsequent calls are no-ops) so integration tests that
/// each spin up their own runtime don't panic on a duplicate global
/// subscriber.
pub fn init(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.default_filter()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
