// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]

/// Installs the process-wide tracing subscriber.
///
/// Filtering follows `RUST_LOG`; with it unset only errors are shown. Calling
/// this more than once is harmless, later calls are ignored.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();
}

/// Same as [`init_tracing`] but falls back to `default_filter` when
/// `RUST_LOG` is not set, so `--verbose` style flags work without env vars.
pub fn init_tracing_with_default(default_filter: &str) {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}
