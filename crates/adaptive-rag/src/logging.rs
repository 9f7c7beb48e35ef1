//! Tracing subscriber setup for binaries and tests embedding the orchestrator.

/// Install a fmt subscriber filtered by `RUST_LOG`, or `default_directive`
/// when the variable is unset. Returns `false` if a global subscriber was
/// already installed.
pub fn init_tracing(default_directive: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive)),
        )
        .with_target(false)
        .try_init()
        .is_ok()
}
