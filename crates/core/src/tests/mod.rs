#[cfg(feature = "dummy")]
pub mod default;

/// Install a debug-level subscriber for the test binary. The first caller
/// wins; later calls are no-ops.
#[allow(dead_code)]
pub fn setup_tracing() {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(tracing::Level::DEBUG)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
