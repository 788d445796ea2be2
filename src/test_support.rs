//! Test-only helpers, gated behind the `test` feature.

/// Install an `env_logger` that writes to the test harness's captured
/// output. Idempotent: safe to call from every test.
pub fn enable_logging() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Trace)
        .format_timestamp(None)
        .is_test(true)
        .try_init();
}
