#![cfg(test)]

use std::sync::Once;

/// Install the global tracing subscriber once so `RUST_LOG=tjs=debug cargo
/// test` surfaces compiler passes, atom dispatch and capability calls while
/// a test runs. Output goes to stderr so it interleaves with test failures.
pub fn init_tracing_from_env() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(std::io::stderr);
        let _ = subscriber.try_init();
    });
}
