use std::sync::Once;

const DEFAULT_FILTER: &str = "huddle_core=info";

/// Install the global tracing subscriber. Call once from the host before
/// creating a [`Session`](crate::session::Session); later calls are no-ops.
pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER));
        // A host may already have installed its own subscriber.
        if let Err(e) = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .try_init()
        {
            eprintln!("huddle: tracing already initialised: {e}");
        }
    });
}
