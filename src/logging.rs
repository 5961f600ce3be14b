use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "signal_desk=info";

/// Installs the stderr subscriber for the binaries. `RUST_LOG` overrides the
/// default filter. Safe to call twice; the second call is a no-op.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// `.env.local` first so it wins over `.env`.
pub fn load_dotenv() {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
}
