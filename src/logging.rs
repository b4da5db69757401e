use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "tuitiond=info";

/// Logs go to stderr; stdout carries the IPC stream.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .init();
}
