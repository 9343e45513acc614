//! Voice Bridge -- real-time voice-call bridge daemon.

use voicebridge::cli;
use voicebridge::config::{Config, LoggingConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install Rustls crypto provider for HTTPS support
    // This is required for Rustls 0.23+
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install Rustls crypto provider");

    // The config must exist before logging can honor `logging.level`/`json`,
    // so load it here and fall back to defaults if it can't be read yet --
    // `cli::run()` surfaces the real load error to the user afterwards.
    let logging = Config::load()
        .map(|c| c.logging)
        .unwrap_or_else(|_| LoggingConfig::default());
    init_logging(&logging);

    cli::run().await
}

fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
