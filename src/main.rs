use std::path::PathBuf;

use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};
use veeta::config::{self, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let env_file = PathBuf::from(std::env::var("VEETA_ENV_FILE").unwrap_or_else(|_| "config/config.env".to_string()));
    config::load_env_file(&env_file)?;
    let config = Config::from_env()?;

    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "startup",
        "veeta starting: RUST_LOG='{}', port={}, env={:?}, store={}, cookie_days={}",
        rust_log,
        config.port,
        config.environment,
        if config.database_url.is_some() { "postgres" } else { "memory" },
        config.cookie_days
    );

    veeta::server::run(config).await
}
