use tracing_subscriber::{EnvFilter, fmt};
use tracing::info;

use gatekeeper::config::GatekeeperConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    // Startup banner at info level so something always prints at default verbosity
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(target: "gatekeeper", "gatekeeper {} starting: RUST_LOG='{}'", env!("CARGO_PKG_VERSION"), rust_log);

    let args: Vec<String> = std::env::args().collect();
    let cfg = GatekeeperConfig::from_env_and_args(&args)?;
    gatekeeper::server::run(cfg).await
}
