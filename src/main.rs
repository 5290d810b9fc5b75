use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Use JSON logs in production (FERRIC_LOG_JSON=1), human-readable otherwise
    let json_logs = std::env::var("FERRIC_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env().add_directive("ferric=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .init();
    }

    let config = ferric::config::ServerConfig::parse();
    config.validate()?;

    tracing::info!("Starting IRC relay on port {}", config.port);
    let server = ferric::server::Server::new(config);
    server.run().await
}
