use anyhow::Result;
use formflow_server::{init_tracing, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    init_tracing(&level);

    let config = ServerConfig::load();
    formflow_server::run(config).await
}
