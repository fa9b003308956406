use foodlink_server::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "foodlink=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    foodlink_server::run(config).await
}
