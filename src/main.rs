use clap::Parser;
use docproxy::backend;
use docproxy::config::Config;
use docproxy::server::Proxy;
use docproxy::ttl::TtlNormalizer;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.loglevel)),
        )
        .init();

    let ttl = TtlNormalizer::default();
    let backend = match backend::connect(&config, &ttl).await {
        Ok(backend) => backend,
        Err(e) => {
            error!("Failed to open backend {}: {e}", config.backend);
            std::process::exit(1);
        }
    };
    info!("Backend ready: {}", config.backend);

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    Proxy::new(config, backend, ttl).run(shutdown).await
}
