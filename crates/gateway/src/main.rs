use pitwall_gateway::config::{GatewayConfig, StartupError};
use pitwall_gateway::http;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(err) = serve().await {
        eprintln!("STARTUP_ERROR {}", err);
        std::process::exit(1);
    }
}

async fn serve() -> Result<(), StartupError> {
    let config = GatewayConfig::load()?;
    let bind_addr = config.bind_addr;
    let upstream_url = config.upstream_url.clone();
    let app = http::router(config).await?;

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|err| StartupError {
            code: "ERR_BIND_FAILED",
            message: format!("failed to bind {}: {}", bind_addr, err),
        })?;

    tracing::info!(%bind_addr, %upstream_url, "pitwall-gateway listening");

    axum::serve(listener, app).await.map_err(|err| StartupError {
        code: "ERR_SERVER_FAILED",
        message: err.to_string(),
    })
}
