use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mock_service=info,tower_http=info")),
        )
        .init();

    PrometheusBuilder::new()
        .with_http_listener("0.0.0.0:8001".parse::<SocketAddr>()?)
        .install()?;

    let addr: SocketAddr = std::env::var("MOCK_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8000".to_string())
        .parse()?;
    let token = std::env::var("ACCESS_TOKEN").unwrap_or_else(|_| mock_service::DEV_TOKEN.to_string());

    mock_service::run(addr, &token).await
}
