use anyhow::Context;

use autoshop_infra::{Shop, ShopConfig};
use autoshop_observability::LogFormat;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let format = LogFormat::from_env().context("reading log format")?;
    autoshop_observability::init(format);

    let config = ShopConfig::from_env().context("reading shop configuration")?;
    let addr = config.http_addr.clone();
    let shop = Shop::in_memory(config).context("starting shop")?;

    let app = autoshop_api::app::build_app(shop);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
