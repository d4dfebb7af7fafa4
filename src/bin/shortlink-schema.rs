use anyhow::Context;
use shortlink::{config, orm};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let container = config::init_container().await?;

    orm::ensure_schema(&container.read(config::db_conn_capsule))
        .await
        .context("Failed to create url_mappings table")?;

    config::shutdown_container(&container).await
}
