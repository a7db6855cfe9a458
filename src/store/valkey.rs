use fred::prelude::*;

#[tracing::instrument(skip(url), err)]
pub async fn connect(url: &str) -> anyhow::Result<fred::clients::Pool> {
    let config = fred::types::config::Config::from_url(url)?;
    let pool = fred::clients::Pool::new(config, None, None, None, 4)?;
    pool.init().await?;

    tracing::info!("connected to valkey");
    Ok(pool)
}

/// Round-trip a `PING` — used by the `/health` endpoint.
pub async fn ping(pool: &fred::clients::Pool) -> anyhow::Result<()> {
    let _: String = pool.ping(None).await?;
    Ok(())
}
