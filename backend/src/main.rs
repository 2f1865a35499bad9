use anyhow::Result;
use clap::Parser;

mod api;
mod config;
mod db;
mod error;
mod schema;
mod utils;

#[actix_web::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = config::Config::parse();
    log::info!(
        "Database: {} (pool size {}, timeout {}s)",
        config.database_url,
        config.pool_size,
        config.db_timeout_secs
    );

    let db = db::Db::connect(&config.database_url, config.pool_size, config.db_timeout())?;
    db.ensure_schema()?;

    api::new_http_server(&config, db).await?;
    log::info!("Shutdown complete");
    Ok(())
}
