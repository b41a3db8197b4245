use anyhow::{Context, Result};
use ironescrow::{
    config::Config,
    infrastructure::{db, logging},
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config_path = std::env::var("IRONESCROW_CONFIG").ok();
    let config = Config::from_env_and_file(config_path.as_deref())?;
    config.validate()?;
    logging::init_logging(&config.logging)?;

    let pool = db::init_pool(&config.database)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to apply migrations")?;

    tracing::info!("✅ Database migrations completed");
    Ok(())
}
