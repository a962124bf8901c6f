use anyhow::{Context, Result};
use profile_service::db::ProfileDb;
use profile_service::schema;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let db_url = std::env::var("DB_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .context("DB_URL or DATABASE_URL is required")?;

    let db = ProfileDb::connect(&db_url).await?;
    let applied = schema::apply(&db).await?;
    if applied.is_empty() {
        tracing::info!(target: "profile.db", "schema already up to date");
    } else {
        tracing::info!(target: "profile.db", ?applied, "schema migrated");
    }
    Ok(())
}
