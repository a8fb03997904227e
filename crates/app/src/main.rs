use std::sync::Arc;

use engine::{CredentialStore, ProviderConfig, SqlStorage, SyncOptions, Synchronizer};
use migration::{Migrator, MigratorTrait};
use settings::Database;

mod settings;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let settings = settings::Settings::new()?;

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "homebot={level},telegram_bot={level},engine={level}",
            level = settings.app.level
        ))
        .init();

    let Some(telegram) = settings.telegram else {
        tracing::warn!("no telegram settings found, nothing to run");
        return Ok(());
    };

    let database = match parse_database(&settings.database).await {
        Ok(database) => database,
        Err(err) => {
            tracing::error!("failed to initialize database: {err}");
            return Err(err);
        }
    };

    let credentials = match CredentialStore::load(&telegram.credentials) {
        Ok(credentials) => credentials,
        Err(err) => {
            tracing::error!("failed to load credentials: {err}");
            return Err(err.into());
        }
    };

    let provider = ProviderConfig::from(&settings.provider);
    let synchronizer = Synchronizer::new(
        Arc::new(SqlStorage::new(database)),
        SyncOptions::from(&settings.sync),
    );

    let mut tasks = tokio::task::JoinSet::new();
    tasks.spawn(async move {
        tracing::info!("Found telegram settings...");
        match telegram_bot::Bot::builder()
            .token(&telegram.token)
            .credentials(credentials)
            .synchronizer(synchronizer)
            .provider(provider)
            .build()
        {
            Ok(bot) => bot.run().await,
            Err(err) => tracing::error!("failed to initialize telegram bot: {err}"),
        }
    });

    while tasks.join_next().await.is_some() {
        tasks.shutdown().await;
    }

    Ok(())
}

async fn parse_database(
    config: &settings::Database,
) -> Result<sea_orm::DatabaseConnection, Box<dyn std::error::Error + Send + Sync>> {
    let url = match config {
        Database::Memory => String::from("sqlite::memory:"),
        Database::Sqlite(path) => format!("sqlite:{}?mode=rwc", path),
    };

    let database = sea_orm::Database::connect(url).await?;
    Migrator::up(&database, None).await?;
    Ok(database)
}
