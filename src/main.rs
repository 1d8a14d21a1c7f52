//! Circulation server entry point

use std::net::SocketAddr;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use circulation_server::{
    api,
    config::{AppConfig, StorageBackend},
    models::{Book, Student},
    repository::{MemoryStore, Repository},
    services::Services,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;

    init_tracing(&config);

    tracing::info!("Starting circulation server v{}", env!("CARGO_PKG_VERSION"));

    let repository = match config.storage.backend {
        StorageBackend::Postgres => connect_postgres(&config).await?,
        StorageBackend::Memory => seed_memory(&config).await?,
    };
    tracing::info!(backend = repository.backend(), "Storage ready");

    let services = Services::new(repository, &config.circulation);

    let addr = SocketAddr::new(
        config
            .server
            .host
            .parse()
            .context("Invalid host address")?,
        config.server.port,
    );

    let state = AppState::new(config, services);
    let app = api::create_router(state);

    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "circulation_server={},tower_http=debug",
            config.logging.level
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn connect_postgres(config: &AppConfig) -> anyhow::Result<Repository> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .connect(&config.database.url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!("Connected to database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    tracing::info!("Database migrations completed");

    Ok(Repository::postgres(pool))
}

async fn seed_memory(config: &AppConfig) -> anyhow::Result<Repository> {
    let store = MemoryStore::new();

    for seed in &config.storage.seed_students {
        store
            .add_student(Student::new(seed.id, seed.name.clone()))
            .await;
    }
    for seed in &config.storage.seed_books {
        store
            .add_book(Book::new(seed.id, seed.title.clone(), seed.total_copies))
            .await
            .with_context(|| format!("Invalid seed book {}", seed.id))?;
    }
    store.audit().await.context("Seed data is inconsistent")?;

    tracing::warn!(
        students = config.storage.seed_students.len(),
        books = config.storage.seed_books.len(),
        "Using in-memory storage; state is lost on restart"
    );

    Ok(Repository::memory(store))
}
