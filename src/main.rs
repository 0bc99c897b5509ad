use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use diesel::prelude::*;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::info;
use tracing_subscriber::EnvFilter;

use matflow::{
    access::RoleCategory,
    audit::BufferedAuditSink,
    auth::jwt::JwtService,
    config::AppConfig,
    db,
    models::NewRole,
    routes,
    s3,
    schema::roles,
    state::AppState,
    storage::S3Storage,
};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env()?;
    info!(
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        s3_bucket = %config.s3_bucket,
        "loaded configuration"
    );

    let pool = db::init_pool(&config)?;
    {
        let mut conn = pool.get().context("failed to get database connection")?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow::anyhow!("failed to run migrations: {err}"))?;
        seed_builtin_roles(&mut conn)?;
    }

    let s3_client = s3::build_client(&config).await?;
    let storage = Arc::new(S3Storage::new(s3_client, config.s3_bucket.clone()));
    let jwt = JwtService::from_config(&config)?;
    let audit = Arc::new(BufferedAuditSink::spawn(
        config.audit_buffer_capacity,
        Duration::from_secs(config.audit_flush_seconds),
    ));

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let state = AppState::new(pool, config, storage, jwt, audit.clone());
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    audit.shutdown().await;
    Ok(())
}

/// One role per category ships with the system so a fresh database is usable
/// before any bespoke roles are configured.
fn seed_builtin_roles(conn: &mut PgConnection) -> Result<()> {
    let rows: Vec<NewRole> = RoleCategory::ALL
        .iter()
        .map(|category| NewRole {
            name: category.as_str().to_string(),
            category: category.as_str().to_string(),
            rank: category.rank(),
        })
        .collect();

    diesel::insert_into(roles::table)
        .values(&rows)
        .on_conflict_do_nothing()
        .execute(conn)
        .context("failed to seed builtin roles")?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
