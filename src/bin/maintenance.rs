use std::env;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use diesel::prelude::*;

use matflow::{
    config::AppConfig,
    db,
    models::Document,
    s3,
    schema::{documents, sessions},
    storage::{ObjectStorage, S3Storage},
};

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("sweep-sessions") => sweep_sessions()?,
        Some("purge-documents") => purge_documents().await?,
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\nUsage: maintenance sweep-sessions | purge-documents");
            std::process::exit(1);
        }
        None => {
            eprintln!("Usage: maintenance sweep-sessions | purge-documents");
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Removes sessions that expired or were revoked more than a day ago. Live
/// sessions are untouched.
fn sweep_sessions() -> Result<()> {
    let config = AppConfig::from_env()?;
    let pool = db::init_pool(&config)?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let cutoff = (Utc::now() - Duration::days(1)).naive_utc();
    let removed = diesel::delete(
        sessions::table.filter(
            sessions::expires_at
                .lt(cutoff)
                .or(sessions::revoked_at.lt(cutoff)),
        ),
    )
    .execute(&mut conn)
    .context("failed to sweep sessions")?;

    println!("Removed {removed} stale sessions.");
    Ok(())
}

/// Hard-deletes document rows that were soft-deleted more than 30 days ago.
/// The stored object is removed only when no remaining row references its
/// content hash; access logs keep their document ids either way.
async fn purge_documents() -> Result<()> {
    let config = AppConfig::from_env()?;
    let pool = db::init_pool(&config)?;

    let s3_client = s3::build_client(&config).await?;
    let storage = S3Storage::new(s3_client, config.s3_bucket.clone());

    let mut conn = pool.get().context("failed to get database connection")?;

    let cutoff = (Utc::now() - Duration::days(30)).naive_utc();
    let purgeable: Vec<Document> = documents::table
        .filter(documents::deleted_at.lt(cutoff))
        .load(&mut conn)
        .context("failed to load purgeable documents")?;

    if purgeable.is_empty() {
        println!("Nothing to purge.");
        return Ok(());
    }

    println!("Purging {} documents…", purgeable.len());

    for document in &purgeable {
        let still_referenced: i64 = documents::table
            .filter(documents::storage_key.eq(&document.storage_key))
            .filter(documents::id.ne(document.id))
            .filter(documents::deleted_at.is_null())
            .count()
            .get_result(&mut conn)
            .context("failed to count storage references")?;

        if still_referenced == 0 {
            if let Err(err) = storage.delete_object(&document.storage_key).await {
                eprintln!(
                    "Failed to delete object {} from storage: {err}",
                    document.storage_key
                );
                continue;
            }
        }

        diesel::delete(documents::table.find(document.id))
            .execute(&mut conn)
            .context("failed to remove document record")?;
    }

    println!("Purge complete.");
    Ok(())
}
