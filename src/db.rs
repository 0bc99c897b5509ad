use std::time::Duration;

use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool};

use crate::config::AppConfig;

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

/// Each request holds a connection only for the duration of its diesel
/// transaction, so a small pool goes a long way.
pub const DEFAULT_MAX_POOL_SIZE: u32 = 4;

const CHECKOUT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_pool(config: &AppConfig) -> anyhow::Result<PgPool> {
    init_pool_with_size(&config.database_url, config.database_max_pool_size)
}

pub fn init_pool_with_size(database_url: &str, max_size: u32) -> anyhow::Result<PgPool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = Pool::builder()
        .max_size(max_size.max(1))
        .min_idle(Some(1))
        .connection_timeout(CHECKOUT_TIMEOUT)
        .build(manager)?;
    Ok(pool)
}
