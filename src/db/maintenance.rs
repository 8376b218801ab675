use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::error::AppError;
use crate::models::MaintenanceLock;

#[instrument(skip(pool))]
pub async fn get_maintenance_lock(
    pool: &Pool<Sqlite>,
    site_id: i64,
) -> Result<Option<MaintenanceLock>, AppError> {
    Ok(sqlx::query_as::<_, MaintenanceLock>(
        "SELECT site_id, locked, reason, locked_by_id, updated_at \
         FROM maintenance_locks WHERE site_id = ?",
    )
    .bind(site_id)
    .fetch_optional(pool)
    .await?)
}

/// Engages or releases the lock for one site; other sites are untouched.
#[instrument(skip(pool))]
pub async fn set_maintenance_lock(
    pool: &Pool<Sqlite>,
    site_id: i64,
    locked: bool,
    reason: Option<&str>,
    locked_by: i64,
) -> Result<MaintenanceLock, AppError> {
    info!(locked, "Setting maintenance lock");

    sqlx::query(
        "INSERT INTO maintenance_locks (site_id, locked, reason, locked_by_id, updated_at) \
         VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP) \
         ON CONFLICT(site_id) DO UPDATE SET locked = excluded.locked, reason = excluded.reason, \
         locked_by_id = excluded.locked_by_id, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(site_id)
    .bind(locked)
    .bind(reason)
    .bind(locked_by)
    .execute(pool)
    .await?;

    get_maintenance_lock(pool, site_id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("Lock for site {} vanished", site_id)))
}
