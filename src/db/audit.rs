use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::error::AppError;

pub const LOGIN_SUCCESS: &str = "LOGIN_SUCCESS";
pub const LOGIN_FAILED: &str = "LOGIN_FAILED";
pub const LOGOUT: &str = "LOGOUT";
pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";

/// Appends to the security trail. Every entry is mirrored as a tracing event
/// on the `audit` target.
#[instrument(skip(pool))]
pub async fn record_audit(
    pool: &Pool<Sqlite>,
    user_id: Option<i64>,
    action: &str,
    ip_address: Option<&str>,
) -> Result<(), AppError> {
    info!(target: "audit", user_id = ?user_id, ip = ?ip_address, action = %action, "Audit event");

    sqlx::query("INSERT INTO audit_logs (user_id, action, ip_address) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(action)
        .bind(ip_address)
        .execute(pool)
        .await?;

    Ok(())
}
