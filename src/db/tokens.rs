use chrono::{NaiveDateTime, Utc};
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::auth::TokenType;
use crate::error::AppError;

#[instrument(skip(pool))]
pub async fn revoke_token(
    pool: &Pool<Sqlite>,
    jti: &str,
    token_type: TokenType,
    user_id: Option<i64>,
    expires_at: NaiveDateTime,
) -> Result<(), AppError> {
    info!("Revoking token");

    sqlx::query(
        "INSERT INTO token_blocklist (jti, token_type, user_id, expires_at) VALUES (?, ?, ?, ?)",
    )
    .bind(jti)
    .bind(token_type.as_str())
    .bind(user_id)
    .bind(expires_at)
    .execute(pool)
    .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn is_token_revoked(pool: &Pool<Sqlite>, jti: &str) -> Result<bool, AppError> {
    let found = sqlx::query_scalar::<_, i64>("SELECT id FROM token_blocklist WHERE jti = ? LIMIT 1")
        .bind(jti)
        .fetch_optional(pool)
        .await?;

    Ok(found.is_some())
}

/// Drops blocklist rows whose token would have expired anyway.
#[instrument(skip(pool))]
pub async fn purge_expired_tokens(pool: &Pool<Sqlite>) -> Result<u64, AppError> {
    info!("Purging expired blocklist entries");

    let now = Utc::now().naive_utc();

    let result = sqlx::query("DELETE FROM token_blocklist WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::test_utils::TestDbBuilder;
    use chrono::Duration;

    #[rocket::async_test]
    async fn test_revocation_and_purge() {
        let test_db = TestDbBuilder::new().build().await.unwrap();
        let pool = &test_db.pool;
        let now = Utc::now().naive_utc();

        revoke_token(pool, "live", TokenType::Access, None, now + Duration::hours(1))
            .await
            .unwrap();
        revoke_token(pool, "stale", TokenType::Refresh, None, now - Duration::hours(1))
            .await
            .unwrap();

        assert!(is_token_revoked(pool, "live").await.unwrap());
        assert!(is_token_revoked(pool, "stale").await.unwrap());
        assert!(!is_token_revoked(pool, "never-seen").await.unwrap());

        assert_eq!(purge_expired_tokens(pool).await.unwrap(), 1);
        assert!(is_token_revoked(pool, "live").await.unwrap());
        assert!(!is_token_revoked(pool, "stale").await.unwrap());
    }
}
