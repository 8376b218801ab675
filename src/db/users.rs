use chrono::NaiveDateTime;
use sqlx::{Pool, QueryBuilder, Sqlite};
use tracing::{info, instrument, warn};

use super::{ListFilter, ListQuery, Page, PageRequest, fetch_page};
use crate::auth::{DbUser, Role, SiteScope, User};
use crate::error::AppError;
use crate::models::UserRemovalReview;

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub email: Option<String>,
    pub role: Role,
    pub school_id: Option<i64>,
    pub worker_id: Option<i64>,
    pub expires_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<Role>,
    pub school_id: Option<i64>,
    pub expires_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Default)]
pub struct UserListFilter {
    pub role: Option<Role>,
    pub search: Option<String>,
    pub deleted: bool,
}

const USER_SELECT: &str = "SELECT u.id, u.username, u.email, r.name AS role, u.school_id, \
     u.worker_id, u.expires_at, u.created_at, u.deleted, u.deleted_at \
     FROM users u JOIN roles r ON r.id = u.role_id";

const USER_LIST: ListQuery = ListQuery {
    select: "u.id, u.username, u.email, r.name AS role, u.school_id, u.worker_id, \
             u.expires_at, u.created_at, u.deleted, u.deleted_at",
    from: "FROM users u JOIN roles r ON r.id = u.role_id",
    order_by: "u.username",
};

#[instrument(skip(pool))]
pub async fn role_id(pool: &Pool<Sqlite>, role: Role) -> Result<i64, AppError> {
    sqlx::query_scalar::<_, i64>("SELECT id FROM roles WHERE name = ?")
        .bind(role.as_str())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::Internal(format!("Role {} missing from roles table", role)))
}

#[instrument(skip(pool))]
pub async fn list_roles(pool: &Pool<Sqlite>) -> Result<Vec<(i64, String)>, AppError> {
    Ok(
        sqlx::query_as::<_, (i64, String)>("SELECT id, name FROM roles ORDER BY id")
            .fetch_all(pool)
            .await?,
    )
}

#[instrument(skip_all, fields(username = %user.username, role = %user.role))]
pub async fn create_user(pool: &Pool<Sqlite>, user: &NewUser) -> Result<User, AppError> {
    info!("Creating new user");

    let existing = sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE username = ?")
        .bind(&user.username)
        .fetch_optional(pool)
        .await?;

    if existing.is_some() {
        return Err(AppError::Conflict(format!(
            "Username '{}' already exists",
            user.username
        )));
    }

    let hashed_password = bcrypt::hash(&user.password, bcrypt::DEFAULT_COST)?;
    let role_id = role_id(pool, user.role).await?;

    let id = sqlx::query(
        "INSERT INTO users (username, email, password_hash, role_id, school_id, worker_id, expires_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&user.username)
    .bind(&user.email)
    .bind(hashed_password)
    .bind(role_id)
    .bind(user.school_id)
    .bind(user.worker_id)
    .bind(user.expires_at)
    .execute(pool)
    .await?
    .last_insert_rowid();

    get_user(pool, id).await
}

/// Live (not soft deleted) user by id.
#[instrument(skip(pool))]
pub async fn get_user(pool: &Pool<Sqlite>, id: i64) -> Result<User, AppError> {
    info!("Fetching user by ID");
    let sql = format!("{} WHERE u.id = ? AND u.deleted = FALSE", USER_SELECT);
    let row = sqlx::query_as::<_, DbUser>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(user) => Ok(User::from(user)),
        _ => Err(AppError::NotFound(format!("User {} not found", id))),
    }
}

/// Verifies a password against a live account. Unknown usernames, deleted
/// accounts and wrong passwords all yield `None`.
#[instrument(skip_all, fields(username))]
pub async fn authenticate_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    info!("Authenticating user");
    let row = sqlx::query_as::<_, (i64, String)>(
        "SELECT id, password_hash FROM users WHERE username = ? AND deleted = FALSE",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    let Some((id, password_hash)) = row else {
        return Ok(None);
    };

    match bcrypt::verify(password, &password_hash) {
        Ok(true) => Ok(Some(get_user(pool, id).await?)),
        Ok(false) => Ok(None),
        Err(err) => {
            warn!(error = %err, "Stored password hash could not be verified");
            Ok(None)
        }
    }
}

#[instrument(skip(pool))]
pub async fn list_users(
    pool: &Pool<Sqlite>,
    scope: &SiteScope,
    filter: &UserListFilter,
    page: PageRequest,
) -> Result<Page<User>, AppError> {
    info!("Listing users");
    let list_filter = ListFilter::new()
        .eq_bool("u.deleted", Some(filter.deleted))
        .sites("u.school_id", scope)
        .eq_text("r.name", filter.role.map(|r| r.as_str()))
        .search(&["u.username", "u.email"], filter.search.as_deref());

    fetch_page::<DbUser, User>(pool, &USER_LIST, &list_filter, page).await
}

#[instrument(skip_all, fields(user_id = id))]
pub async fn update_user(
    pool: &Pool<Sqlite>,
    id: i64,
    update: &UserUpdate,
) -> Result<User, AppError> {
    info!("Updating user");
    get_user(pool, id).await?;

    let mut qb = QueryBuilder::<Sqlite>::new("UPDATE users SET id = id");
    if let Some(email) = &update.email {
        qb.push(", email = ").push_bind(email.clone());
    }
    if let Some(password) = &update.password {
        let hashed_password = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;
        qb.push(", password_hash = ").push_bind(hashed_password);
    }
    if let Some(role) = update.role {
        let role_id = role_id(pool, role).await?;
        qb.push(", role_id = ").push_bind(role_id);
    }
    if let Some(school_id) = update.school_id {
        qb.push(", school_id = ").push_bind(school_id);
    }
    if let Some(expires_at) = update.expires_at {
        qb.push(", expires_at = ").push_bind(expires_at);
    }
    qb.push(" WHERE id = ").push_bind(id).push(" AND deleted = FALSE");
    qb.build().execute(pool).await?;

    get_user(pool, id).await
}

#[instrument(skip(pool))]
pub async fn count_users(pool: &Pool<Sqlite>) -> Result<i64, AppError> {
    Ok(sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?)
}

/// Soft deletes `user_id` and files the review record in one transaction.
#[instrument(skip(pool, reason, warning))]
pub async fn remove_user(
    pool: &Pool<Sqlite>,
    user_id: i64,
    removed_by: i64,
    reason: &str,
    warning: Option<&str>,
) -> Result<i64, AppError> {
    info!("Removing user");
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        "UPDATE users SET deleted = TRUE, deleted_at = CURRENT_TIMESTAMP \
         WHERE id = ? AND deleted = FALSE",
    )
    .bind(user_id)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("User {} not found", user_id)));
    }

    let review_id = sqlx::query(
        "INSERT INTO user_removal_reviews (removed_user_id, removed_by_id, reason, warning) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(removed_by)
    .bind(reason)
    .bind(warning)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    tx.commit().await?;
    Ok(review_id)
}

#[instrument(skip(pool))]
pub async fn list_removals(
    pool: &Pool<Sqlite>,
    scope: &SiteScope,
    page: PageRequest,
) -> Result<Page<UserRemovalReview>, AppError> {
    info!("Listing user removal reviews");
    let query = ListQuery {
        select: "rv.id, rv.removed_user_id, ru.username AS removed_username, rv.removed_by_id, \
                 rb.username AS removed_by_username, rv.reason, rv.warning, rv.timestamp",
        from: "FROM user_removal_reviews rv \
               JOIN users ru ON ru.id = rv.removed_user_id \
               JOIN users rb ON rb.id = rv.removed_by_id",
        order_by: "rv.timestamp DESC, rv.id DESC",
    };
    let filter = ListFilter::new().sites("ru.school_id", scope);

    fetch_page::<UserRemovalReview, UserRemovalReview>(pool, &query, &filter, page).await
}
