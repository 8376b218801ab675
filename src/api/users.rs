use chrono::{NaiveDate, NaiveDateTime};
use rocket::serde::json::{self, Json};
use rocket::{FromForm, Route, State};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::info;
use validator::Validate;

use super::{ApiResult, Created, MessageResponse, created, non_blank, request_scope};
use crate::auth::{Permission, Role, User, ensure_record_access};
use crate::db::{
    NewUser, Page, PageRequest, UserListFilter, UserUpdate, create_user, get_user, get_worker,
    list_removals, list_users, owning_school, remove_user, restore, update_user,
};
use crate::error::AppError;
use crate::models::UserRemovalReview;
use crate::validation::JsonValidateExt;

#[derive(Deserialize, Validate)]
pub struct NewUserRequest {
    #[validate(length(min = 3, max = 64, message = "username must be 3 to 64 characters"))]
    pub username: String,
    #[validate(length(min = 8, message = "password must be at least 8 characters"))]
    pub password: String,
    #[validate(email(message = "email is not a valid address"))]
    pub email: Option<String>,
    pub role: String,
    pub school_id: Option<i64>,
    pub worker_id: Option<i64>,
    pub expires_at: Option<String>,
}

#[derive(Deserialize, Validate)]
pub struct UserUpdateRequest {
    #[validate(email(message = "email is not a valid address"))]
    pub email: Option<String>,
    #[validate(length(min = 8, message = "password must be at least 8 characters"))]
    pub password: Option<String>,
    pub role: Option<String>,
    pub school_id: Option<i64>,
    pub expires_at: Option<String>,
}

#[derive(Deserialize, Validate)]
pub struct RemoveUserRequest {
    #[validate(length(min = 1, message = "reason is required"))]
    pub reason: String,
    pub warning: Option<String>,
}

#[derive(Serialize)]
pub struct RemovalResponse {
    pub message: String,
    pub review_id: i64,
}

#[derive(FromForm, Debug, Default)]
pub struct UserQuery {
    page: Option<i64>,
    per_page: Option<i64>,
    site_id: Option<String>,
    role: Option<String>,
    search: Option<String>,
}

fn parse_role(raw: &str) -> Result<Role, AppError> {
    raw.parse()
        .map_err(|_| AppError::Validation(format!("Invalid role: {}", raw)))
}

/// Accepts `YYYY-MM-DDTHH:MM:SS` or a bare date, which expires at the end of
/// that day.
fn parse_expiry(raw: Option<&str>) -> Result<Option<NaiveDateTime>, AppError> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(None);
    };

    if let Ok(at) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Ok(Some(at));
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(23, 59, 59))
        .map(Some)
        .ok_or_else(|| AppError::Validation(format!("expires_at: invalid timestamp '{}'", raw)))
}

/// Only a superuser may hand out the superuser role.
fn ensure_may_grant(caller: &User, role: Role) -> Result<(), AppError> {
    if role == Role::Superuser && caller.role != Role::Superuser {
        return Err(AppError::Authorization(
            "Only a superuser may grant the superuser role".to_string(),
        ));
    }
    Ok(())
}

/// Shared by `POST /users` and `POST /auth/register`. A `worker_id` promotes
/// an existing worker, who lends their school and email to the account.
pub async fn register_account(
    db: &Pool<Sqlite>,
    caller: &User,
    request: NewUserRequest,
) -> Result<User, AppError> {
    let role = parse_role(&request.role)?;
    ensure_may_grant(caller, role)?;

    let mut school_id = request.school_id;
    let mut email = non_blank(request.email);

    if let Some(worker_id) = request.worker_id {
        let worker = get_worker(db, worker_id).await?;
        school_id = school_id.or(Some(worker.school_id));
        email = email.or(worker.email);
    }

    match school_id {
        Some(school_id) => ensure_record_access(caller, school_id)?,
        None if !role.is_elevated() => {
            return Err(AppError::Validation(format!(
                "school_id is required for role '{}'",
                role
            )));
        }
        None => {}
    }

    let user = create_user(
        db,
        &NewUser {
            username: request.username.trim().to_string(),
            password: request.password,
            email,
            role,
            school_id,
            worker_id: request.worker_id,
            expires_at: parse_expiry(request.expires_at.as_deref())?,
        },
    )
    .await?;

    info!(created_by = %caller.username, username = %user.username, "User account created");
    Ok(user)
}

#[get("/users?<params..>")]
pub async fn api_list_users(
    params: UserQuery,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Page<User>> {
    user.require_permission(Permission::ViewUsers)?;
    let scope = request_scope(&user, params.site_id.as_deref())?;
    let role = params.role.as_deref().map(parse_role).transpose()?;

    Ok(Json(
        list_users(
            db,
            &scope,
            &UserListFilter {
                role,
                search: params.search,
                deleted: false,
            },
            PageRequest::new(params.page, params.per_page),
        )
        .await?,
    ))
}

#[get("/users/deleted?<params..>")]
pub async fn api_list_deleted_users(
    params: UserQuery,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Page<User>> {
    user.require_permission(Permission::ViewRemovedUsers)?;
    let scope = request_scope(&user, params.site_id.as_deref())?;
    let role = params.role.as_deref().map(parse_role).transpose()?;

    Ok(Json(
        list_users(
            db,
            &scope,
            &UserListFilter {
                role,
                search: params.search,
                deleted: true,
            },
            PageRequest::new(params.page, params.per_page),
        )
        .await?,
    ))
}

#[get("/users/removals?<params..>")]
pub async fn api_list_removals(
    params: UserQuery,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Page<UserRemovalReview>> {
    user.require_permission(Permission::ViewRemovedUsers)?;
    let scope = request_scope(&user, params.site_id.as_deref())?;

    Ok(Json(
        list_removals(db, &scope, PageRequest::new(params.page, params.per_page)).await?,
    ))
}

#[post("/users", data = "<request>")]
pub async fn api_create_user(
    request: Result<Json<NewUserRequest>, json::Error<'_>>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Created<User> {
    user.require_permission(Permission::ManageUsers)?;
    let request = request.validate_custom()?;

    Ok(created(register_account(db, &user, request).await?))
}

#[put("/users/<id>", data = "<request>")]
pub async fn api_update_user(
    id: i64,
    request: Result<Json<UserUpdateRequest>, json::Error<'_>>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<User> {
    user.require_permission(Permission::ManageUsers)?;
    let request = request.validate_custom()?;

    let target = get_user(db, id).await?;
    if let Some(school_id) = target.school_id {
        ensure_record_access(&user, school_id)?;
    }
    if target.role == Role::Superuser {
        ensure_may_grant(&user, target.role)?;
    }
    if let Some(school_id) = request.school_id {
        ensure_record_access(&user, school_id)?;
    }

    let role = request.role.as_deref().map(parse_role).transpose()?;
    if let Some(role) = role {
        ensure_may_grant(&user, role)?;
    }

    let new_role = role.unwrap_or(target.role);
    if !new_role.is_elevated() && request.school_id.or(target.school_id).is_none() {
        return Err(AppError::Validation(format!(
            "school_id is required for role '{}'",
            new_role
        )));
    }

    let update = UserUpdate {
        email: non_blank(request.email),
        password: request.password,
        role,
        school_id: request.school_id,
        expires_at: parse_expiry(request.expires_at.as_deref())?,
    };

    Ok(Json(update_user(db, id, &update).await?))
}

#[post("/users/<id>/remove", data = "<request>")]
pub async fn api_remove_user(
    id: i64,
    request: Result<Json<RemoveUserRequest>, json::Error<'_>>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<RemovalResponse> {
    user.require_permission(Permission::RemoveUsers)?;
    let request = request.validate_custom()?;

    if id == user.id {
        return Err(AppError::Validation(
            "You cannot remove your own account".to_string(),
        ));
    }

    let target = get_user(db, id).await?;
    if let Some(school_id) = target.school_id {
        ensure_record_access(&user, school_id)?;
    }
    ensure_may_grant(&user, target.role)?;

    let review_id = remove_user(
        db,
        id,
        user.id,
        request.reason.trim(),
        non_blank(request.warning).as_deref(),
    )
    .await?;

    info!(removed_by = %user.username, removed = %target.username, "User removed");
    Ok(Json(RemovalResponse {
        message: format!("User {} removed", target.username),
        review_id,
    }))
}

#[post("/users/<id>/restore")]
pub async fn api_restore_user(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<MessageResponse> {
    user.require_permission(Permission::RemoveUsers)?;

    if let Some(school_id) = owning_school::<User>(db, id, true).await? {
        ensure_record_access(&user, school_id)?;
    }
    restore::<User>(db, id).await?;

    Ok(MessageResponse::new(format!("User {} restored", id)))
}

pub fn routes() -> Vec<Route> {
    routes![
        api_list_users,
        api_list_deleted_users,
        api_list_removals,
        api_create_user,
        api_update_user,
        api_remove_user,
        api_restore_user,
    ]
}
