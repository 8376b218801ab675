use std::net::IpAddr;

use rocket::http::{Cookie, CookieJar};
use rocket::serde::json::{self, Json};
use rocket::{Route, State};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::{info, warn};
use validator::Validate;

use super::users::{NewUserRequest, register_account};
use super::{ApiResult, Created, MessageResponse, created};
use crate::auth::{
    ACCESS_COOKIE, AuthSession, Permission, REFRESH_COOKIE, RefreshSession, TokenType, User,
    decode_token, issue_token,
};
use crate::config::AppConfig;
use crate::db::{LOGIN_FAILED, LOGIN_SUCCESS, LOGOUT, authenticate_user, record_audit, revoke_token};
use crate::error::AppError;
use crate::rate_limit::Throttle;
use crate::validation::JsonValidateExt;

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "username is required"))]
    username: String,
    #[validate(length(min = 1, message = "password is required"))]
    password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub message: String,
    pub user: User,
}

fn token_cookie(
    config: &AppConfig,
    name: &'static str,
    token: String,
    max_age: rocket::time::Duration,
) -> Cookie<'static> {
    Cookie::build((name, token))
        .http_only(true)
        .secure(config.cookie_secure)
        .same_site(config.cookie_same_site)
        .path("/")
        .max_age(max_age)
        .build()
}

fn set_access_cookie(
    cookies: &CookieJar<'_>,
    config: &AppConfig,
    user: &User,
) -> Result<(), AppError> {
    let access = issue_token(config, user, TokenType::Access)?;
    cookies.add(token_cookie(
        config,
        ACCESS_COOKIE,
        access.token,
        rocket::time::Duration::minutes(config.access_token_minutes),
    ));
    Ok(())
}

async fn audit(db: &Pool<Sqlite>, user_id: Option<i64>, action: &str, ip: Option<IpAddr>) {
    let ip = ip.map(|ip| ip.to_string());
    if let Err(err) = record_audit(db, user_id, action, ip.as_deref()).await {
        err.log_and_record("auth_audit");
    }
}

#[post("/auth/login", data = "<login>")]
pub async fn api_login(
    _throttle: Throttle,
    login: Result<Json<LoginRequest>, json::Error<'_>>,
    cookies: &CookieJar<'_>,
    ip: Option<IpAddr>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> ApiResult<LoginResponse> {
    let login = login.validate_custom()?;

    let Some(user) = authenticate_user(db, &login.username, &login.password).await? else {
        warn!(username = %login.username, "Login rejected");
        audit(db, None, &format!("{}: {}", LOGIN_FAILED, login.username), ip).await;
        return Err(AppError::Authentication(
            "Invalid username or password".to_string(),
        ));
    };

    if user.is_expired() {
        audit(db, Some(user.id), &format!("{}: account expired", LOGIN_FAILED), ip).await;
        return Err(AppError::Authentication("Account has expired".to_string()));
    }

    set_access_cookie(cookies, config, &user)?;
    let refresh = issue_token(config, &user, TokenType::Refresh)?;
    cookies.add(token_cookie(
        config,
        REFRESH_COOKIE,
        refresh.token,
        rocket::time::Duration::hours(config.refresh_token_hours),
    ));

    audit(db, Some(user.id), LOGIN_SUCCESS, ip).await;
    info!(username = %user.username, role = %user.role, "User logged in");

    Ok(Json(LoginResponse {
        message: "Login successful".to_string(),
        user,
    }))
}

#[post("/auth/refresh")]
pub async fn api_refresh(
    session: RefreshSession,
    cookies: &CookieJar<'_>,
    config: &State<AppConfig>,
) -> ApiResult<LoginResponse> {
    set_access_cookie(cookies, config, &session.user)?;
    info!(username = %session.user.username, "Access token refreshed");

    Ok(Json(LoginResponse {
        message: "Token refreshed".to_string(),
        user: session.user,
    }))
}

#[post("/auth/logout")]
pub async fn api_logout(
    session: AuthSession,
    cookies: &CookieJar<'_>,
    ip: Option<IpAddr>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> ApiResult<MessageResponse> {
    let user_id = Some(session.user.id);

    revoke_token(
        db,
        &session.claims.jti,
        TokenType::Access,
        user_id,
        session.claims.expires_at(),
    )
    .await?;

    if let Some(refresh) = cookies.get(REFRESH_COOKIE) {
        match decode_token(config, refresh.value(), TokenType::Refresh) {
            Ok(claims) => {
                revoke_token(db, &claims.jti, TokenType::Refresh, user_id, claims.expires_at())
                    .await?;
            }
            Err(err) => warn!(error = %err, "Ignoring unusable refresh token on logout"),
        }
    }

    cookies.remove(Cookie::build(ACCESS_COOKIE).path("/"));
    cookies.remove(Cookie::build(REFRESH_COOKIE).path("/"));

    audit(db, user_id, LOGOUT, ip).await;

    Ok(MessageResponse::new("Logged out"))
}

#[get("/auth/me")]
pub async fn api_me(user: User) -> Json<User> {
    Json(user)
}

#[post("/auth/register", data = "<request>")]
pub async fn api_register(
    request: Result<Json<NewUserRequest>, json::Error<'_>>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Created<User> {
    user.require_permission(Permission::ManageUsers)?;
    let request = request.validate_custom()?;

    Ok(created(register_account(db, &user, request).await?))
}

pub fn routes() -> Vec<Route> {
    routes![api_login, api_refresh, api_logout, api_me, api_register]
}
