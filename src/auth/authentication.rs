use rocket::Request;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use sqlx::SqlitePool;
use tracing::{Instrument, error, info, info_span};

use crate::config::AppConfig;
use crate::db::{get_user, is_token_revoked};
use crate::error::AppError;

use super::tokens::{ACCESS_COOKIE, Claims, REFRESH_COOKIE, TokenType, decode_token};
use super::User;

/// Reads a token from `Authorization: Bearer` first, then from the named cookie.
pub fn request_token(request: &Request<'_>, cookie_name: &str) -> Option<String> {
    let bearer = request
        .headers()
        .get_one("Authorization")
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string);

    bearer.or_else(|| {
        request
            .cookies()
            .get(cookie_name)
            .map(|cookie| cookie.value().to_string())
    })
}

/// An authenticated caller together with the claims of the token they used.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user: User,
    pub claims: Claims,
}

async fn authenticate(request: &Request<'_>) -> Result<AuthSession, AppError> {
    let (Some(pool), Some(config)) = (
        request.rocket().state::<SqlitePool>(),
        request.rocket().state::<AppConfig>(),
    ) else {
        error!("Database pool or config not found in managed state");
        return Err(AppError::Internal("Server state unavailable".to_string()));
    };

    let token = request_token(request, ACCESS_COOKIE)
        .ok_or_else(|| AppError::Authentication("Authentication required".to_string()))?;

    let claims = decode_token(config, &token, TokenType::Access)?;

    if is_token_revoked(pool, &claims.jti).await? {
        return Err(AppError::Authentication("Token has been revoked".to_string()));
    }

    let user = match get_user(pool, claims.user_id()?).await {
        Ok(user) => user,
        Err(AppError::NotFound(_)) => {
            return Err(AppError::Authentication("Account no longer exists".to_string()));
        }
        Err(err) => return Err(err),
    };

    if user.is_expired() {
        return Err(AppError::Authentication("Account has expired".to_string()));
    }

    Ok(AuthSession { user, claims })
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthSession {
    type Error = AppError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let outcome = request
            .local_cache_async(
                async {
                    authenticate(request)
                        .await
                        .map_err(|err| {
                            err.log_and_record("user_auth_guard");
                            (err.status_code(), err.public_message())
                        })
                }
                .instrument(info_span!("user_auth_guard")),
            )
            .await;

        match outcome {
            Ok(session) => {
                info!(
                    username = %session.user.username,
                    role = %session.user.role,
                    "User authenticated"
                );
                Outcome::Success(session.clone())
            }
            Err((status, message)) if *status == Status::Unauthorized => {
                Outcome::Error((*status, AppError::Authentication(message.clone())))
            }
            Err((status, message)) => {
                Outcome::Error((*status, AppError::Internal(message.clone())))
            }
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for User {
    type Error = AppError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        request
            .guard::<AuthSession>()
            .await
            .map(|session| session.user)
    }
}

/// Message of the authentication failure cached for this request, used by
/// the 401 catcher.
pub fn auth_failure_message(request: &Request<'_>) -> String {
    let cached = request.local_cache(|| -> Result<AuthSession, (Status, String)> {
        Err((Status::Unauthorized, "Authentication required".to_string()))
    });

    match cached {
        Err((_, message)) => message.clone(),
        Ok(_) => "Authentication required".to_string(),
    }
}

/// A verified, unrevoked refresh token and the live account it belongs to.
#[derive(Debug, Clone)]
pub struct RefreshSession {
    pub user: User,
    pub claims: Claims,
}

async fn authenticate_refresh(request: &Request<'_>) -> Result<RefreshSession, AppError> {
    let (Some(pool), Some(config)) = (
        request.rocket().state::<SqlitePool>(),
        request.rocket().state::<AppConfig>(),
    ) else {
        error!("Database pool or config not found in managed state");
        return Err(AppError::Internal("Server state unavailable".to_string()));
    };

    let token = request
        .cookies()
        .get(REFRESH_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .or_else(|| request_token(request, REFRESH_COOKIE))
        .ok_or_else(|| AppError::Authentication("Refresh token required".to_string()))?;

    let claims = decode_token(config, &token, TokenType::Refresh)?;

    if is_token_revoked(pool, &claims.jti).await? {
        return Err(AppError::Authentication("Token has been revoked".to_string()));
    }

    let user = match get_user(pool, claims.user_id()?).await {
        Ok(user) => user,
        Err(AppError::NotFound(_)) => {
            return Err(AppError::Authentication("Account no longer exists".to_string()));
        }
        Err(err) => return Err(err),
    };

    if user.is_expired() {
        return Err(AppError::Authentication("Account has expired".to_string()));
    }

    Ok(RefreshSession { user, claims })
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RefreshSession {
    type Error = AppError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match authenticate_refresh(request)
            .instrument(info_span!("refresh_auth_guard"))
            .await
        {
            Ok(session) => Outcome::Success(session),
            Err(err) => {
                err.log_and_record("refresh_auth_guard");
                let status = err.status_code();
                // Read back by the 401 catcher.
                request.local_cache(|| -> Result<AuthSession, (Status, String)> {
                    Err((status, err.public_message()))
                });
                Outcome::Error((status, err))
            }
        }
    }
}
