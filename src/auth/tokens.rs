use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::AppError;

use super::User;

pub const ACCESS_COOKIE: &str = "access_token_cookie";
pub const REFRESH_COOKIE: &str = "refresh_token_cookie";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub school_id: Option<i64>,
    pub jti: String,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn user_id(&self) -> Result<i64, AppError> {
        self.sub
            .parse()
            .map_err(|_| AppError::Authentication("Token subject is not a user id".to_string()))
    }

    pub fn expires_at(&self) -> NaiveDateTime {
        DateTime::<Utc>::from_timestamp(self.exp, 0)
            .map(|dt| dt.naive_utc())
            .unwrap_or_else(|| Utc::now().naive_utc())
    }
}

pub struct IssuedToken {
    pub token: String,
    pub claims: Claims,
}

pub fn issue_token(
    config: &AppConfig,
    user: &User,
    token_type: TokenType,
) -> Result<IssuedToken, AppError> {
    let now = Utc::now();
    let lifetime = match token_type {
        TokenType::Access => Duration::minutes(config.access_token_minutes),
        TokenType::Refresh => Duration::hours(config.refresh_token_hours),
    };

    let claims = Claims {
        sub: user.id.to_string(),
        role: user.role.as_str().to_string(),
        school_id: user.school_id,
        jti: Uuid::new_v4().to_string(),
        token_type,
        exp: (now + lifetime).timestamp(),
        iat: now.timestamp(),
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )?;

    Ok(IssuedToken { token, claims })
}

pub fn decode_token(
    config: &AppConfig,
    token: &str,
    expected: TokenType,
) -> Result<Claims, AppError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )?;

    if data.claims.token_type != expected {
        return Err(AppError::Authentication(format!(
            "Expected a {} token",
            expected.as_str()
        )));
    }

    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{DbUser, Role};
    use std::path::PathBuf;

    fn head_coach() -> User {
        User::from(DbUser {
            id: Some(42),
            username: Some("coach".to_string()),
            role: Some("head_coach".to_string()),
            school_id: Some(3),
            ..Default::default()
        })
    }

    #[test]
    fn test_access_token_carries_identity_claims() {
        let config = AppConfig::for_tests(PathBuf::from("/tmp"));
        let issued = issue_token(&config, &head_coach(), TokenType::Access).unwrap();

        let claims = decode_token(&config, &issued.token, TokenType::Access).unwrap();

        assert_eq!(claims.user_id().unwrap(), 42);
        assert_eq!(claims.role, Role::HeadCoach.as_str());
        assert_eq!(claims.school_id, Some(3));
        assert_eq!(claims.jti, issued.claims.jti);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_token_type_is_enforced() {
        let config = AppConfig::for_tests(PathBuf::from("/tmp"));
        let refresh = issue_token(&config, &head_coach(), TokenType::Refresh).unwrap();

        let result = decode_token(&config, &refresh.token, TokenType::Access);
        assert!(matches!(result, Err(AppError::Authentication(_))));
    }

    #[test]
    fn test_foreign_signature_is_rejected() {
        let config = AppConfig::for_tests(PathBuf::from("/tmp"));
        let mut other = config.clone();
        other.jwt_secret = "another-secret".to_string();

        let issued = issue_token(&other, &head_coach(), TokenType::Access).unwrap();
        assert!(decode_token(&config, &issued.token, TokenType::Access).is_err());
    }

    #[test]
    fn test_each_token_gets_a_fresh_jti() {
        let config = AppConfig::for_tests(PathBuf::from("/tmp"));
        let first = issue_token(&config, &head_coach(), TokenType::Access).unwrap();
        let second = issue_token(&config, &head_coach(), TokenType::Access).unwrap();

        assert_ne!(first.claims.jti, second.claims.jti);
    }
}
