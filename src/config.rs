use std::path::PathBuf;
use std::str::FromStr;

use rocket::http::SameSite;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set when running with the production profile")]
    Missing(&'static str),

    #[error("invalid value '{value}' for {key}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt_secret: String,
    pub access_token_minutes: i64,
    pub refresh_token_hours: i64,
    pub upload_dir: PathBuf,
    pub cors_origin: Option<String>,
    pub cookie_secure: bool,
    pub cookie_same_site: SameSite,
    pub rate_limit_requests: u32,
    pub rate_limit_window_secs: u64,
    pub max_upload_mb: u64,
    pub admin_password: Option<String>,
    pub otlp_endpoint: Option<String>,
    pub otlp_api_key: Option<String>,
}

const DEV_JWT_SECRET: &str = "dev-insecure-secret";

fn optional(key: &'static str) -> Option<String> {
    dotenvy::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parsed<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

fn parse_same_site(value: &str) -> Option<SameSite> {
    match value.trim().to_ascii_lowercase().as_str() {
        "strict" => Some(SameSite::Strict),
        "lax" => Some(SameSite::Lax),
        "none" => Some(SameSite::None),
        _ => None,
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let is_production =
            dotenvy::var("ROCKET_PROFILE").unwrap_or_default() == "production";

        let jwt_secret = match optional("JWT_SECRET_KEY") {
            Some(secret) => secret,
            None if is_production => return Err(ConfigError::Missing("JWT_SECRET_KEY")),
            None => DEV_JWT_SECRET.to_string(),
        };

        let cookie_same_site = match optional("JWT_COOKIE_SAMESITE") {
            Some(value) => parse_same_site(&value).ok_or(ConfigError::Invalid {
                key: "JWT_COOKIE_SAMESITE",
                value,
            })?,
            None => SameSite::Lax,
        };

        let cookie_secure = match optional("JWT_COOKIE_SECURE") {
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "JWT_COOKIE_SECURE",
                        value,
                    });
                }
            },
            None => true,
        };

        Ok(Self {
            database_url: optional("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://school_admin.db?mode=rwc".to_string()),
            jwt_secret,
            access_token_minutes: parsed("JWT_ACCESS_TOKEN_MINUTES", 60)?,
            refresh_token_hours: parsed("JWT_REFRESH_TOKEN_HOURS", 24)?,
            upload_dir: PathBuf::from(
                optional("UPLOAD_FOLDER").unwrap_or_else(|| "static/uploads".to_string()),
            ),
            cors_origin: optional("CORS_ORIGIN"),
            cookie_secure,
            cookie_same_site,
            rate_limit_requests: parsed("RATE_LIMIT_REQUESTS", 10)?,
            rate_limit_window_secs: parsed("RATE_LIMIT_WINDOW_SECS", 60)?,
            max_upload_mb: parsed("MAX_UPLOAD_MB", 16)?,
            admin_password: optional("ADMIN_PASSWORD"),
            otlp_endpoint: optional("OTLP_ENDPOINT"),
            otlp_api_key: optional("OTLP_API_KEY"),
        })
    }

    #[cfg(test)]
    pub fn for_tests(upload_dir: PathBuf) -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            jwt_secret: "test-secret".to_string(),
            access_token_minutes: 15,
            refresh_token_hours: 1,
            upload_dir,
            cors_origin: Some("http://localhost:3000".to_string()),
            cookie_secure: false,
            cookie_same_site: SameSite::Lax,
            rate_limit_requests: 1000,
            rate_limit_window_secs: 60,
            max_upload_mb: 4,
            admin_password: None,
            otlp_endpoint: None,
            otlp_api_key: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: [&str; 8] = [
        "ROCKET_PROFILE",
        "JWT_SECRET_KEY",
        "JWT_COOKIE_SAMESITE",
        "JWT_COOKIE_SECURE",
        "RATE_LIMIT_REQUESTS",
        "UPLOAD_FOLDER",
        "CORS_ORIGIN",
        "ADMIN_PASSWORD",
    ];

    fn env_with(
        overrides: &[(&'static str, &'static str)],
    ) -> Vec<(&'static str, Option<&'static str>)> {
        KEYS.iter()
            .map(|key| {
                let value = overrides
                    .iter()
                    .find(|(name, _)| name == key)
                    .map(|(_, value)| *value);
                (*key, value)
            })
            .collect()
    }

    #[test]
    #[serial]
    fn test_defaults_apply_in_development() {
        temp_env::with_vars(env_with(&[]), || {
            let config = AppConfig::from_env().unwrap();

            assert_eq!(config.jwt_secret, DEV_JWT_SECRET);
            assert_eq!(config.access_token_minutes, 60);
            assert_eq!(config.refresh_token_hours, 24);
            assert_eq!(config.rate_limit_requests, 10);
            assert_eq!(config.upload_dir, PathBuf::from("static/uploads"));
            assert!(config.cookie_secure);
            assert_eq!(config.cookie_same_site, SameSite::Lax);
            assert!(config.cors_origin.is_none());
            assert!(config.admin_password.is_none());
        });
    }

    #[test]
    #[serial]
    fn test_production_requires_jwt_secret() {
        temp_env::with_vars(env_with(&[("ROCKET_PROFILE", "production")]), || {
            let result = AppConfig::from_env();
            assert!(matches!(result, Err(ConfigError::Missing("JWT_SECRET_KEY"))));
        });
    }

    #[test]
    #[serial]
    fn test_overrides_are_read_from_environment() {
        let vars = env_with(&[
            ("JWT_SECRET_KEY", "s3cret"),
            ("JWT_COOKIE_SAMESITE", "Strict"),
            ("JWT_COOKIE_SECURE", "false"),
            ("RATE_LIMIT_REQUESTS", "3"),
            ("CORS_ORIGIN", "https://schools.example.org"),
        ]);

        temp_env::with_vars(vars, || {
            let config = AppConfig::from_env().unwrap();

            assert_eq!(config.jwt_secret, "s3cret");
            assert_eq!(config.cookie_same_site, SameSite::Strict);
            assert!(!config.cookie_secure);
            assert_eq!(config.rate_limit_requests, 3);
            assert_eq!(
                config.cors_origin.as_deref(),
                Some("https://schools.example.org")
            );
        });
    }

    #[test]
    #[serial]
    fn test_invalid_values_are_rejected() {
        temp_env::with_vars(env_with(&[("RATE_LIMIT_REQUESTS", "lots")]), || {
            let result = AppConfig::from_env();
            assert!(matches!(
                result,
                Err(ConfigError::Invalid {
                    key: "RATE_LIMIT_REQUESTS",
                    ..
                })
            ));
        });

        temp_env::with_vars(env_with(&[("JWT_COOKIE_SAMESITE", "sideways")]), || {
            assert!(AppConfig::from_env().is_err());
        });
    }
}
