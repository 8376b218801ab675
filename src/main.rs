#[macro_use]
extern crate rocket;

mod api;
mod auth;
mod config;
mod cors;
mod db;
mod env;
mod error;
mod forms;
mod models;
mod rate_limit;
mod telemetry;
#[cfg(test)]
mod test;
mod uploads;
mod validation;

use std::time::Duration;

use auth::Role;
use config::{AppConfig, ConfigError};
use cors::Cors;
use db::{NewUser, count_users, create_user, purge_expired_tokens};
use error::AppError;
use rate_limit::RateLimiter;
use rocket::fairing::AdHoc;
use rocket::{Build, Rocket, tokio};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use telemetry::{TelemetryFairing, init_tracing, shutdown_telemetry};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Anyhow(anyhow::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("{0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("Application error: {0}")]
    App(#[from] AppError),
    #[error("{0}")]
    Rocket(Box<rocket::Error>),
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Error::Anyhow(value)
    }
}

impl From<rocket::Error> for Error {
    fn from(value: rocket::Error) -> Self {
        Error::Rocket(Box::new(value))
    }
}

const SEED_ADMIN_USERNAME: &str = "admin";

/// Creates the first superuser on an empty database when `ADMIN_PASSWORD`
/// is configured.
async fn seed_admin(pool: &SqlitePool, config: &AppConfig) -> Result<(), AppError> {
    let Some(password) = config.admin_password.as_deref() else {
        return Ok(());
    };

    if count_users(pool).await? > 0 {
        return Ok(());
    }

    create_user(
        pool,
        &NewUser {
            username: SEED_ADMIN_USERNAME.to_string(),
            password: password.to_string(),
            email: None,
            role: Role::Superuser,
            school_id: None,
            worker_id: None,
            expires_at: None,
        },
    )
    .await?;

    warn!(username = SEED_ADMIN_USERNAME, "Seeded initial superuser account");
    Ok(())
}

fn spawn_blocklist_cleanup(pool: SqlitePool) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;

        loop {
            match purge_expired_tokens(&pool).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Purged {} expired blocklist entries", count);
                    }
                }
                Err(e) => {
                    error!("Failed to purge token blocklist: {}", e);
                }
            }

            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    });
}

#[rocket::main]
async fn main() -> Result<(), Error> {
    let env_files = env::load_environment()?;
    let config = AppConfig::from_env()?;

    init_tracing(&config)?;
    info!(files = ?env_files, "Loaded environment");

    let connect_options =
        SqliteConnectOptions::from_str(&config.database_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(connect_options).await?;

    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed successfully");

    seed_admin(&pool, &config).await?;
    spawn_blocklist_cleanup(pool.clone());

    let _rocket = init_rocket(pool, config).launch().await?;
    Ok(())
}

pub fn init_rocket(pool: SqlitePool, config: AppConfig) -> Rocket<Build> {
    info!("Starting school administration API");

    let figment = rocket::Config::figment()
        .merge(("limits.file", format!("{}MiB", config.max_upload_mb)))
        .merge(("limits.data-form", format!("{}MiB", config.max_upload_mb + 1)));

    let limiter = RateLimiter::new(
        config.rate_limit_requests,
        Duration::from_secs(config.rate_limit_window_secs),
    );
    let cors = config.cors_origin.clone().map(Cors::new);

    let rocket = rocket::custom(figment)
        .manage(pool)
        .manage(limiter)
        .manage(config)
        .mount("/api", api::routes())
        .register("/api", api::catchers::catchers())
        .attach(TelemetryFairing)
        .attach(AdHoc::on_shutdown("Telemetry shutdown", |_| {
            Box::pin(async {
                shutdown_telemetry();
            })
        }));

    match cors {
        Some(cors) => rocket.attach(cors),
        None => rocket,
    }
}
