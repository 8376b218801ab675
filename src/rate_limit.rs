use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rocket::Request;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use sqlx::SqlitePool;
use tracing::{error, warn};

use crate::auth::AuthSession;
use crate::db::{RATE_LIMIT_EXCEEDED, record_audit};
use crate::error::AppError;

/// Fixed-window request counter keyed by client and path.
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    windows: Mutex<HashMap<(String, String), (Instant, u32)>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Counts one hit and reports whether it fits in the current window.
    pub fn check(&self, client: &str, path: &str, now: Instant) -> bool {
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let window = self.window;
        windows.retain(|_, (started, _)| now.duration_since(*started) < window);

        let entry = windows
            .entry((client.to_string(), path.to_string()))
            .or_insert((now, 0));
        entry.1 += 1;
        entry.1 <= self.limit
    }
}

/// Request guard for throttled routes. Rejections are written to the audit
/// trail before the request is turned away with 429.
pub struct Throttle;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Throttle {
    type Error = AppError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(limiter) = request.rocket().state::<RateLimiter>() else {
            error!("Rate limiter not found in managed state");
            return Outcome::Success(Throttle);
        };

        let client = request
            .client_ip()
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let path = request.uri().path().to_string();

        if limiter.check(&client, &path, Instant::now()) {
            return Outcome::Success(Throttle);
        }

        warn!(client = %client, path = %path, "Rate limit exceeded");

        let user_id = match request.guard::<AuthSession>().await {
            Outcome::Success(session) => Some(session.user.id),
            _ => None,
        };

        if let Some(pool) = request.rocket().state::<SqlitePool>() {
            let action = format!("{}: {} {}", RATE_LIMIT_EXCEEDED, request.method(), path);
            if let Err(err) = record_audit(pool, user_id, &action, Some(&client)).await {
                err.log_and_record("rate_limit_audit");
            }
        }

        Outcome::Error((
            Status::TooManyRequests,
            AppError::RateLimited("Too many requests, slow down".to_string()),
        ))
    }
}
