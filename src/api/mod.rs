use rocket::Route;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde::Serialize;

use crate::auth::{SiteScope, User, parse_site_ids, resolve_allowed_sites};
use crate::error::AppError;

pub mod assessments;
pub mod attendance;
pub mod auth;
pub mod catchers;
pub mod dashboard;
pub mod maintenance;
pub mod meals;
pub mod schools;
pub mod sessions;
pub mod students;
pub mod trainings;
pub mod users;
pub mod workers;

pub type ApiResult<T> = Result<Json<T>, AppError>;
pub type Created<T> = Result<Custom<Json<T>>, AppError>;

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            message: message.into(),
        })
    }
}

pub fn created<T>(value: T) -> Custom<Json<T>> {
    Custom(Status::Created, Json(value))
}

/// Site scope for a list or aggregate request carrying an optional
/// `site_id=1,2` parameter.
pub fn request_scope(user: &User, site_id: Option<&str>) -> Result<SiteScope, AppError> {
    resolve_allowed_sites(user, &parse_site_ids(site_id)?)
}

/// Treats blank form and JSON strings as absent.
pub fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn routes() -> Vec<Route> {
    [
        auth::routes(),
        schools::routes(),
        users::routes(),
        students::routes(),
        attendance::routes(),
        workers::routes(),
        trainings::routes(),
        sessions::routes(),
        assessments::routes(),
        meals::routes(),
        maintenance::routes(),
        dashboard::routes(),
    ]
    .concat()
}
