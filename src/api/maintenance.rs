use rocket::serde::json::{self, Json};
use rocket::{Route, State};
use serde::Deserialize;
use sqlx::{Pool, Sqlite};
use tracing::{info, warn};
use validator::Validate;

use super::{ApiResult, non_blank};
use crate::auth::{Permission, User, ensure_record_access};
use crate::db::{get_maintenance_lock, get_school, set_maintenance_lock};
use crate::models::MaintenanceLock;
use crate::validation::JsonValidateExt;

#[derive(Deserialize, Validate)]
pub struct LockRequest {
    pub site_id: i64,
    pub locked: bool,
    #[validate(length(max = 500, message = "reason is too long"))]
    pub reason: Option<String>,
}

#[post("/maintenance/lock", data = "<request>")]
pub async fn api_toggle_lock(
    request: Result<Json<LockRequest>, json::Error<'_>>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<MaintenanceLock> {
    user.require_permission(Permission::ToggleMaintenance)?;
    let request = request.validate_custom()?;
    get_school(db, request.site_id).await?;

    let lock = set_maintenance_lock(
        db,
        request.site_id,
        request.locked,
        non_blank(request.reason).as_deref(),
        user.id,
    )
    .await?;

    if lock.locked {
        warn!(site_id = lock.site_id, by = %user.username, reason = ?lock.reason, "Site locked for maintenance");
    } else {
        info!(site_id = lock.site_id, by = %user.username, "Site maintenance lock released");
    }

    Ok(Json(lock))
}

#[get("/maintenance/<site_id>")]
pub async fn api_lock_status(
    site_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<MaintenanceLock> {
    ensure_record_access(&user, site_id)?;
    get_school(db, site_id).await?;

    Ok(Json(
        get_maintenance_lock(db, site_id)
            .await?
            .unwrap_or_else(|| MaintenanceLock::unlocked(site_id)),
    ))
}

pub fn routes() -> Vec<Route> {
    routes![api_toggle_lock, api_lock_status]
}
