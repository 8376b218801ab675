use rocket::serde::json::Json;
use rocket::{Route, State};
use serde_json::{Value, json};
use sqlx::{Pool, Sqlite};
use tracing::error;

use super::ApiResult;
use crate::auth::{Permission, User, allowed_site_ids, parse_site_ids, resolve_allowed_sites};
use crate::db::{DashboardSummary, dashboard_summary};
use crate::forms::{FormSchema, form_schema};

#[get("/dashboard/summary?<site_id>")]
pub async fn api_dashboard_summary(
    site_id: Option<String>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<DashboardSummary> {
    user.require_permission(Permission::ViewDashboard)?;
    let sites = allowed_site_ids(db, &user, &parse_site_ids(site_id.as_deref())?).await?;

    Ok(Json(dashboard_summary(db, &sites).await?))
}

#[get("/forms/<entity>")]
pub async fn api_form_schema(
    entity: &str,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<FormSchema> {
    let scope = resolve_allowed_sites(&user, &[])?;
    Ok(Json(form_schema(db, &scope, entity, user.role).await?))
}

#[get("/health")]
pub async fn health(db: &State<Pool<Sqlite>>) -> Json<Value> {
    let database = match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(db.inner()).await {
        Ok(_) => "ok",
        Err(err) => {
            error!(error = %err, "Health check could not reach the database");
            "unavailable"
        }
    };

    Json(json!({ "status": "ok", "database": database }))
}

pub fn routes() -> Vec<Route> {
    routes![api_dashboard_summary, api_form_schema, health]
}
