use rocket::serde::json::{self, Json};
use rocket::{FromForm, Route, State};
use serde::Deserialize;
use sqlx::{Pool, Sqlite};
use validator::Validate;

use super::{ApiResult, Created, created, non_blank, request_scope};
use crate::auth::{Permission, User, allowed_site_ids, ensure_record_access, parse_site_ids};
use crate::db::{
    NewSchool, SchoolSummary, SchoolUpdate, create_school, list_schools, school_summaries,
    update_school,
};
use crate::models::School;
use crate::validation::JsonValidateExt;

#[derive(Deserialize, Validate)]
pub struct NewSchoolRequest {
    #[validate(length(min = 1, max = 200, message = "name is required"))]
    pub name: String,
    #[validate(length(min = 1, message = "address is required"))]
    pub address: String,
    pub contact_number: Option<String>,
    #[validate(email(message = "email is not a valid address"))]
    pub email: Option<String>,
}

#[derive(Deserialize, Validate)]
pub struct SchoolUpdateRequest {
    #[validate(length(min = 1, max = 200, message = "name must not be empty"))]
    pub name: Option<String>,
    #[validate(length(min = 1, message = "address must not be empty"))]
    pub address: Option<String>,
    pub contact_number: Option<String>,
    #[validate(email(message = "email is not a valid address"))]
    pub email: Option<String>,
}

#[derive(FromForm, Debug, Default)]
pub struct SummaryQuery {
    school_id: Option<String>,
    include_details: Option<bool>,
}

#[get("/schools?<site_id>")]
pub async fn api_list_schools(
    site_id: Option<String>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Vec<School>> {
    user.require_permission(Permission::ViewSchools)?;
    let scope = request_scope(&user, site_id.as_deref())?;

    Ok(Json(list_schools(db, &scope).await?))
}

#[post("/schools", data = "<request>")]
pub async fn api_create_school(
    request: Result<Json<NewSchoolRequest>, json::Error<'_>>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Created<School> {
    user.require_permission(Permission::ManageSchools)?;
    let request = request.validate_custom()?;

    let school = create_school(
        db,
        &NewSchool {
            name: request.name.trim().to_string(),
            address: request.address.trim().to_string(),
            contact_number: non_blank(request.contact_number),
            email: non_blank(request.email),
        },
    )
    .await?;

    Ok(created(school))
}

#[put("/schools/<id>", data = "<request>")]
pub async fn api_update_school(
    id: i64,
    request: Result<Json<SchoolUpdateRequest>, json::Error<'_>>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<School> {
    user.require_permission(Permission::ManageSchools)?;
    let request = request.validate_custom()?;
    ensure_record_access(&user, id)?;

    let update = SchoolUpdate {
        name: non_blank(request.name),
        address: non_blank(request.address),
        contact_number: request.contact_number,
        email: request.email,
    };

    Ok(Json(update_school(db, id, &update).await?))
}

#[get("/schools/summary?<params..>")]
pub async fn api_school_summary(
    params: SummaryQuery,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Vec<SchoolSummary>> {
    user.require_permission(Permission::ViewSchools)?;
    let requested = parse_site_ids(params.school_id.as_deref())?;
    let sites = allowed_site_ids(db, &user, &requested).await?;

    Ok(Json(
        school_summaries(db, &sites, params.include_details.unwrap_or(false)).await?,
    ))
}

pub fn routes() -> Vec<Route> {
    routes![
        api_list_schools,
        api_create_school,
        api_update_school,
        api_school_summary,
    ]
}
