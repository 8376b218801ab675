use chrono::Utc;
use rocket::serde::json::{self, Json};
use rocket::{FromForm, Route, State};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::info;
use validator::Validate;

use super::{ApiResult, Created, MessageResponse, created, request_scope};
use crate::auth::{Permission, User, ensure_not_locked, ensure_record_access};
use crate::db::{
    AttendanceMark, AttendanceStats, AttendanceSummary, attendance_record_school,
    attendance_stats, attendance_summary, delete_attendance, get_student, mark_attendance,
    student_attendance,
};
use crate::models::AttendanceRecord;
use crate::validation::{JsonValidateExt, parse_date, parse_optional_date};

#[derive(Deserialize, Serialize, Validate)]
pub struct MarkEntry {
    pub student_id: i64,
    pub status: String,
    #[validate(length(max = 500, message = "note is too long"))]
    pub note: Option<String>,
}

#[derive(Deserialize, Validate)]
pub struct MarkAttendanceRequest {
    pub date: String,
    #[validate(length(min = 1, message = "at least one entry is required"))]
    #[validate(nested)]
    pub entries: Vec<MarkEntry>,
}

#[derive(FromForm, Debug, Default)]
pub struct RangeQuery {
    site_id: Option<String>,
    date_from: Option<String>,
    date_to: Option<String>,
}

#[post("/students/attendance/mark", data = "<request>")]
pub async fn api_mark_attendance(
    request: Result<Json<MarkAttendanceRequest>, json::Error<'_>>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Created<Vec<AttendanceRecord>> {
    user.require_permission(Permission::RecordAttendance)?;
    let request = request.validate_custom()?;
    let date = parse_date("date", &request.date)?;

    let mut marks = Vec::with_capacity(request.entries.len());
    for entry in request.entries {
        let student = get_student(db, entry.student_id).await?;
        ensure_record_access(&user, student.school_id)?;
        ensure_not_locked(db, &user, student.school_id).await?;

        marks.push(AttendanceMark {
            student,
            status: entry.status.parse()?,
            note: entry.note,
        });
    }

    let records = mark_attendance(db, date, &marks, user.id).await?;
    info!(date = %date, count = records.len(), "Attendance marked");
    Ok(created(records))
}

#[get("/students/attendance/summary?<date>&<site_id>")]
pub async fn api_attendance_summary(
    date: Option<String>,
    site_id: Option<String>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Vec<AttendanceSummary>> {
    user.require_permission(Permission::ViewAttendance)?;
    let scope = request_scope(&user, site_id.as_deref())?;
    let date = parse_optional_date("date", date.as_deref())?
        .unwrap_or_else(|| Utc::now().date_naive());

    Ok(Json(attendance_summary(db, &scope, date).await?))
}

#[get("/students/attendance/stats?<params..>")]
pub async fn api_attendance_stats(
    params: RangeQuery,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<AttendanceStats> {
    user.require_permission(Permission::ViewAttendance)?;
    let scope = request_scope(&user, params.site_id.as_deref())?;
    let date_from = parse_optional_date("date_from", params.date_from.as_deref())?;
    let date_to = parse_optional_date("date_to", params.date_to.as_deref())?;

    Ok(Json(attendance_stats(db, &scope, date_from, date_to).await?))
}

#[get("/students/<id>/attendance?<params..>")]
pub async fn api_student_attendance(
    id: i64,
    params: RangeQuery,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Vec<AttendanceRecord>> {
    user.require_permission(Permission::ViewAttendance)?;
    let student = get_student(db, id).await?;
    ensure_record_access(&user, student.school_id)?;

    let date_from = parse_optional_date("date_from", params.date_from.as_deref())?;
    let date_to = parse_optional_date("date_to", params.date_to.as_deref())?;

    Ok(Json(student_attendance(db, id, date_from, date_to).await?))
}

#[delete("/students/attendance/<id>")]
pub async fn api_delete_attendance(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<MessageResponse> {
    user.require_permission(Permission::DeleteAttendance)?;

    let school_id = attendance_record_school(db, id).await?;
    ensure_record_access(&user, school_id)?;
    ensure_not_locked(db, &user, school_id).await?;

    delete_attendance(db, id).await?;
    Ok(MessageResponse::new(format!("Attendance record {} deleted", id)))
}

pub fn routes() -> Vec<Route> {
    routes![
        api_mark_attendance,
        api_attendance_summary,
        api_attendance_stats,
        api_student_attendance,
        api_delete_attendance,
    ]
}
