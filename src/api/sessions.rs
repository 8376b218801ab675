use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use csv::StringRecord;
use rocket::form::{Errors, Form};
use rocket::fs::TempFile;
use rocket::serde::json::Json;
use rocket::tokio::io::AsyncReadExt;
use rocket::{FromForm, Route, State};
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use tracing::{info, warn};

use super::{ApiResult, Created, created, non_blank, request_scope};
use crate::auth::{Permission, User, authorize_session_write, ensure_not_locked};
use crate::config::AppConfig;
use crate::db::{
    NewSession, Page, PageRequest, SessionListFilter, SessionStats, SpecAverage, create_session,
    create_sessions, get_student, list_sessions, session_stats, specs_summary,
};
use crate::error::AppError;
use crate::models::{Category, SessionRecord, Student};
use crate::uploads::{Accept, UploadArea, remove_upload, store_upload};
use crate::validation::{FormValidateExt, Specs, parse_date, parse_optional_date, parse_specs};

#[derive(FromForm)]
pub struct SessionForm<'r> {
    student_id: i64,
    session_name: String,
    date: String,
    duration_hours: f64,
    outcomes: Option<String>,
    specs: Option<String>,
    photo: Option<TempFile<'r>>,
}

#[derive(FromForm)]
pub struct BulkUploadForm<'r> {
    file: TempFile<'r>,
    grade: Option<String>,
    category: Option<String>,
}

#[derive(FromForm, Debug, Default)]
pub struct SessionQuery {
    page: Option<i64>,
    per_page: Option<i64>,
    site_id: Option<String>,
    kind: Option<String>,
    student_id: Option<i64>,
    grade: Option<String>,
    category: Option<String>,
    date_from: Option<String>,
    date_to: Option<String>,
    search: Option<String>,
}

impl SessionQuery {
    fn filter(&self) -> Result<SessionListFilter, AppError> {
        Ok(SessionListFilter {
            kind: non_blank(self.kind.clone())
                .map(|k| k.parse())
                .transpose()?,
            student_id: self.student_id,
            grade: non_blank(self.grade.clone()),
            category: non_blank(self.category.clone())
                .map(|c| c.parse::<Category>())
                .transpose()?,
            date_from: parse_optional_date("date_from", self.date_from.as_deref())?,
            date_to: parse_optional_date("date_to", self.date_to.as_deref())?,
            search: self.search.clone(),
        })
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct SkippedRow {
    pub row: usize,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct BulkUploadResult {
    pub created: usize,
    pub skipped: Vec<SkippedRow>,
}

/// One parsed CSV data row; `line` counts the header as line 1.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRow {
    pub line: usize,
    pub student_id: i64,
    pub session_name: String,
    pub date: NaiveDate,
    pub duration_hours: f64,
    pub outcomes: Option<String>,
    pub specs: Option<Specs>,
}

const REQUIRED_COLUMNS: &[&str] = &["student_id", "session_name", "date", "duration_hours"];

fn normalize_header(header: &str) -> String {
    header.trim().to_lowercase().replace(' ', "_")
}

fn validate_headers(headers: &StringRecord) -> Result<HashMap<String, usize>, AppError> {
    let header_map: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(idx, header)| (normalize_header(header), idx))
        .collect();

    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|column| !header_map.contains_key(*column))
        .collect();

    if !missing.is_empty() {
        return Err(AppError::Validation(format!(
            "CSV is missing required columns: {}",
            missing.join(", ")
        )));
    }

    Ok(header_map)
}

fn validate_duration(duration_hours: f64) -> Result<f64, AppError> {
    if duration_hours.is_finite() && duration_hours > 0.0 {
        Ok(duration_hours)
    } else {
        Err(AppError::Validation(
            "duration_hours must be greater than 0".to_string(),
        ))
    }
}

fn parse_row(
    record: &StringRecord,
    header_map: &HashMap<String, usize>,
    line: usize,
) -> Result<SessionRow, String> {
    let get_field = |name: &str| -> Option<String> {
        header_map
            .get(name)
            .and_then(|&idx| record.get(idx))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };
    let required = |name: &str| -> Result<String, String> {
        get_field(name).ok_or_else(|| format!("{}: required field is missing or empty", name))
    };

    let student_id = required("student_id")?;
    let student_id = student_id
        .parse::<i64>()
        .map_err(|_| format!("student_id: invalid number '{}'", student_id))?;
    let session_name = required("session_name")?;
    let date = parse_date("date", &required("date")?).map_err(|e| e.public_message())?;
    let duration = required("duration_hours")?;
    let duration_hours = duration
        .parse::<f64>()
        .map_err(|_| format!("duration_hours: invalid number '{}'", duration))
        .and_then(|d| validate_duration(d).map_err(|e| e.public_message()))?;
    let specs = parse_specs(get_field("specs").as_deref()).map_err(|e| e.public_message())?;

    Ok(SessionRow {
        line,
        student_id,
        session_name,
        date,
        duration_hours,
        outcomes: get_field("outcomes"),
        specs,
    })
}

/// Parses the upload into rows, keeping per-row failures alongside the
/// successes. Missing headers fail the whole file.
pub fn parse_session_csv(bytes: &[u8]) -> Result<Vec<Result<SessionRow, SkippedRow>>, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let header_map = validate_headers(reader.headers()?)?;

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let line = index + 2;
        let row = match record {
            Ok(record) => parse_row(&record, &header_map, line),
            Err(err) => Err(format!("unreadable row: {}", err)),
        };
        rows.push(row.map_err(|reason| SkippedRow { row: line, reason }));
    }

    Ok(rows)
}

#[post("/sessions", data = "<form>")]
pub async fn api_create_session(
    form: Result<Form<SessionForm<'_>>, Errors<'_>>,
    user: User,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> Created<SessionRecord> {
    let mut form = form.validate_custom()?;

    let student = get_student(db, form.student_id).await?;
    authorize_session_write(&user, &student)?;
    ensure_not_locked(db, &user, student.school_id).await?;

    let session_name = form.session_name.trim().to_string();
    if session_name.is_empty() {
        return Err(AppError::Validation("session_name is required".to_string()));
    }
    let date = parse_date("date", &form.date)?;
    let duration_hours = validate_duration(form.duration_hours)?;
    let specs = parse_specs(form.specs.as_deref())?;

    let photo = match form.photo.as_mut() {
        Some(file) => Some(
            store_upload(
                &config.upload_dir,
                UploadArea::SessionPhotos,
                "photo",
                file,
                Accept::Image,
            )
            .await?,
        ),
        None => None,
    };

    let session = NewSession {
        student_id: student.id,
        user_id: user.id,
        session_name,
        date,
        duration_hours,
        photo: photo.clone(),
        outcomes: non_blank(form.outcomes.take()),
        specs,
    };

    match create_session(db, &session, &student).await {
        Ok(record) => {
            info!(session_id = record.id, kind = %record.kind.as_str(), "Session recorded");
            Ok(created(record))
        }
        Err(err) => {
            if let Some(photo) = photo {
                remove_upload(&config.upload_dir, &photo).await;
            }
            Err(err)
        }
    }
}

#[get("/sessions?<params..>")]
pub async fn api_list_sessions(
    params: SessionQuery,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Page<SessionRecord>> {
    user.require_permission(Permission::ViewSessions)?;
    let scope = request_scope(&user, params.site_id.as_deref())?;
    let filter = params.filter()?;

    Ok(Json(
        list_sessions(db, &scope, &filter, PageRequest::new(params.page, params.per_page)).await?,
    ))
}

#[get("/sessions/stats?<params..>")]
pub async fn api_session_stats(
    params: SessionQuery,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<SessionStats> {
    user.require_permission(Permission::ViewSessions)?;
    let scope = request_scope(&user, params.site_id.as_deref())?;

    Ok(Json(session_stats(db, &scope, &params.filter()?).await?))
}

#[get("/sessions/specs/summary?<params..>")]
pub async fn api_specs_summary(
    params: SessionQuery,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<BTreeMap<String, SpecAverage>> {
    user.require_permission(Permission::ViewSessions)?;
    let scope = request_scope(&user, params.site_id.as_deref())?;

    Ok(Json(specs_summary(db, &scope, &params.filter()?).await?))
}

/// Why a well-formed row still cannot be imported for this caller.
async fn row_rejection(
    db: &Pool<Sqlite>,
    user: &User,
    student: &Student,
    grade: Option<&str>,
    category: Option<Category>,
) -> Result<Option<String>, AppError> {
    if grade.is_some_and(|grade| grade != student.grade) {
        return Ok(Some(format!("student is not in grade {}", grade.unwrap_or_default())));
    }
    if category.is_some_and(|category| category != student.category) {
        return Ok(Some("student does not match the category filter".to_string()));
    }

    match authorize_session_write(user, student) {
        Ok(()) => {}
        Err(AppError::Authorization(reason)) => return Ok(Some(reason)),
        Err(err) => return Err(err),
    }

    match ensure_not_locked(db, user, student.school_id).await {
        Ok(()) => Ok(None),
        Err(AppError::Authorization(reason)) => Ok(Some(reason)),
        Err(err) => Err(err),
    }
}

#[post("/sessions/bulkupload", data = "<form>")]
pub async fn api_bulk_upload_sessions(
    form: Result<Form<BulkUploadForm<'_>>, Errors<'_>>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Created<BulkUploadResult> {
    user.require_permission(Permission::BulkUploadSessions)?;
    let form = form.validate_custom()?;

    let mut bytes = Vec::with_capacity(form.file.len() as usize);
    Box::pin(form.file.open().await?)
        .read_to_end(&mut bytes)
        .await?;

    let grade = non_blank(form.grade);
    let category = non_blank(form.category)
        .map(|c| c.parse::<Category>())
        .transpose()?;

    let rows = parse_session_csv(&bytes)?;
    if rows.is_empty() {
        return Err(AppError::Validation("CSV contains no data rows".to_string()));
    }

    let mut skipped = Vec::new();
    let mut accepted: Vec<(NewSession, Student)> = Vec::new();

    for row in rows {
        let row = match row {
            Ok(row) => row,
            Err(skip) => {
                skipped.push(skip);
                continue;
            }
        };

        let student = match get_student(db, row.student_id).await {
            Ok(student) => student,
            Err(AppError::NotFound(_)) => {
                skipped.push(SkippedRow {
                    row: row.line,
                    reason: format!("student {} not found", row.student_id),
                });
                continue;
            }
            Err(err) => return Err(err),
        };

        if let Some(reason) =
            row_rejection(db, &user, &student, grade.as_deref(), category).await?
        {
            skipped.push(SkippedRow {
                row: row.line,
                reason,
            });
            continue;
        }

        accepted.push((
            NewSession {
                student_id: student.id,
                user_id: user.id,
                session_name: row.session_name,
                date: row.date,
                duration_hours: row.duration_hours,
                photo: None,
                outcomes: row.outcomes,
                specs: row.specs,
            },
            student,
        ));
    }

    let created_count = if accepted.is_empty() {
        0
    } else {
        create_sessions(db, &accepted).await?
    };

    if !skipped.is_empty() {
        warn!(skipped = skipped.len(), "Bulk upload skipped rows");
    }
    info!(created = created_count, "Bulk session upload finished");

    Ok(created(BulkUploadResult {
        created: created_count,
        skipped,
    }))
}

pub fn routes() -> Vec<Route> {
    routes![
        api_create_session,
        api_list_sessions,
        api_session_stats,
        api_specs_summary,
        api_bulk_upload_sessions,
    ]
}
