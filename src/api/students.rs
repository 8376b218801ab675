use rocket::form::{Errors, Form};
use rocket::fs::TempFile;
use rocket::serde::json::{self, Json};
use rocket::{FromForm, Route, State};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::info;
use validator::Validate;

use super::{ApiResult, Created, MessageResponse, created, non_blank, request_scope};
use crate::auth::{
    Permission, User, ensure_not_locked, ensure_record_access, resolve_target_school,
};
use crate::config::AppConfig;
use crate::db::{
    NewStudent, Page, PageRequest, StudentDocument, StudentListFilter, StudentUpdate,
    create_student, create_students, get_student, list_students, owning_school, restore,
    set_student_document, soft_delete, update_student,
};
use crate::error::AppError;
use crate::models::{Category, Student};
use crate::rate_limit::Throttle;
use crate::uploads::{Accept, UploadArea, remove_upload, store_upload};
use crate::validation::{
    FormValidateExt, JsonValidateExt, parse_optional_date, read_json, validate_item,
};

#[derive(Deserialize, Validate, Debug)]
pub struct NewStudentRequest {
    #[validate(length(min = 1, max = 200, message = "full_name is required"))]
    pub full_name: String,
    #[validate(length(min = 1, max = 20, message = "grade is required"))]
    pub grade: String,
    pub category: String,
    #[serde(default)]
    pub physical_education: bool,
    #[validate(range(min = 1900, max = 2100, message = "year is out of range"))]
    pub year: i64,
    pub school_id: Option<i64>,
    pub id_number: Option<String>,
    pub date_of_birth: Option<String>,
}

#[derive(Deserialize, Validate, Debug)]
pub struct StudentUpdateRequest {
    #[validate(length(min = 1, max = 200, message = "full_name must not be empty"))]
    pub full_name: Option<String>,
    #[validate(length(min = 1, max = 20, message = "grade must not be empty"))]
    pub grade: Option<String>,
    pub category: Option<String>,
    pub physical_education: Option<bool>,
    #[validate(range(min = 1900, max = 2100, message = "year is out of range"))]
    pub year: Option<i64>,
    pub school_id: Option<i64>,
    pub id_number: Option<String>,
    pub date_of_birth: Option<String>,
}

/// `POST /students` takes a single student or an array of them.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum StudentPayload {
    Many(Vec<NewStudentRequest>),
    One(NewStudentRequest),
}

#[derive(Serialize)]
#[serde(untagged)]
pub enum CreatedStudents {
    One(Student),
    Many { created: usize, items: Vec<Student> },
}

#[derive(FromForm, Debug, Default)]
pub struct StudentQuery {
    page: Option<i64>,
    per_page: Option<i64>,
    site_id: Option<String>,
    grade: Option<String>,
    category: Option<String>,
    year: Option<i64>,
    physical_education: Option<bool>,
    search: Option<String>,
}

impl StudentQuery {
    fn filter(self, deleted: bool) -> Result<StudentListFilter, AppError> {
        Ok(StudentListFilter {
            grade: self.grade,
            category: non_blank(self.category)
                .map(|c| c.parse::<Category>())
                .transpose()?,
            year: self.year,
            physical_education: self.physical_education,
            search: self.search,
            deleted,
        })
    }
}

#[derive(FromForm)]
pub struct StudentFilesForm<'r> {
    photo: Option<TempFile<'r>>,
    parent_permission_pdf: Option<TempFile<'r>>,
}

async fn list_page(
    params: StudentQuery,
    user: &User,
    db: &Pool<Sqlite>,
    deleted: bool,
) -> Result<Page<Student>, AppError> {
    let scope = request_scope(user, params.site_id.as_deref())?;
    let page = PageRequest::new(params.page, params.per_page);
    list_students(db, &scope, &params.filter(deleted)?, page).await
}

/// Turns one request item into an insert, enforcing site access and the
/// maintenance lock on its school.
async fn prepare_student(
    db: &Pool<Sqlite>,
    user: &User,
    query_school: Option<i64>,
    request: NewStudentRequest,
) -> Result<NewStudent, AppError> {
    let school_id = match resolve_target_school(db, query_school, request.school_id, None).await? {
        Some(school_id) => school_id,
        None => user
            .school_id
            .ok_or_else(|| AppError::Validation("school_id is required".to_string()))?,
    };
    ensure_record_access(user, school_id)?;
    ensure_not_locked(db, user, school_id).await?;

    Ok(NewStudent {
        full_name: request.full_name.trim().to_string(),
        grade: request.grade.trim().to_string(),
        category: request.category.parse()?,
        physical_education: request.physical_education,
        year: request.year,
        school_id,
        id_number: non_blank(request.id_number),
        date_of_birth: parse_optional_date("date_of_birth", request.date_of_birth.as_deref())?,
    })
}

#[get("/students?<params..>")]
pub async fn api_list_students(
    params: StudentQuery,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Page<Student>> {
    user.require_permission(Permission::ViewStudents)?;
    Ok(Json(list_page(params, &user, db, false).await?))
}

#[get("/students/deleted?<params..>")]
pub async fn api_list_deleted_students(
    params: StudentQuery,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Page<Student>> {
    user.require_permission(Permission::RemoveStudents)?;
    Ok(Json(list_page(params, &user, db, true).await?))
}

#[get("/students/<id>")]
pub async fn api_get_student(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Student> {
    user.require_permission(Permission::ViewStudents)?;
    let student = get_student(db, id).await?;
    ensure_record_access(&user, student.school_id)?;

    Ok(Json(student))
}

#[post("/students?<school_id>", data = "<request>")]
pub async fn api_create_students(
    _throttle: Throttle,
    school_id: Option<i64>,
    request: Result<Json<StudentPayload>, json::Error<'_>>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Created<CreatedStudents> {
    user.require_permission(Permission::ManageStudents)?;

    match read_json(request)? {
        StudentPayload::One(request) => {
            validate_item(&request, None)?;
            let student = prepare_student(db, &user, school_id, request).await?;
            let student = create_student(db, &student).await?;
            info!(student_id = student.id, "Student created");
            Ok(created(CreatedStudents::One(student)))
        }
        StudentPayload::Many(requests) => {
            if requests.is_empty() {
                return Err(AppError::Validation("No students supplied".to_string()));
            }

            let mut students = Vec::with_capacity(requests.len());
            for (index, request) in requests.into_iter().enumerate() {
                validate_item(&request, Some(&format!("item {}", index)))?;
                students.push(prepare_student(db, &user, school_id, request).await?);
            }

            let items = create_students(db, &students).await?;
            info!(count = items.len(), "Students created");
            Ok(created(CreatedStudents::Many {
                created: items.len(),
                items,
            }))
        }
    }
}

#[put("/students/<id>", data = "<request>")]
pub async fn api_update_student(
    _throttle: Throttle,
    id: i64,
    request: Result<Json<StudentUpdateRequest>, json::Error<'_>>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Student> {
    user.require_permission(Permission::ManageStudents)?;
    let request = request.validate_custom()?;

    let existing = get_student(db, id).await?;
    ensure_record_access(&user, existing.school_id)?;
    ensure_not_locked(db, &user, existing.school_id).await?;

    if let Some(school_id) = request.school_id.filter(|s| *s != existing.school_id) {
        ensure_record_access(&user, school_id)?;
        ensure_not_locked(db, &user, school_id).await?;
    }

    let update = StudentUpdate {
        full_name: non_blank(request.full_name),
        grade: non_blank(request.grade),
        category: non_blank(request.category)
            .map(|c| c.parse::<Category>())
            .transpose()?,
        physical_education: request.physical_education,
        year: request.year,
        school_id: request.school_id,
        id_number: non_blank(request.id_number),
        date_of_birth: parse_optional_date("date_of_birth", request.date_of_birth.as_deref())?,
    };

    Ok(Json(update_student(db, id, &update).await?))
}

#[delete("/students/<id>")]
pub async fn api_delete_student(
    _throttle: Throttle,
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<MessageResponse> {
    user.require_permission(Permission::RemoveStudents)?;

    let student = get_student(db, id).await?;
    ensure_record_access(&user, student.school_id)?;
    ensure_not_locked(db, &user, student.school_id).await?;

    soft_delete::<Student>(db, id).await?;
    Ok(MessageResponse::new(format!("Student {} deleted", id)))
}

#[post("/students/<id>/restore")]
pub async fn api_restore_student(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<MessageResponse> {
    user.require_permission(Permission::RemoveStudents)?;

    if let Some(school_id) = owning_school::<Student>(db, id, true).await? {
        ensure_record_access(&user, school_id)?;
        ensure_not_locked(db, &user, school_id).await?;
    }
    restore::<Student>(db, id).await?;

    Ok(MessageResponse::new(format!("Student {} restored", id)))
}

#[post("/students/<id>/files", data = "<form>")]
pub async fn api_upload_student_files(
    id: i64,
    form: Result<Form<StudentFilesForm<'_>>, Errors<'_>>,
    user: User,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> ApiResult<Student> {
    user.require_permission(Permission::ManageStudents)?;
    let mut form = form.validate_custom()?;

    let student = get_student(db, id).await?;
    ensure_record_access(&user, student.school_id)?;
    ensure_not_locked(db, &user, student.school_id).await?;

    let uploads = [
        (form.photo.as_mut(), "photo", StudentDocument::Photo, Accept::Image),
        (
            form.parent_permission_pdf.as_mut(),
            "parent_permission_pdf",
            StudentDocument::ParentPermission,
            Accept::Pdf,
        ),
    ];

    let mut stored_any = false;
    for (file, field, document, accept) in uploads {
        let Some(file) = file else {
            continue;
        };

        let path = store_upload(&config.upload_dir, UploadArea::Students, field, file, accept).await?;
        if let Some(previous) = set_student_document(db, id, document, &path).await? {
            remove_upload(&config.upload_dir, &previous).await;
        }
        stored_any = true;
    }

    if !stored_any {
        return Err(AppError::Validation(
            "Provide photo and/or parent_permission_pdf".to_string(),
        ));
    }

    Ok(Json(get_student(db, id).await?))
}

pub fn routes() -> Vec<Route> {
    routes![
        api_list_students,
        api_list_deleted_students,
        api_get_student,
        api_create_students,
        api_update_student,
        api_delete_student,
        api_restore_student,
        api_upload_student_files,
    ]
}
