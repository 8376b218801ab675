use rocket::serde::json::{self, Json};
use rocket::{Route, State};
use serde::Deserialize;
use sqlx::{Pool, Sqlite};
use tracing::info;
use validator::Validate;

use super::{ApiResult, Created, MessageResponse, created, request_scope};
use crate::auth::{Permission, User, ensure_not_locked, ensure_record_access};
use crate::db::{
    AssessmentInput, TermAverage, assessment_averages, assessment_student, create_assessment,
    delete_assessment, get_student, list_student_assessments, update_assessment,
};
use crate::error::AppError;
use crate::models::{Assessment, Student};
use crate::validation::{JsonValidateExt, Specs, validate_spec_scores};

#[derive(Deserialize, Validate)]
pub struct AssessmentRequest {
    pub term: String,
    #[validate(range(min = 0.0, max = 100.0, message = "score must be between 0 and 100"))]
    pub score: f64,
    #[validate(custom(function = "validate_spec_scores"))]
    pub specs: Option<Specs>,
}

impl AssessmentRequest {
    fn into_input(self) -> Result<AssessmentInput, AppError> {
        Ok(AssessmentInput {
            term: self.term.parse()?,
            score: self.score,
            specs: self.specs,
        })
    }
}

/// Loads the student named in the path and applies the site and maintenance
/// checks every assessment write needs.
async fn writable_student(
    db: &Pool<Sqlite>,
    user: &User,
    student_id: i64,
) -> Result<Student, AppError> {
    let student = get_student(db, student_id).await?;
    ensure_record_access(user, student.school_id)?;
    ensure_not_locked(db, user, student.school_id).await?;
    Ok(student)
}

#[post("/assessments/student/<student_id>", data = "<request>")]
pub async fn api_create_assessment(
    student_id: i64,
    request: Result<Json<AssessmentRequest>, json::Error<'_>>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Created<Assessment> {
    user.require_permission(Permission::ManageAssessments)?;
    let input = request.validate_custom()?.into_input()?;
    writable_student(db, &user, student_id).await?;

    let assessment = create_assessment(db, student_id, &input).await?;
    info!(assessment_id = assessment.id, term = %assessment.term, "Assessment created");
    Ok(created(assessment))
}

#[put("/assessments/student/<student_id>", data = "<request>")]
pub async fn api_update_assessment(
    student_id: i64,
    request: Result<Json<AssessmentRequest>, json::Error<'_>>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Assessment> {
    user.require_permission(Permission::ManageAssessments)?;
    let input = request.validate_custom()?.into_input()?;
    writable_student(db, &user, student_id).await?;

    Ok(Json(update_assessment(db, student_id, &input).await?))
}

#[get("/assessments/student/<student_id>")]
pub async fn api_student_assessments(
    student_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Vec<Assessment>> {
    user.require_permission(Permission::ViewAssessments)?;
    let student = get_student(db, student_id).await?;
    ensure_record_access(&user, student.school_id)?;

    Ok(Json(list_student_assessments(db, student_id).await?))
}

#[delete("/assessments/<id>")]
pub async fn api_delete_assessment(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<MessageResponse> {
    user.require_permission(Permission::DeleteAssessments)?;

    let student_id = assessment_student(db, id).await?;
    writable_student(db, &user, student_id).await?;
    delete_assessment(db, id).await?;

    Ok(MessageResponse::new(format!("Assessment {} deleted", id)))
}

#[get("/assessments/averages?<site_id>&<grade>")]
pub async fn api_assessment_averages(
    site_id: Option<String>,
    grade: Option<String>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Vec<TermAverage>> {
    user.require_permission(Permission::ViewAssessments)?;
    let scope = request_scope(&user, site_id.as_deref())?;

    Ok(Json(assessment_averages(db, &scope, grade.as_deref()).await?))
}

pub fn routes() -> Vec<Route> {
    routes![
        api_create_assessment,
        api_update_assessment,
        api_student_assessments,
        api_delete_assessment,
        api_assessment_averages,
    ]
}
