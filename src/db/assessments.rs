use serde::Serialize;
use sqlx::{Pool, QueryBuilder, Sqlite};
use tracing::{info, instrument, warn};

use super::ListFilter;
use crate::auth::SiteScope;
use crate::error::AppError;
use crate::models::{Assessment, DbAssessment, Term};
use crate::validation::Specs;

#[derive(Debug, Clone)]
pub struct AssessmentInput {
    pub term: Term,
    pub score: f64,
    pub specs: Option<Specs>,
}

#[derive(Debug, Serialize, Clone, PartialEq, sqlx::FromRow)]
pub struct TermAverage {
    pub term: String,
    pub average: f64,
    pub assessments: i64,
}

const ASSESSMENT_COLUMNS: &str = "id, student_id, term, score, specs, created_at, updated_at";

fn encode_specs(specs: &Option<Specs>) -> Result<Option<String>, AppError> {
    Ok(specs.as_ref().map(serde_json::to_string).transpose()?)
}

/// Creates the single assessment a student may hold for a term. A second
/// create for the same term is refused, including one that loses a race at
/// the unique index.
#[instrument(skip(pool, input), fields(term = %input.term))]
pub async fn create_assessment(
    pool: &Pool<Sqlite>,
    student_id: i64,
    input: &AssessmentInput,
) -> Result<Assessment, AppError> {
    info!("Creating assessment");
    let duplicate = || AppError::Conflict(format!("Assessment for {} already exists", input.term));

    let existing = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM assessments WHERE student_id = ? AND term = ?",
    )
    .bind(student_id)
    .bind(input.term.as_str())
    .fetch_optional(pool)
    .await?;

    if existing.is_some() {
        return Err(duplicate());
    }

    let result = sqlx::query(
        "INSERT INTO assessments (student_id, term, score, specs) VALUES (?, ?, ?, ?)",
    )
    .bind(student_id)
    .bind(input.term.as_str())
    .bind(input.score)
    .bind(encode_specs(&input.specs)?)
    .execute(pool)
    .await;

    let id = match result {
        Ok(done) => done.last_insert_rowid(),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            warn!("Concurrent assessment create lost at the unique index");
            return Err(duplicate());
        }
        Err(err) => return Err(err.into()),
    };

    get_assessment(pool, id).await
}

/// Overwrites the score (and specs, when given) of an existing term.
#[instrument(skip(pool, input), fields(term = %input.term))]
pub async fn update_assessment(
    pool: &Pool<Sqlite>,
    student_id: i64,
    input: &AssessmentInput,
) -> Result<Assessment, AppError> {
    info!("Updating assessment");

    let mut qb = QueryBuilder::<Sqlite>::new("UPDATE assessments SET score = ");
    qb.push_bind(input.score);
    if let Some(specs) = encode_specs(&input.specs)? {
        qb.push(", specs = ").push_bind(specs);
    }
    qb.push(", updated_at = CURRENT_TIMESTAMP WHERE student_id = ")
        .push_bind(student_id)
        .push(" AND term = ")
        .push_bind(input.term.as_str());
    let result = qb.build().execute(pool).await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "No assessment for {} to update",
            input.term
        )));
    }

    let id = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM assessments WHERE student_id = ? AND term = ?",
    )
    .bind(student_id)
    .bind(input.term.as_str())
    .fetch_one(pool)
    .await?;

    get_assessment(pool, id).await
}

#[instrument(skip(pool))]
pub async fn get_assessment(pool: &Pool<Sqlite>, id: i64) -> Result<Assessment, AppError> {
    let sql = format!("SELECT {} FROM assessments WHERE id = ?", ASSESSMENT_COLUMNS);
    sqlx::query_as::<_, DbAssessment>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .map(Assessment::from)
        .ok_or_else(|| AppError::NotFound(format!("Assessment {} not found", id)))
}

#[instrument(skip(pool))]
pub async fn list_student_assessments(
    pool: &Pool<Sqlite>,
    student_id: i64,
) -> Result<Vec<Assessment>, AppError> {
    let sql = format!(
        "SELECT {} FROM assessments WHERE student_id = ? ORDER BY term",
        ASSESSMENT_COLUMNS
    );
    let rows = sqlx::query_as::<_, DbAssessment>(&sql)
        .bind(student_id)
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(Assessment::from).collect())
}

/// Student that owns an assessment, used for the same-school check.
#[instrument(skip(pool))]
pub async fn assessment_student(pool: &Pool<Sqlite>, id: i64) -> Result<i64, AppError> {
    sqlx::query_scalar::<_, i64>("SELECT student_id FROM assessments WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Assessment {} not found", id)))
}

#[instrument(skip(pool))]
pub async fn delete_assessment(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deleting assessment");
    let result = sqlx::query("DELETE FROM assessments WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Assessment {} not found", id)));
    }
    Ok(())
}

/// Average score per term across live students in scope.
#[instrument(skip(pool))]
pub async fn assessment_averages(
    pool: &Pool<Sqlite>,
    scope: &SiteScope,
    grade: Option<&str>,
) -> Result<Vec<TermAverage>, AppError> {
    info!("Computing assessment averages");
    let mut qb = QueryBuilder::<Sqlite>::new(
        "SELECT a.term AS term, AVG(a.score) AS average, COUNT(*) AS assessments \
         FROM assessments a JOIN students s ON s.id = a.student_id",
    );
    ListFilter::new()
        .raw("s.deleted = FALSE")
        .sites("s.school_id", scope)
        .eq_text("s.grade", grade)
        .push_where(&mut qb);
    qb.push(" GROUP BY a.term ORDER BY a.term");

    Ok(qb.build_query_as::<TermAverage>().fetch_all(pool).await?)
}
