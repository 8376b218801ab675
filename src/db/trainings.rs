use chrono::NaiveDate;
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::error::AppError;
use crate::models::TrainingRecord;

#[derive(Debug, Clone)]
pub struct NewTraining {
    pub worker_id: i64,
    pub title: String,
    pub description: String,
    pub outcomes: String,
    pub venue: String,
    pub date: NaiveDate,
    pub accredited: bool,
    pub price: Option<f64>,
    pub photo: Option<String>,
}

const TRAINING_COLUMNS: &str =
    "id, worker_id, title, description, outcomes, venue, date, accredited, price, photo";

#[instrument(skip_all, fields(worker_id = training.worker_id))]
pub async fn create_training(
    pool: &Pool<Sqlite>,
    training: &NewTraining,
) -> Result<TrainingRecord, AppError> {
    info!("Creating training record");
    let id = sqlx::query(
        "INSERT INTO training_records (worker_id, title, description, outcomes, venue, date, \
         accredited, price, photo) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(training.worker_id)
    .bind(&training.title)
    .bind(&training.description)
    .bind(&training.outcomes)
    .bind(&training.venue)
    .bind(training.date)
    .bind(training.accredited)
    .bind(training.price)
    .bind(&training.photo)
    .execute(pool)
    .await?
    .last_insert_rowid();

    get_training(pool, id).await
}

#[instrument(skip(pool))]
pub async fn get_training(pool: &Pool<Sqlite>, id: i64) -> Result<TrainingRecord, AppError> {
    let sql = format!("SELECT {} FROM training_records WHERE id = ?", TRAINING_COLUMNS);
    sqlx::query_as::<_, TrainingRecord>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Training record {} not found", id)))
}

#[instrument(skip(pool))]
pub async fn list_worker_trainings(
    pool: &Pool<Sqlite>,
    worker_id: i64,
) -> Result<Vec<TrainingRecord>, AppError> {
    let sql = format!(
        "SELECT {} FROM training_records WHERE worker_id = ? ORDER BY date DESC, id DESC",
        TRAINING_COLUMNS
    );
    Ok(sqlx::query_as::<_, TrainingRecord>(&sql)
        .bind(worker_id)
        .fetch_all(pool)
        .await?)
}

/// Hard delete; returns the removed row so its photo can be cleaned up.
#[instrument(skip(pool))]
pub async fn delete_training(pool: &Pool<Sqlite>, id: i64) -> Result<TrainingRecord, AppError> {
    info!("Deleting training record");
    let record = get_training(pool, id).await?;

    sqlx::query("DELETE FROM training_records WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(record)
}
