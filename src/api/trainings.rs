use rocket::form::{Errors, Form};
use rocket::fs::TempFile;
use rocket::serde::json::Json;
use rocket::{FromForm, Route, State};
use sqlx::{Pool, Sqlite};
use tracing::info;

use super::{ApiResult, Created, MessageResponse, created, non_blank};
use crate::auth::{Permission, User, ensure_not_locked, ensure_record_access};
use crate::config::AppConfig;
use crate::db::{
    NewTraining, create_training, delete_training, get_training, get_worker,
    list_worker_trainings,
};
use crate::error::AppError;
use crate::models::TrainingRecord;
use crate::uploads::{Accept, UploadArea, remove_upload, store_upload};
use crate::validation::{FormValidateExt, parse_date, parse_flag};

#[derive(FromForm)]
pub struct TrainingForm<'r> {
    title: String,
    description: Option<String>,
    outcomes: Option<String>,
    venue: Option<String>,
    date: String,
    accredited: Option<String>,
    price: Option<f64>,
    photo: Option<TempFile<'r>>,
}

#[post("/trainings/worker/<worker_id>", data = "<form>")]
pub async fn api_create_training(
    worker_id: i64,
    form: Result<Form<TrainingForm<'_>>, Errors<'_>>,
    user: User,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> Created<TrainingRecord> {
    user.require_permission(Permission::ManageTrainings)?;
    let mut form = form.validate_custom()?;

    let worker = get_worker(db, worker_id).await?;
    ensure_record_access(&user, worker.school_id)?;
    ensure_not_locked(db, &user, worker.school_id).await?;

    let title = form.title.trim().to_string();
    if title.is_empty() {
        return Err(AppError::Validation("title is required".to_string()));
    }
    let date = parse_date("date", &form.date)?;
    if form.price.is_some_and(|price| !price.is_finite() || price < 0.0) {
        return Err(AppError::Validation("price must not be negative".to_string()));
    }

    let photo = match form.photo.as_mut() {
        Some(file) => Some(
            store_upload(&config.upload_dir, UploadArea::Trainings, "photo", file, Accept::Image)
                .await?,
        ),
        None => None,
    };

    let training = create_training(
        db,
        &NewTraining {
            worker_id,
            title,
            description: non_blank(form.description.take()).unwrap_or_default(),
            outcomes: non_blank(form.outcomes.take()).unwrap_or_default(),
            venue: non_blank(form.venue.take()).unwrap_or_default(),
            date,
            accredited: form.accredited.as_deref().is_some_and(parse_flag),
            price: form.price,
            photo,
        },
    )
    .await?;

    info!(training_id = training.id, worker_id, "Training recorded");
    Ok(created(training))
}

#[get("/trainings/worker/<worker_id>")]
pub async fn api_list_trainings(
    worker_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Vec<TrainingRecord>> {
    user.require_permission(Permission::ViewTrainings)?;
    let worker = get_worker(db, worker_id).await?;
    ensure_record_access(&user, worker.school_id)?;

    Ok(Json(list_worker_trainings(db, worker_id).await?))
}

#[delete("/trainings/<id>")]
pub async fn api_delete_training(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> ApiResult<MessageResponse> {
    user.require_permission(Permission::ManageTrainings)?;

    let training = get_training(db, id).await?;
    let worker = get_worker(db, training.worker_id).await?;
    ensure_record_access(&user, worker.school_id)?;
    ensure_not_locked(db, &user, worker.school_id).await?;

    let removed = delete_training(db, id).await?;
    if let Some(photo) = removed.photo {
        remove_upload(&config.upload_dir, &photo).await;
    }

    Ok(MessageResponse::new(format!("Training record {} deleted", id)))
}

pub fn routes() -> Vec<Route> {
    routes![api_create_training, api_list_trainings, api_delete_training]
}
