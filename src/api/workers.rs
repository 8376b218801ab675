use std::io::{Cursor, Write};

use rocket::form::{Errors, Form};
use rocket::fs::TempFile;
use rocket::http::Header;
use rocket::serde::json::{self, Json};
use rocket::{FromForm, Responder, Route, State};
use serde::Deserialize;
use sqlx::{Pool, Sqlite};
use tracing::info;
use validator::Validate;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{ApiResult, Created, MessageResponse, created, non_blank, request_scope};
use crate::auth::{
    Permission, User, allowed_site_ids, ensure_not_locked, ensure_record_access, parse_site_ids,
};
use crate::config::AppConfig;
use crate::db::{
    NewWorker, Page, PageRequest, WorkerDocument, WorkerListFilter, WorkerStats, WorkerUpdate,
    create_worker, get_worker, list_workers, owning_school, restore, set_worker_document,
    soft_delete, update_worker, worker_stats,
};
use crate::error::AppError;
use crate::models::Worker;
use crate::uploads::{Accept, UploadArea, read_upload, remove_upload, store_upload};
use crate::validation::{FormValidateExt, JsonValidateExt, parse_optional_date};

#[derive(Deserialize, Validate)]
pub struct NewWorkerRequest {
    #[validate(length(min = 1, max = 100, message = "name is required"))]
    pub name: String,
    #[validate(length(min = 1, max = 100, message = "last_name is required"))]
    pub last_name: String,
    pub id_number: Option<String>,
    pub contact_number: Option<String>,
    #[validate(email(message = "email is not a valid address"))]
    pub email: Option<String>,
    pub start_date: Option<String>,
    pub story: Option<String>,
    pub role_id: i64,
    pub school_id: i64,
}

#[derive(Deserialize, Validate)]
pub struct WorkerUpdateRequest {
    #[validate(length(min = 1, max = 100, message = "name must not be empty"))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 100, message = "last_name must not be empty"))]
    pub last_name: Option<String>,
    pub id_number: Option<String>,
    pub contact_number: Option<String>,
    #[validate(email(message = "email is not a valid address"))]
    pub email: Option<String>,
    pub start_date: Option<String>,
    pub story: Option<String>,
    pub role_id: Option<i64>,
    pub school_id: Option<i64>,
}

#[derive(FromForm, Debug, Default)]
pub struct WorkerQuery {
    page: Option<i64>,
    per_page: Option<i64>,
    site_id: Option<String>,
    role_id: Option<i64>,
    search: Option<String>,
}

#[derive(FromForm)]
pub struct WorkerFilesForm<'r> {
    photo: Option<TempFile<'r>>,
    id_copy_pdf: Option<TempFile<'r>>,
    cv_pdf: Option<TempFile<'r>>,
    clearance_pdf: Option<TempFile<'r>>,
    child_protection_pdf: Option<TempFile<'r>>,
}

/// A ZIP archive served as an attachment.
#[derive(Responder)]
#[response(content_type = "application/zip")]
pub struct ZipDownload {
    body: Vec<u8>,
    disposition: Header<'static>,
}

async fn list_page(
    params: WorkerQuery,
    user: &User,
    db: &Pool<Sqlite>,
    deleted: bool,
) -> Result<Page<Worker>, AppError> {
    let scope = request_scope(user, params.site_id.as_deref())?;
    let filter = WorkerListFilter {
        role_id: params.role_id,
        search: params.search,
        deleted,
    };
    list_workers(db, &scope, &filter, PageRequest::new(params.page, params.per_page)).await
}

fn bundle_documents(files: Vec<(String, Vec<u8>)>) -> Result<Vec<u8>, AppError> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, bytes) in files {
        zip.start_file(name, opts)?;
        zip.write_all(&bytes)?;
    }

    Ok(zip.finish()?.into_inner())
}

#[get("/workers?<params..>")]
pub async fn api_list_workers(
    params: WorkerQuery,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Page<Worker>> {
    user.require_permission(Permission::ViewWorkers)?;
    Ok(Json(list_page(params, &user, db, false).await?))
}

#[get("/workers/deleted?<params..>")]
pub async fn api_list_deleted_workers(
    params: WorkerQuery,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Page<Worker>> {
    user.require_permission(Permission::RemoveWorkers)?;
    Ok(Json(list_page(params, &user, db, true).await?))
}

#[get("/workers/stats?<site_id>")]
pub async fn api_worker_stats(
    site_id: Option<String>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<WorkerStats> {
    user.require_permission(Permission::ViewWorkers)?;
    let sites = allowed_site_ids(db, &user, &parse_site_ids(site_id.as_deref())?).await?;

    Ok(Json(worker_stats(db, &sites).await?))
}

#[get("/workers/<id>")]
pub async fn api_get_worker(id: i64, user: User, db: &State<Pool<Sqlite>>) -> ApiResult<Worker> {
    user.require_permission(Permission::ViewWorkers)?;
    let worker = get_worker(db, id).await?;
    ensure_record_access(&user, worker.school_id)?;

    Ok(Json(worker))
}

#[post("/workers", data = "<request>")]
pub async fn api_create_worker(
    request: Result<Json<NewWorkerRequest>, json::Error<'_>>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Created<Worker> {
    user.require_permission(Permission::ManageWorkers)?;
    let request = request.validate_custom()?;
    ensure_record_access(&user, request.school_id)?;
    ensure_not_locked(db, &user, request.school_id).await?;

    let worker = create_worker(
        db,
        &NewWorker {
            name: request.name.trim().to_string(),
            last_name: request.last_name.trim().to_string(),
            id_number: non_blank(request.id_number),
            contact_number: non_blank(request.contact_number),
            email: non_blank(request.email),
            start_date: parse_optional_date("start_date", request.start_date.as_deref())?,
            story: non_blank(request.story),
            role_id: request.role_id,
            school_id: request.school_id,
        },
    )
    .await?;

    info!(worker_id = worker.id, "Worker created");
    Ok(created(worker))
}

#[put("/workers/<id>", data = "<request>")]
pub async fn api_update_worker(
    id: i64,
    request: Result<Json<WorkerUpdateRequest>, json::Error<'_>>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Worker> {
    user.require_permission(Permission::ManageWorkers)?;
    let request = request.validate_custom()?;

    let existing = get_worker(db, id).await?;
    ensure_record_access(&user, existing.school_id)?;
    ensure_not_locked(db, &user, existing.school_id).await?;

    if let Some(school_id) = request.school_id.filter(|s| *s != existing.school_id) {
        ensure_record_access(&user, school_id)?;
        ensure_not_locked(db, &user, school_id).await?;
    }

    let update = WorkerUpdate {
        name: non_blank(request.name),
        last_name: non_blank(request.last_name),
        id_number: request.id_number,
        contact_number: request.contact_number,
        email: request.email,
        start_date: parse_optional_date("start_date", request.start_date.as_deref())?,
        story: request.story,
        role_id: request.role_id,
        school_id: request.school_id,
    };

    Ok(Json(update_worker(db, id, &update).await?))
}

#[delete("/workers/<id>")]
pub async fn api_delete_worker(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<MessageResponse> {
    user.require_permission(Permission::RemoveWorkers)?;

    let worker = get_worker(db, id).await?;
    ensure_record_access(&user, worker.school_id)?;
    ensure_not_locked(db, &user, worker.school_id).await?;

    soft_delete::<Worker>(db, id).await?;
    Ok(MessageResponse::new(format!("Worker {} deleted", id)))
}

#[post("/workers/<id>/restore")]
pub async fn api_restore_worker(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<MessageResponse> {
    user.require_permission(Permission::RemoveWorkers)?;

    if let Some(school_id) = owning_school::<Worker>(db, id, true).await? {
        ensure_record_access(&user, school_id)?;
        ensure_not_locked(db, &user, school_id).await?;
    }
    restore::<Worker>(db, id).await?;

    Ok(MessageResponse::new(format!("Worker {} restored", id)))
}

#[post("/workers/<id>/files", data = "<form>")]
pub async fn api_upload_worker_files(
    id: i64,
    form: Result<Form<WorkerFilesForm<'_>>, Errors<'_>>,
    user: User,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> ApiResult<Worker> {
    user.require_permission(Permission::ManageWorkers)?;
    let mut form = form.validate_custom()?;

    let worker = get_worker(db, id).await?;
    ensure_record_access(&user, worker.school_id)?;
    ensure_not_locked(db, &user, worker.school_id).await?;

    let uploads = [
        (form.photo.as_mut(), "photo", WorkerDocument::Photo, Accept::Image),
        (
            form.id_copy_pdf.as_mut(),
            "id_copy_pdf",
            WorkerDocument::IdCopy,
            Accept::ImageOrPdf,
        ),
        (form.cv_pdf.as_mut(), "cv_pdf", WorkerDocument::Cv, Accept::Pdf),
        (
            form.clearance_pdf.as_mut(),
            "clearance_pdf",
            WorkerDocument::Clearance,
            Accept::Pdf,
        ),
        (
            form.child_protection_pdf.as_mut(),
            "child_protection_pdf",
            WorkerDocument::ChildProtection,
            Accept::Pdf,
        ),
    ];

    let mut stored_any = false;
    for (file, field, document, accept) in uploads {
        let Some(file) = file else {
            continue;
        };

        let path = store_upload(&config.upload_dir, UploadArea::Workers, field, file, accept).await?;
        if let Some(previous) = set_worker_document(db, id, document, &path).await? {
            remove_upload(&config.upload_dir, &previous).await;
        }
        stored_any = true;
    }

    if !stored_any {
        return Err(AppError::Validation("No documents supplied".to_string()));
    }

    Ok(Json(get_worker(db, id).await?))
}

#[get("/workers/<id>/download-docs")]
pub async fn api_download_worker_docs(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> Result<ZipDownload, AppError> {
    user.require_permission(Permission::ViewWorkers)?;
    let worker = get_worker(db, id).await?;
    ensure_record_access(&user, worker.school_id)?;

    let documents = worker.documents();
    if documents.is_empty() {
        return Err(AppError::NotFound(format!(
            "Worker {} has no stored documents",
            id
        )));
    }

    let mut files = Vec::with_capacity(documents.len());
    for (label, path) in documents {
        let extension = path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("bin");
        files.push((
            format!("{}.{}", label, extension),
            read_upload(&config.upload_dir, path).await?,
        ));
    }

    let body = bundle_documents(files)?;
    info!(worker_id = id, bytes = body.len(), "Worker documents bundled");

    Ok(ZipDownload {
        body,
        disposition: Header::new(
            "Content-Disposition",
            format!(
                "attachment; filename=\"worker_{}_{}_documents.zip\"",
                worker.id,
                worker.last_name.replace(|c: char| !c.is_ascii_alphanumeric(), "_")
            ),
        ),
    })
}

pub fn routes() -> Vec<Route> {
    routes![
        api_list_workers,
        api_list_deleted_workers,
        api_worker_stats,
        api_get_worker,
        api_create_worker,
        api_update_worker,
        api_delete_worker,
        api_restore_worker,
        api_upload_worker_files,
        api_download_worker_docs,
    ]
}
