use chrono::NaiveDate;
use serde::Serialize;
use sqlx::{Pool, QueryBuilder, Sqlite};
use std::collections::BTreeMap;
use tracing::{info, instrument};

use super::{ListFilter, ListQuery, Page, PageRequest, fetch_page};
use crate::auth::SiteScope;
use crate::error::AppError;
use crate::models::{DbWorker, Worker};

#[derive(Debug, Clone)]
pub struct NewWorker {
    pub name: String,
    pub last_name: String,
    pub id_number: Option<String>,
    pub contact_number: Option<String>,
    pub email: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub story: Option<String>,
    pub role_id: i64,
    pub school_id: i64,
}

#[derive(Debug, Clone, Default)]
pub struct WorkerUpdate {
    pub name: Option<String>,
    pub last_name: Option<String>,
    pub id_number: Option<String>,
    pub contact_number: Option<String>,
    pub email: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub story: Option<String>,
    pub role_id: Option<i64>,
    pub school_id: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct WorkerListFilter {
    pub role_id: Option<i64>,
    pub search: Option<String>,
    pub deleted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerDocument {
    Photo,
    IdCopy,
    Cv,
    Clearance,
    ChildProtection,
}

impl WorkerDocument {
    fn column(&self) -> &'static str {
        match self {
            WorkerDocument::Photo => "photo",
            WorkerDocument::IdCopy => "id_copy_pdf",
            WorkerDocument::Cv => "cv_pdf",
            WorkerDocument::Clearance => "clearance_pdf",
            WorkerDocument::ChildProtection => "child_protection_pdf",
        }
    }
}

#[derive(Debug, Serialize, Default)]
pub struct WorkerStats {
    pub total: i64,
    pub by_role: BTreeMap<String, i64>,
    pub by_school: BTreeMap<i64, i64>,
    pub with_clearance: i64,
    pub with_child_protection: i64,
    pub trainings: i64,
}

const WORKER_COLUMNS: &str = "w.id, w.name, w.last_name, w.id_number, w.contact_number, \
     w.email, w.start_date, w.story, w.role_id, r.name AS role, w.school_id, w.photo, \
     w.id_copy_pdf, w.cv_pdf, w.clearance_pdf, w.child_protection_pdf, w.deleted, w.deleted_at";

const WORKER_LIST: ListQuery = ListQuery {
    select: WORKER_COLUMNS,
    from: "FROM workers w JOIN roles r ON r.id = w.role_id",
    order_by: "w.last_name, w.name, w.id",
};

const WORKER_SEARCH: &[&str] = &["w.name", "w.last_name", "w.id_number", "w.email"];

#[instrument(skip_all, fields(school_id = worker.school_id))]
pub async fn create_worker(pool: &Pool<Sqlite>, worker: &NewWorker) -> Result<Worker, AppError> {
    info!("Creating worker");
    let id = sqlx::query(
        "INSERT INTO workers (name, last_name, id_number, contact_number, email, start_date, \
         story, role_id, school_id) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&worker.name)
    .bind(&worker.last_name)
    .bind(&worker.id_number)
    .bind(&worker.contact_number)
    .bind(&worker.email)
    .bind(worker.start_date)
    .bind(&worker.story)
    .bind(worker.role_id)
    .bind(worker.school_id)
    .execute(pool)
    .await?
    .last_insert_rowid();

    get_worker(pool, id).await
}

/// Live (not soft deleted) worker by id.
#[instrument(skip(pool))]
pub async fn get_worker(pool: &Pool<Sqlite>, id: i64) -> Result<Worker, AppError> {
    let sql = format!(
        "SELECT {} {} WHERE w.id = ? AND w.deleted = FALSE",
        WORKER_COLUMNS, WORKER_LIST.from
    );
    sqlx::query_as::<_, DbWorker>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .map(Worker::from)
        .ok_or_else(|| AppError::NotFound(format!("Worker {} not found", id)))
}

#[instrument(skip(pool))]
pub async fn list_workers(
    pool: &Pool<Sqlite>,
    scope: &SiteScope,
    filter: &WorkerListFilter,
    page: PageRequest,
) -> Result<Page<Worker>, AppError> {
    info!("Listing workers");
    let list_filter = ListFilter::new()
        .eq_bool("w.deleted", Some(filter.deleted))
        .sites("w.school_id", scope)
        .eq_int("w.role_id", filter.role_id)
        .search(WORKER_SEARCH, filter.search.as_deref());

    fetch_page::<DbWorker, Worker>(pool, &WORKER_LIST, &list_filter, page).await
}

#[instrument(skip(pool, update))]
pub async fn update_worker(
    pool: &Pool<Sqlite>,
    id: i64,
    update: &WorkerUpdate,
) -> Result<Worker, AppError> {
    info!("Updating worker");
    get_worker(pool, id).await?;

    let mut qb = QueryBuilder::<Sqlite>::new("UPDATE workers SET id = id");
    let text_fields = [
        ("name", &update.name),
        ("last_name", &update.last_name),
        ("id_number", &update.id_number),
        ("contact_number", &update.contact_number),
        ("email", &update.email),
        ("story", &update.story),
    ];
    for (column, value) in text_fields {
        if let Some(value) = value {
            qb.push(", ").push(column).push(" = ").push_bind(value.clone());
        }
    }
    if let Some(start_date) = update.start_date {
        qb.push(", start_date = ").push_bind(start_date);
    }
    if let Some(role_id) = update.role_id {
        qb.push(", role_id = ").push_bind(role_id);
    }
    if let Some(school_id) = update.school_id {
        qb.push(", school_id = ").push_bind(school_id);
    }
    qb.push(" WHERE id = ").push_bind(id).push(" AND deleted = FALSE");
    qb.build().execute(pool).await?;

    get_worker(pool, id).await
}

#[instrument(skip(pool))]
pub async fn set_worker_document(
    pool: &Pool<Sqlite>,
    id: i64,
    document: WorkerDocument,
    path: &str,
) -> Result<Option<String>, AppError> {
    info!("Storing worker document path");
    let column = document.column();

    let previous: Option<Option<String>> = sqlx::query_scalar(&format!(
        "SELECT {} FROM workers WHERE id = ? AND deleted = FALSE",
        column
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    let Some(previous) = previous else {
        return Err(AppError::NotFound(format!("Worker {} not found", id)));
    };

    sqlx::query(&format!("UPDATE workers SET {} = ? WHERE id = ?", column))
        .bind(path)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(previous)
}

#[instrument(skip(pool))]
pub async fn worker_stats(pool: &Pool<Sqlite>, sites: &[i64]) -> Result<WorkerStats, AppError> {
    info!("Building worker stats");

    let live = || {
        ListFilter::new()
            .raw("w.deleted = FALSE")
            .in_ids("w.school_id", sites)
    };

    let by_role = {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT r.name, COUNT(*) FROM workers w JOIN roles r ON r.id = w.role_id",
        );
        live().push_where(&mut qb);
        qb.push(" GROUP BY r.name");
        qb.build_query_as::<(String, i64)>().fetch_all(pool).await?
    };

    let by_school = {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT w.school_id, COUNT(*) FROM workers w");
        live().push_where(&mut qb);
        qb.push(" GROUP BY w.school_id");
        qb.build_query_as::<(i64, i64)>().fetch_all(pool).await?
    };

    let (with_clearance, with_child_protection) = {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT COALESCE(SUM(w.clearance_pdf IS NOT NULL), 0), \
             COALESCE(SUM(w.child_protection_pdf IS NOT NULL), 0) FROM workers w",
        );
        live().push_where(&mut qb);
        qb.build_query_as::<(i64, i64)>().fetch_one(pool).await?
    };

    let trainings = {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT COUNT(*) FROM training_records t JOIN workers w ON w.id = t.worker_id",
        );
        live().push_where(&mut qb);
        qb.build_query_scalar::<i64>().fetch_one(pool).await?
    };

    let by_school: BTreeMap<i64, i64> = by_school.into_iter().collect();

    Ok(WorkerStats {
        total: by_school.values().sum(),
        by_role: by_role.into_iter().collect(),
        by_school,
        with_clearance,
        with_child_protection,
        trainings,
    })
}
