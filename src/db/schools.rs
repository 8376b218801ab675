use serde::Serialize;
use sqlx::{Pool, QueryBuilder, Sqlite};
use std::collections::BTreeMap;
use tracing::{info, instrument};

use super::ListFilter;
use crate::auth::SiteScope;
use crate::error::AppError;
use crate::models::School;

#[derive(Debug, Clone)]
pub struct NewSchool {
    pub name: String,
    pub address: String,
    pub contact_number: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SchoolUpdate {
    pub name: Option<String>,
    pub address: Option<String>,
    pub contact_number: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct SchoolCounts {
    pub school_id: i64,
    pub name: String,
    pub students: i64,
    pub pe_students: i64,
    pub workers: i64,
    pub users: i64,
}

#[derive(Debug, Serialize)]
pub struct SchoolSummary {
    #[serde(flatten)]
    pub counts: SchoolCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub students_by_grade: Option<BTreeMap<String, i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub students_by_category: Option<BTreeMap<String, i64>>,
}

#[derive(Debug, Serialize, Default)]
pub struct DashboardSummary {
    pub sites: Vec<i64>,
    pub students: i64,
    pub workers: i64,
    pub users: i64,
    pub academic_sessions: i64,
    pub pe_sessions: i64,
    pub meals_served_today: i64,
    pub present_today: i64,
    pub absent_today: i64,
    pub late_today: i64,
    pub locked_sites: Vec<i64>,
}

const SCHOOL_COLUMNS: &str = "id, name, address, contact_number, email, created_at";

#[instrument(skip(pool))]
pub async fn all_school_ids(pool: &Pool<Sqlite>) -> Result<Vec<i64>, AppError> {
    info!("Fetching all school ids");
    let ids = sqlx::query_scalar::<_, i64>("SELECT id FROM schools ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

#[instrument(skip(pool))]
pub async fn create_school(pool: &Pool<Sqlite>, school: &NewSchool) -> Result<School, AppError> {
    info!("Creating school");
    let id = sqlx::query(
        "INSERT INTO schools (name, address, contact_number, email) VALUES (?, ?, ?, ?)",
    )
    .bind(&school.name)
    .bind(&school.address)
    .bind(&school.contact_number)
    .bind(&school.email)
    .execute(pool)
    .await?
    .last_insert_rowid();

    get_school(pool, id).await
}

#[instrument(skip(pool))]
pub async fn get_school(pool: &Pool<Sqlite>, id: i64) -> Result<School, AppError> {
    let sql = format!("SELECT {} FROM schools WHERE id = ?", SCHOOL_COLUMNS);
    sqlx::query_as::<_, School>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("School {} not found", id)))
}

#[instrument(skip(pool))]
pub async fn list_schools(pool: &Pool<Sqlite>, scope: &SiteScope) -> Result<Vec<School>, AppError> {
    info!("Listing schools");
    let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM schools", SCHOOL_COLUMNS));
    if let Some(ids) = scope.restriction() {
        ListFilter::new().in_ids("id", ids).push_where(&mut qb);
    }
    qb.push(" ORDER BY name");

    Ok(qb.build_query_as::<School>().fetch_all(pool).await?)
}

#[instrument(skip(pool))]
pub async fn update_school(
    pool: &Pool<Sqlite>,
    id: i64,
    update: &SchoolUpdate,
) -> Result<School, AppError> {
    info!("Updating school");
    get_school(pool, id).await?;

    let mut qb = QueryBuilder::<Sqlite>::new("UPDATE schools SET id = id");
    if let Some(name) = &update.name {
        qb.push(", name = ").push_bind(name.clone());
    }
    if let Some(address) = &update.address {
        qb.push(", address = ").push_bind(address.clone());
    }
    if let Some(contact_number) = &update.contact_number {
        qb.push(", contact_number = ").push_bind(contact_number.clone());
    }
    if let Some(email) = &update.email {
        qb.push(", email = ").push_bind(email.clone());
    }
    qb.push(" WHERE id = ").push_bind(id);
    qb.build().execute(pool).await?;

    get_school(pool, id).await
}

#[instrument(skip(pool))]
pub async fn school_summaries(
    pool: &Pool<Sqlite>,
    school_ids: &[i64],
    include_details: bool,
) -> Result<Vec<SchoolSummary>, AppError> {
    info!("Building school summaries");

    let mut qb = QueryBuilder::<Sqlite>::new(
        "SELECT sc.id AS school_id, sc.name AS name, \
         (SELECT COUNT(*) FROM students s WHERE s.school_id = sc.id AND s.deleted = FALSE) AS students, \
         (SELECT COUNT(*) FROM students s WHERE s.school_id = sc.id AND s.deleted = FALSE \
            AND s.physical_education = TRUE) AS pe_students, \
         (SELECT COUNT(*) FROM workers w WHERE w.school_id = sc.id AND w.deleted = FALSE) AS workers, \
         (SELECT COUNT(*) FROM users u WHERE u.school_id = sc.id AND u.deleted = FALSE) AS users \
         FROM schools sc",
    );
    ListFilter::new()
        .in_ids("sc.id", school_ids)
        .push_where(&mut qb);
    qb.push(" ORDER BY sc.name");

    let counts = qb.build_query_as::<SchoolCounts>().fetch_all(pool).await?;

    let mut summaries = Vec::with_capacity(counts.len());
    for counts in counts {
        let (students_by_grade, students_by_category) = if include_details {
            (
                Some(grouped_student_counts(pool, counts.school_id, "grade").await?),
                Some(grouped_student_counts(pool, counts.school_id, "category").await?),
            )
        } else {
            (None, None)
        };

        summaries.push(SchoolSummary {
            counts,
            students_by_grade,
            students_by_category,
        });
    }

    Ok(summaries)
}

async fn grouped_student_counts(
    pool: &Pool<Sqlite>,
    school_id: i64,
    column: &'static str,
) -> Result<BTreeMap<String, i64>, AppError> {
    let sql = format!(
        "SELECT {column}, COUNT(*) FROM students \
         WHERE school_id = ? AND deleted = FALSE GROUP BY {column}"
    );
    let rows = sqlx::query_as::<_, (String, i64)>(&sql)
        .bind(school_id)
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().collect())
}

async fn count_rows(
    pool: &Pool<Sqlite>,
    from: &'static str,
    filter: ListFilter,
) -> Result<i64, AppError> {
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) ");
    qb.push(from);
    filter.push_where(&mut qb);
    Ok(qb.build_query_scalar().fetch_one(pool).await?)
}

#[instrument(skip(pool))]
pub async fn dashboard_summary(
    pool: &Pool<Sqlite>,
    sites: &[i64],
) -> Result<DashboardSummary, AppError> {
    info!("Building dashboard summary");

    let today = chrono::Utc::now().date_naive();

    let attendance = {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT status, COUNT(*) FROM attendance_records",
        );
        ListFilter::new()
            .in_ids("school_id", sites)
            .date_from("date", Some(today))
            .date_to("date", Some(today))
            .push_where(&mut qb);
        qb.push(" GROUP BY status");
        qb.build_query_as::<(String, i64)>().fetch_all(pool).await?
    };
    let attendance: BTreeMap<String, i64> = attendance.into_iter().collect();

    let meals_served_today = {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT COALESCE(SUM(quantity), 0) FROM meal_distributions",
        );
        ListFilter::new()
            .in_ids("school_id", sites)
            .date_from("date", Some(today))
            .date_to("date", Some(today))
            .push_where(&mut qb);
        qb.build_query_scalar::<i64>().fetch_one(pool).await?
    };

    let locked_sites = {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT site_id FROM maintenance_locks");
        ListFilter::new()
            .raw("locked = TRUE")
            .in_ids("site_id", sites)
            .push_where(&mut qb);
        qb.push(" ORDER BY site_id");
        qb.build_query_scalar::<i64>().fetch_all(pool).await?
    };

    Ok(DashboardSummary {
        sites: sites.to_vec(),
        students: count_rows(
            pool,
            "FROM students",
            ListFilter::new()
                .raw("deleted = FALSE")
                .in_ids("school_id", sites),
        )
        .await?,
        workers: count_rows(
            pool,
            "FROM workers",
            ListFilter::new()
                .raw("deleted = FALSE")
                .in_ids("school_id", sites),
        )
        .await?,
        users: count_rows(
            pool,
            "FROM users",
            ListFilter::new()
                .raw("deleted = FALSE")
                .in_ids("school_id", sites),
        )
        .await?,
        academic_sessions: count_rows(
            pool,
            "FROM academic_sessions x JOIN students s ON s.id = x.student_id",
            ListFilter::new().in_ids("s.school_id", sites),
        )
        .await?,
        pe_sessions: count_rows(
            pool,
            "FROM pe_sessions x JOIN students s ON s.id = x.student_id",
            ListFilter::new().in_ids("s.school_id", sites),
        )
        .await?,
        meals_served_today,
        present_today: attendance.get("present").copied().unwrap_or_default(),
        absent_today: attendance.get("absent").copied().unwrap_or_default(),
        late_today: attendance.get("late").copied().unwrap_or_default(),
        locked_sites,
    })
}
