use chrono::NaiveDate;
use sqlx::{Pool, QueryBuilder, Sqlite};
use tracing::{info, instrument};

use super::{ListFilter, ListQuery, Page, PageRequest, fetch_page};
use crate::auth::SiteScope;
use crate::error::AppError;
use crate::models::{Category, DbStudent, Student};

#[derive(Debug, Clone)]
pub struct NewStudent {
    pub full_name: String,
    pub grade: String,
    pub category: Category,
    pub physical_education: bool,
    pub year: i64,
    pub school_id: i64,
    pub id_number: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct StudentUpdate {
    pub full_name: Option<String>,
    pub grade: Option<String>,
    pub category: Option<Category>,
    pub physical_education: Option<bool>,
    pub year: Option<i64>,
    pub school_id: Option<i64>,
    pub id_number: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct StudentListFilter {
    pub grade: Option<String>,
    pub category: Option<Category>,
    pub year: Option<i64>,
    pub physical_education: Option<bool>,
    pub search: Option<String>,
    pub deleted: bool,
}

/// Document columns a student upload may fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StudentDocument {
    Photo,
    ParentPermission,
}

impl StudentDocument {
    fn column(&self) -> &'static str {
        match self {
            StudentDocument::Photo => "photo",
            StudentDocument::ParentPermission => "parent_permission_pdf",
        }
    }
}

const STUDENT_COLUMNS: &str = "id, full_name, grade, category, physical_education, year, \
     school_id, id_number, date_of_birth, photo, parent_permission_pdf, created_at, deleted, \
     deleted_at";

const STUDENT_LIST: ListQuery = ListQuery {
    select: STUDENT_COLUMNS,
    from: "FROM students",
    order_by: "full_name, id",
};

const STUDENT_SEARCH: &[&str] = &["full_name", "id_number", "grade"];

async fn insert_student<'e, E>(executor: E, student: &NewStudent) -> Result<i64, AppError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    Ok(sqlx::query(
        "INSERT INTO students (full_name, grade, category, physical_education, year, school_id, \
         id_number, date_of_birth) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&student.full_name)
    .bind(&student.grade)
    .bind(student.category.as_str())
    .bind(student.physical_education)
    .bind(student.year)
    .bind(student.school_id)
    .bind(&student.id_number)
    .bind(student.date_of_birth)
    .execute(executor)
    .await?
    .last_insert_rowid())
}

#[instrument(skip_all, fields(school_id = student.school_id))]
pub async fn create_student(
    pool: &Pool<Sqlite>,
    student: &NewStudent,
) -> Result<Student, AppError> {
    info!("Creating student");
    let id = insert_student(pool, student).await?;
    get_student(pool, id).await
}

/// Inserts a batch atomically: one bad row rolls back the whole batch.
#[instrument(skip_all, fields(count = students.len()))]
pub async fn create_students(
    pool: &Pool<Sqlite>,
    students: &[NewStudent],
) -> Result<Vec<Student>, AppError> {
    info!("Creating students in bulk");
    let mut tx = pool.begin().await?;

    let mut ids = Vec::with_capacity(students.len());
    for student in students {
        ids.push(insert_student(&mut *tx, student).await?);
    }

    tx.commit().await?;

    let mut created = Vec::with_capacity(ids.len());
    for id in ids {
        created.push(get_student(pool, id).await?);
    }
    Ok(created)
}

/// Live (not soft deleted) student by id.
#[instrument(skip(pool))]
pub async fn get_student(pool: &Pool<Sqlite>, id: i64) -> Result<Student, AppError> {
    let sql = format!(
        "SELECT {} FROM students WHERE id = ? AND deleted = FALSE",
        STUDENT_COLUMNS
    );
    sqlx::query_as::<_, DbStudent>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .map(Student::from)
        .ok_or_else(|| AppError::NotFound(format!("Student {} not found", id)))
}

#[instrument(skip(pool))]
pub async fn list_students(
    pool: &Pool<Sqlite>,
    scope: &SiteScope,
    filter: &StudentListFilter,
    page: PageRequest,
) -> Result<Page<Student>, AppError> {
    info!("Listing students");
    let list_filter = ListFilter::new()
        .eq_bool("deleted", Some(filter.deleted))
        .sites("school_id", scope)
        .eq_text("grade", filter.grade.as_deref())
        .eq_text("category", filter.category.map(|c| c.as_str()))
        .eq_int("year", filter.year)
        .eq_bool("physical_education", filter.physical_education)
        .search(STUDENT_SEARCH, filter.search.as_deref());

    fetch_page::<DbStudent, Student>(pool, &STUDENT_LIST, &list_filter, page).await
}

/// Applies only the fields present in `update`. Sessions already recorded for
/// the student keep their own category/PE snapshot.
#[instrument(skip(pool, update))]
pub async fn update_student(
    pool: &Pool<Sqlite>,
    id: i64,
    update: &StudentUpdate,
) -> Result<Student, AppError> {
    info!("Updating student");
    get_student(pool, id).await?;

    let mut qb = QueryBuilder::<Sqlite>::new("UPDATE students SET id = id");
    if let Some(full_name) = &update.full_name {
        qb.push(", full_name = ").push_bind(full_name.clone());
    }
    if let Some(grade) = &update.grade {
        qb.push(", grade = ").push_bind(grade.clone());
    }
    if let Some(category) = update.category {
        qb.push(", category = ").push_bind(category.as_str());
    }
    if let Some(physical_education) = update.physical_education {
        qb.push(", physical_education = ").push_bind(physical_education);
    }
    if let Some(year) = update.year {
        qb.push(", year = ").push_bind(year);
    }
    if let Some(school_id) = update.school_id {
        qb.push(", school_id = ").push_bind(school_id);
    }
    if let Some(id_number) = &update.id_number {
        qb.push(", id_number = ").push_bind(id_number.clone());
    }
    if let Some(date_of_birth) = update.date_of_birth {
        qb.push(", date_of_birth = ").push_bind(date_of_birth);
    }
    qb.push(" WHERE id = ").push_bind(id).push(" AND deleted = FALSE");
    qb.build().execute(pool).await?;

    get_student(pool, id).await
}

/// Points a document column at a newly stored file and hands back the path it
/// replaced, if any.
#[instrument(skip(pool))]
pub async fn set_student_document(
    pool: &Pool<Sqlite>,
    id: i64,
    document: StudentDocument,
    path: &str,
) -> Result<Option<String>, AppError> {
    info!("Storing student document path");
    let column = document.column();

    let previous: Option<Option<String>> = sqlx::query_scalar(&format!(
        "SELECT {} FROM students WHERE id = ? AND deleted = FALSE",
        column
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    let Some(previous) = previous else {
        return Err(AppError::NotFound(format!("Student {} not found", id)));
    };

    sqlx::query(&format!("UPDATE students SET {} = ? WHERE id = ?", column))
        .bind(path)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(previous)
}

/// `(id, full_name)` pairs for pickers, limited to the caller's sites.
#[instrument(skip(pool))]
pub async fn student_options(
    pool: &Pool<Sqlite>,
    scope: &SiteScope,
) -> Result<Vec<(i64, String)>, AppError> {
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT id, full_name FROM students");
    ListFilter::new()
        .raw("deleted = FALSE")
        .sites("school_id", scope)
        .push_where(&mut qb);
    qb.push(" ORDER BY full_name");

    Ok(qb.build_query_as::<(i64, String)>().fetch_all(pool).await?)
}
