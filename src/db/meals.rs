use chrono::NaiveDate;
use serde::Serialize;
use sqlx::{Pool, QueryBuilder, Sqlite};
use tracing::{info, instrument};

use super::{ListFilter, ListQuery, Page, PageRequest, fetch_page};
use crate::auth::SiteScope;
use crate::error::AppError;
use crate::models::{Meal, MealDistribution};

#[derive(Debug, Clone)]
pub struct NewMeal {
    pub name: String,
    pub meal_type: Option<String>,
    pub ingredients: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewDistribution {
    pub date: NaiveDate,
    pub student_id: i64,
    pub school_id: i64,
    pub meal_id: i64,
    pub quantity: i64,
    pub is_fruit: bool,
    pub fruit_type: Option<String>,
    pub fruit_other_description: Option<String>,
    pub photo: Option<String>,
    pub recorded_by: i64,
}

#[derive(Debug, Clone, Default)]
pub struct DistributionListFilter {
    pub student_id: Option<i64>,
    pub meal_id: Option<i64>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub search: Option<String>,
}

#[derive(Debug, Serialize, Clone, PartialEq, sqlx::FromRow)]
pub struct DailyMealStats {
    pub date: NaiveDate,
    pub school_id: i64,
    pub servings: i64,
    pub students: i64,
    pub fruit_servings: i64,
}

#[derive(Debug, Serialize, Clone, PartialEq, sqlx::FromRow)]
pub struct MealTypeCount {
    pub meal_type: String,
    pub distributions: i64,
    pub servings: i64,
}

#[derive(Debug, Serialize, Clone, PartialEq, sqlx::FromRow)]
pub struct MonthlyMealCount {
    pub date: NaiveDate,
    pub meal_type: String,
    pub distributions: i64,
    pub servings: i64,
}

#[derive(Debug, Serialize, Clone, PartialEq, sqlx::FromRow)]
pub struct StudentMealEntry {
    pub id: i64,
    pub date: NaiveDate,
    pub meal_name: String,
    pub meal_type: Option<String>,
    pub quantity: i64,
    pub is_fruit: bool,
    pub photo: Option<String>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct StudentMealStats {
    pub student_id: i64,
    pub total_meals: i64,
    pub total_servings: i64,
    pub meals: Vec<StudentMealEntry>,
}

const DISTRIBUTION_LIST: ListQuery = ListQuery {
    select: "d.id, d.date, d.student_id, s.full_name AS student_name, d.school_id, d.meal_id, \
             m.name AS meal_name, d.quantity, d.is_fruit, d.fruit_type, \
             d.fruit_other_description, d.photo, d.recorded_by",
    from: "FROM meal_distributions d \
           JOIN students s ON s.id = d.student_id \
           JOIN meals m ON m.id = d.meal_id",
    order_by: "d.date DESC, d.id DESC",
};

#[instrument(skip(pool))]
pub async fn create_meal(pool: &Pool<Sqlite>, meal: &NewMeal) -> Result<Meal, AppError> {
    info!("Creating meal");
    let id = sqlx::query("INSERT INTO meals (name, type, ingredients) VALUES (?, ?, ?)")
        .bind(&meal.name)
        .bind(&meal.meal_type)
        .bind(&meal.ingredients)
        .execute(pool)
        .await?
        .last_insert_rowid();

    get_meal(pool, id).await
}

#[instrument(skip(pool))]
pub async fn get_meal(pool: &Pool<Sqlite>, id: i64) -> Result<Meal, AppError> {
    sqlx::query_as::<_, Meal>(
        "SELECT id, name, type, ingredients, created_at FROM meals WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Meal {} not found", id)))
}

#[instrument(skip(pool))]
pub async fn list_meals(pool: &Pool<Sqlite>) -> Result<Vec<Meal>, AppError> {
    Ok(sqlx::query_as::<_, Meal>(
        "SELECT id, name, type, ingredients, created_at FROM meals ORDER BY name",
    )
    .fetch_all(pool)
    .await?)
}

#[instrument(skip_all, fields(student_id = distribution.student_id, meal_id = distribution.meal_id))]
pub async fn record_distribution(
    pool: &Pool<Sqlite>,
    distribution: &NewDistribution,
) -> Result<MealDistribution, AppError> {
    info!("Recording meal distribution");
    let id = sqlx::query(
        "INSERT INTO meal_distributions (date, student_id, school_id, meal_id, quantity, \
         is_fruit, fruit_type, fruit_other_description, photo, recorded_by) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(distribution.date)
    .bind(distribution.student_id)
    .bind(distribution.school_id)
    .bind(distribution.meal_id)
    .bind(distribution.quantity)
    .bind(distribution.is_fruit)
    .bind(&distribution.fruit_type)
    .bind(&distribution.fruit_other_description)
    .bind(&distribution.photo)
    .bind(distribution.recorded_by)
    .execute(pool)
    .await?
    .last_insert_rowid();

    let sql = format!(
        "SELECT {} {} WHERE d.id = ?",
        DISTRIBUTION_LIST.select, DISTRIBUTION_LIST.from
    );
    Ok(sqlx::query_as::<_, MealDistribution>(&sql)
        .bind(id)
        .fetch_one(pool)
        .await?)
}

#[instrument(skip(pool))]
pub async fn list_distributions(
    pool: &Pool<Sqlite>,
    scope: &SiteScope,
    filter: &DistributionListFilter,
    page: PageRequest,
) -> Result<Page<MealDistribution>, AppError> {
    info!("Listing meal distributions");
    let list_filter = ListFilter::new()
        .sites("d.school_id", scope)
        .eq_int("d.student_id", filter.student_id)
        .eq_int("d.meal_id", filter.meal_id)
        .date_from("d.date", filter.date_from)
        .date_to("d.date", filter.date_to)
        .search(&["s.full_name", "m.name"], filter.search.as_deref());

    fetch_page::<MealDistribution, MealDistribution>(pool, &DISTRIBUTION_LIST, &list_filter, page)
        .await
}

/// Servings per school per day over the requested window.
#[instrument(skip(pool))]
pub async fn daily_meal_stats(
    pool: &Pool<Sqlite>,
    scope: &SiteScope,
    date_from: Option<NaiveDate>,
    date_to: Option<NaiveDate>,
) -> Result<Vec<DailyMealStats>, AppError> {
    info!("Building daily meal stats");
    let mut qb = QueryBuilder::<Sqlite>::new(
        "SELECT date, school_id, COALESCE(SUM(quantity), 0) AS servings, \
         COUNT(DISTINCT student_id) AS students, \
         COALESCE(SUM(CASE WHEN is_fruit THEN quantity ELSE 0 END), 0) AS fruit_servings \
         FROM meal_distributions",
    );
    ListFilter::new()
        .sites("school_id", scope)
        .date_from("date", date_from)
        .date_to("date", date_to)
        .push_where(&mut qb);
    qb.push(" GROUP BY date, school_id ORDER BY date DESC, school_id");

    Ok(qb.build_query_as::<DailyMealStats>().fetch_all(pool).await?)
}

/// Distribution counts per meal type; untyped meals fall under "unspecified".
#[instrument(skip(pool))]
pub async fn meal_type_breakdown(
    pool: &Pool<Sqlite>,
    scope: &SiteScope,
    student_id: Option<i64>,
    date_from: Option<NaiveDate>,
    date_to: Option<NaiveDate>,
) -> Result<Vec<MealTypeCount>, AppError> {
    info!("Building meal type breakdown");
    let mut qb = QueryBuilder::<Sqlite>::new(
        "SELECT COALESCE(m.type, 'unspecified') AS meal_type, COUNT(d.id) AS distributions, \
         COALESCE(SUM(d.quantity), 0) AS servings \
         FROM meal_distributions d JOIN meals m ON m.id = d.meal_id",
    );
    ListFilter::new()
        .sites("d.school_id", scope)
        .eq_int("d.student_id", student_id)
        .date_from("d.date", date_from)
        .date_to("d.date", date_to)
        .push_where(&mut qb);
    qb.push(" GROUP BY COALESCE(m.type, 'unspecified') ORDER BY meal_type");

    Ok(qb.build_query_as::<MealTypeCount>().fetch_all(pool).await?)
}

/// Per-day, per-type counts for `[start, end)`.
#[instrument(skip(pool))]
pub async fn monthly_meal_stats(
    pool: &Pool<Sqlite>,
    scope: &SiteScope,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<MonthlyMealCount>, AppError> {
    info!("Building monthly meal stats");
    let mut qb = QueryBuilder::<Sqlite>::new(
        "SELECT d.date, COALESCE(m.type, 'unspecified') AS meal_type, \
         COUNT(d.id) AS distributions, COALESCE(SUM(d.quantity), 0) AS servings \
         FROM meal_distributions d JOIN meals m ON m.id = d.meal_id",
    );
    ListFilter::new()
        .sites("d.school_id", scope)
        .date_from("d.date", Some(start))
        .push_where(&mut qb);
    qb.push(" AND d.date < ").push_bind(end);
    qb.push(" GROUP BY d.date, COALESCE(m.type, 'unspecified') ORDER BY d.date, meal_type");

    Ok(qb.build_query_as::<MonthlyMealCount>().fetch_all(pool).await?)
}

#[instrument(skip(pool))]
pub async fn student_meal_stats(
    pool: &Pool<Sqlite>,
    student_id: i64,
) -> Result<StudentMealStats, AppError> {
    info!("Building student meal history");
    let meals = sqlx::query_as::<_, StudentMealEntry>(
        "SELECT d.id, d.date, m.name AS meal_name, m.type AS meal_type, d.quantity, \
         d.is_fruit, d.photo \
         FROM meal_distributions d JOIN meals m ON m.id = d.meal_id \
         WHERE d.student_id = ? ORDER BY d.date DESC, d.id DESC",
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    Ok(StudentMealStats {
        student_id,
        total_meals: meals.len() as i64,
        total_servings: meals.iter().map(|m| m.quantity).sum(),
        meals,
    })
}
