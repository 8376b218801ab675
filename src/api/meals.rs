use chrono::NaiveDate;
use rocket::form::{Errors, Form};
use rocket::fs::TempFile;
use rocket::serde::json::{self, Json};
use rocket::{FromForm, Route, State};
use serde::Deserialize;
use sqlx::{Pool, Sqlite};
use tracing::info;
use validator::Validate;

use super::{ApiResult, Created, created, non_blank, request_scope};
use crate::auth::{Permission, User, ensure_not_locked, ensure_record_access};
use crate::config::AppConfig;
use crate::db::{
    DailyMealStats, DistributionListFilter, MealTypeCount, MonthlyMealCount, NewDistribution,
    NewMeal, Page, PageRequest, StudentMealStats, create_meal, daily_meal_stats, get_meal,
    get_student, list_distributions, list_meals, meal_type_breakdown, monthly_meal_stats,
    record_distribution, student_meal_stats,
};
use crate::error::AppError;
use crate::models::{Meal, MealDistribution};
use crate::rate_limit::Throttle;
use crate::uploads::{Accept, UploadArea, remove_upload, store_upload};
use crate::validation::{FormValidateExt, JsonValidateExt, parse_date, parse_flag, parse_optional_date};

#[derive(Deserialize, Validate)]
pub struct NewMealRequest {
    #[validate(length(min = 1, max = 120, message = "name is required"))]
    pub name: String,
    #[serde(rename = "type")]
    pub meal_type: Option<String>,
    pub ingredients: Option<String>,
}

#[derive(FromForm)]
pub struct DistributionForm<'r> {
    student_id: i64,
    meal_id: i64,
    date: String,
    quantity: Option<i64>,
    is_fruit: Option<String>,
    fruit_type: Option<String>,
    fruit_other_description: Option<String>,
    photo: Option<TempFile<'r>>,
}

#[derive(FromForm, Debug, Default)]
pub struct DistributionQuery {
    page: Option<i64>,
    per_page: Option<i64>,
    site_id: Option<String>,
    student_id: Option<i64>,
    meal_id: Option<i64>,
    date_from: Option<String>,
    date_to: Option<String>,
    search: Option<String>,
}

#[post("/meals", data = "<request>")]
pub async fn api_create_meal(
    request: Result<Json<NewMealRequest>, json::Error<'_>>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Created<Meal> {
    user.require_permission(Permission::ManageMeals)?;
    let request = request.validate_custom()?;

    let meal = create_meal(
        db,
        &NewMeal {
            name: request.name.trim().to_string(),
            meal_type: non_blank(request.meal_type),
            ingredients: non_blank(request.ingredients),
        },
    )
    .await?;

    Ok(created(meal))
}

#[get("/meals")]
pub async fn api_list_meals(user: User, db: &State<Pool<Sqlite>>) -> ApiResult<Vec<Meal>> {
    user.require_permission(Permission::ViewMeals)?;
    Ok(Json(list_meals(db).await?))
}

#[post("/meals/record", data = "<form>")]
pub async fn api_record_meal(
    _throttle: Throttle,
    form: Result<Form<DistributionForm<'_>>, Errors<'_>>,
    user: User,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> Created<MealDistribution> {
    user.require_permission(Permission::RecordMeals)?;
    let mut form = form.validate_custom()?;

    let student = get_student(db, form.student_id).await?;
    ensure_record_access(&user, student.school_id)?;
    ensure_not_locked(db, &user, student.school_id).await?;

    let meal = get_meal(db, form.meal_id).await?;
    let date = parse_date("date", &form.date)?;
    let quantity = form.quantity.unwrap_or(1);
    if quantity < 1 {
        return Err(AppError::Validation("quantity must be at least 1".to_string()));
    }

    let is_fruit = form.is_fruit.as_deref().is_some_and(parse_flag);
    let fruit_type = non_blank(form.fruit_type.take());
    let fruit_other_description = non_blank(form.fruit_other_description.take());
    if is_fruit && fruit_type.is_none() {
        return Err(AppError::Validation(
            "fruit_type is required when is_fruit is set".to_string(),
        ));
    }
    if fruit_type.as_deref() == Some("other") && fruit_other_description.is_none() {
        return Err(AppError::Validation(
            "fruit_other_description is required for other fruit".to_string(),
        ));
    }

    let photo = match form.photo.as_mut() {
        Some(file) => Some(
            store_upload(&config.upload_dir, UploadArea::MealPhotos, "photo", file, Accept::Image)
                .await?,
        ),
        None => None,
    };

    let distribution = NewDistribution {
        date,
        student_id: student.id,
        school_id: student.school_id,
        meal_id: meal.id,
        quantity,
        is_fruit,
        fruit_type,
        fruit_other_description,
        photo: photo.clone(),
        recorded_by: user.id,
    };

    match record_distribution(db, &distribution).await {
        Ok(record) => {
            info!(distribution_id = record.id, meal = %meal.name, "Meal distribution recorded");
            Ok(created(record))
        }
        Err(err) => {
            if let Some(photo) = photo {
                remove_upload(&config.upload_dir, &photo).await;
            }
            Err(err)
        }
    }
}

#[get("/meals/distributions?<params..>")]
pub async fn api_list_distributions(
    params: DistributionQuery,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Page<MealDistribution>> {
    user.require_permission(Permission::ViewMeals)?;
    let scope = request_scope(&user, params.site_id.as_deref())?;

    let filter = DistributionListFilter {
        student_id: params.student_id,
        meal_id: params.meal_id,
        date_from: parse_optional_date("date_from", params.date_from.as_deref())?,
        date_to: parse_optional_date("date_to", params.date_to.as_deref())?,
        search: params.search,
    };

    Ok(Json(
        list_distributions(db, &scope, &filter, PageRequest::new(params.page, params.per_page))
            .await?,
    ))
}

#[get("/meals/stats/daily?<site_id>&<date_from>&<date_to>")]
pub async fn api_daily_meal_stats(
    site_id: Option<String>,
    date_from: Option<String>,
    date_to: Option<String>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Vec<DailyMealStats>> {
    user.require_permission(Permission::ViewMeals)?;
    let scope = request_scope(&user, site_id.as_deref())?;
    let date_from = parse_optional_date("date_from", date_from.as_deref())?;
    let date_to = parse_optional_date("date_to", date_to.as_deref())?;

    Ok(Json(daily_meal_stats(db, &scope, date_from, date_to).await?))
}

#[get("/meals/stats/type-breakdown?<site_id>&<student_id>&<date_from>&<date_to>")]
pub async fn api_meal_type_breakdown(
    site_id: Option<String>,
    student_id: Option<i64>,
    date_from: Option<String>,
    date_to: Option<String>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Vec<MealTypeCount>> {
    user.require_permission(Permission::ViewMeals)?;
    let scope = request_scope(&user, site_id.as_deref())?;
    if let Some(student_id) = student_id {
        ensure_record_access(&user, get_student(db, student_id).await?.school_id)?;
    }
    let date_from = parse_optional_date("date_from", date_from.as_deref())?;
    let date_to = parse_optional_date("date_to", date_to.as_deref())?;

    Ok(Json(
        meal_type_breakdown(db, &scope, student_id, date_from, date_to).await?,
    ))
}

#[get("/meals/stats/monthly?<site_id>&<year>&<month>")]
pub async fn api_monthly_meal_stats(
    site_id: Option<String>,
    year: Option<i32>,
    month: Option<u32>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Vec<MonthlyMealCount>> {
    user.require_permission(Permission::ViewMeals)?;
    let scope = request_scope(&user, site_id.as_deref())?;
    let (year, month) = year
        .zip(month)
        .ok_or_else(|| AppError::Validation("Provide year and month".to_string()))?;
    let (start, end) = month_bounds(year, month)?;

    Ok(Json(monthly_meal_stats(db, &scope, start, end).await?))
}

#[get("/meals/stats/student/<student_id>")]
pub async fn api_student_meal_stats(
    student_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<StudentMealStats> {
    user.require_permission(Permission::ViewMeals)?;
    ensure_record_access(&user, get_student(db, student_id).await?.school_id)?;

    Ok(Json(student_meal_stats(db, student_id).await?))
}

/// First day of the month and first day of the following month.
fn month_bounds(year: i32, month: u32) -> Result<(NaiveDate, NaiveDate), AppError> {
    let invalid = || AppError::Validation(format!("Invalid month {}-{}", year, month));
    let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let end = NaiveDate::from_ymd_opt(next_year, next_month, 1).ok_or_else(invalid)?;
    Ok((start, end))
}

pub fn routes() -> Vec<Route> {
    routes![
        api_create_meal,
        api_list_meals,
        api_record_meal,
        api_list_distributions,
        api_daily_meal_stats,
        api_meal_type_breakdown,
        api_monthly_meal_stats,
        api_student_meal_stats,
    ]
}
