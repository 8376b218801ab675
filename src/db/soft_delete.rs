use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::auth::User;
use crate::error::AppError;
use crate::models::{Student, Worker};

/// A table whose rows are retired by flipping `deleted`/`deleted_at`
/// instead of being removed.
pub trait Deletable {
    const TABLE: &'static str;
    const LABEL: &'static str;
}

impl Deletable for Student {
    const TABLE: &'static str = "students";
    const LABEL: &'static str = "Student";
}

impl Deletable for Worker {
    const TABLE: &'static str = "workers";
    const LABEL: &'static str = "Worker";
}

impl Deletable for User {
    const TABLE: &'static str = "users";
    const LABEL: &'static str = "User";
}

#[instrument(skip(pool), fields(table = T::TABLE))]
pub async fn soft_delete<T: Deletable>(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Soft deleting row");

    let sql = format!(
        "UPDATE {} SET deleted = TRUE, deleted_at = CURRENT_TIMESTAMP \
         WHERE id = ? AND deleted = FALSE",
        T::TABLE
    );
    let result = sqlx::query(&sql).bind(id).execute(pool).await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("{} {} not found", T::LABEL, id)));
    }

    Ok(())
}

#[instrument(skip(pool), fields(table = T::TABLE))]
pub async fn restore<T: Deletable>(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Restoring soft deleted row");

    let sql = format!(
        "UPDATE {} SET deleted = FALSE, deleted_at = NULL WHERE id = ? AND deleted = TRUE",
        T::TABLE
    );
    let result = sqlx::query(&sql).bind(id).execute(pool).await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Deleted {} {} not found",
            T::LABEL.to_lowercase(),
            id
        )));
    }

    Ok(())
}

/// School of a row in the given deletion state; `Ok(None)` for rows with no
/// school (privileged users).
#[instrument(skip(pool), fields(table = T::TABLE))]
pub async fn owning_school<T: Deletable>(
    pool: &Pool<Sqlite>,
    id: i64,
    deleted: bool,
) -> Result<Option<i64>, AppError> {
    let sql = format!(
        "SELECT school_id FROM {} WHERE id = ? AND deleted = ?",
        T::TABLE
    );
    let row: Option<Option<i64>> = sqlx::query_scalar(&sql)
        .bind(id)
        .bind(deleted)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(school_id) => Ok(school_id),
        None => Err(AppError::NotFound(format!("{} {} not found", T::LABEL, id))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{NewStudent, create_student, get_student, list_students, StudentListFilter};
    use crate::db::PageRequest;
    use crate::auth::SiteScope;
    use crate::models::Category;
    use crate::test::test_utils::TestDbBuilder;

    #[rocket::async_test]
    async fn test_soft_delete_then_restore_round_trip() {
        let test_db = TestDbBuilder::new().school("Oak").build().await.unwrap();
        let pool = &test_db.pool;
        let school_id = test_db.school_id("Oak").unwrap();

        let student = create_student(
            pool,
            &NewStudent {
                full_name: "Ana".to_string(),
                grade: "3".to_string(),
                category: Category::Pr,
                physical_education: false,
                year: 2025,
                school_id,
                id_number: None,
                date_of_birth: None,
            },
        )
        .await
        .unwrap();

        soft_delete::<Student>(pool, student.id).await.unwrap();

        assert!(matches!(
            get_student(pool, student.id).await,
            Err(AppError::NotFound(_))
        ));
        let listed = list_students(
            pool,
            &SiteScope::All,
            &StudentListFilter::default(),
            PageRequest::default(),
        )
        .await
        .unwrap();
        assert_eq!(listed.total, 0);

        assert_eq!(
            owning_school::<Student>(pool, student.id, true).await.unwrap(),
            Some(school_id)
        );

        // A second delete finds no live row.
        assert!(matches!(
            soft_delete::<Student>(pool, student.id).await,
            Err(AppError::NotFound(_))
        ));

        restore::<Student>(pool, student.id).await.unwrap();

        let restored = get_student(pool, student.id).await.unwrap();
        assert!(!restored.deleted);
        assert!(restored.deleted_at.is_none());

        let listed = list_students(
            pool,
            &SiteScope::All,
            &StudentListFilter::default(),
            PageRequest::default(),
        )
        .await
        .unwrap();
        assert_eq!(listed.total, 1);
        assert_eq!(listed.items[0].id, student.id);

        assert!(matches!(
            restore::<Student>(pool, student.id).await,
            Err(AppError::NotFound(_))
        ));
    }
}
