#[cfg(test)]
mod tests {
    use crate::auth::Role;
    use crate::test::test_utils::TestDbBuilder;
    use sqlx::Row;

    const TABLES: [&str; 16] = [
        "schools",
        "roles",
        "workers",
        "users",
        "students",
        "assessments",
        "academic_sessions",
        "pe_sessions",
        "meals",
        "meal_distributions",
        "attendance_records",
        "audit_logs",
        "token_blocklist",
        "maintenance_locks",
        "user_removal_reviews",
        "training_records",
    ];

    #[rocket::async_test]
    async fn test_migrations_create_every_table() {
        let test_db = TestDbBuilder::new().build().await.unwrap();

        let rows = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table'")
            .fetch_all(&test_db.pool)
            .await
            .unwrap();
        let names: Vec<String> = rows.iter().map(|row| row.get("name")).collect();

        for table in TABLES {
            assert!(names.iter().any(|n| n == table), "missing table {}", table);
        }
    }

    #[rocket::async_test]
    async fn test_every_role_is_seeded() {
        let test_db = TestDbBuilder::new().build().await.unwrap();

        let seeded: Vec<String> = sqlx::query_scalar("SELECT name FROM roles")
            .fetch_all(&test_db.pool)
            .await
            .unwrap();

        for role in Role::ALL {
            assert!(seeded.iter().any(|name| name == role.as_str()), "missing role {}", role);
        }
        assert_eq!(seeded.len(), Role::ALL.len());
    }

    #[rocket::async_test]
    async fn test_uniqueness_constraints() {
        let test_db = TestDbBuilder::new()
            .school("Oak")
            .student("Ana", "Oak", false)
            .build()
            .await
            .unwrap();
        let pool = &test_db.pool;
        let ana = test_db.student_id("Ana").unwrap();

        sqlx::query("INSERT INTO assessments (student_id, term, score) VALUES (?, 'Term 1', 50)")
            .bind(ana)
            .execute(pool)
            .await
            .unwrap();
        let duplicate =
            sqlx::query("INSERT INTO assessments (student_id, term, score) VALUES (?, 'Term 1', 60)")
                .bind(ana)
                .execute(pool)
                .await;
        assert!(duplicate.is_err());

        let oak = test_db.school_id("Oak").unwrap();
        sqlx::query("INSERT INTO maintenance_locks (site_id, locked) VALUES (?, TRUE)")
            .bind(oak)
            .execute(pool)
            .await
            .unwrap();
        let second_lock =
            sqlx::query("INSERT INTO maintenance_locks (site_id, locked) VALUES (?, FALSE)")
                .bind(oak)
                .execute(pool)
                .await;
        assert!(second_lock.is_err());
    }
}
