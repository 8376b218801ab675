#[cfg(test)]
pub mod test_utils {
    use crate::auth::{ACCESS_COOKIE, Role};
    use crate::config::AppConfig;
    use crate::db::{
        NewMeal, NewSchool, NewStudent, NewUser, NewWorker, create_meal, create_school,
        create_student, create_user, create_worker, role_id,
    };
    use crate::error::AppError;
    use crate::init_rocket;
    use crate::models::Category;
    use rocket::http::{ContentType, Header, Status};
    use rocket::local::asynchronous::Client;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::{Pool, Sqlite};
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Once;
    use tracing::log::LevelFilter;

    static INIT: Once = Once::new();
    pub const STANDARD_PASSWORD: &str = "password123";

    pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
    pub const PDF_BYTES: &[u8] = b"%PDF-1.4\n%test\n";

    const BOUNDARY: &str = "X-SCHOOL-ADMIN-TEST-BOUNDARY";

    #[derive(Default)]
    pub struct TestDbBuilder {
        schools: Vec<String>,
        users: Vec<TestUser>,
        students: Vec<TestStudent>,
        workers: Vec<TestWorker>,
        meals: Vec<String>,
    }

    pub struct TestUser {
        pub username: String,
        pub role: Role,
        pub school: Option<String>,
    }

    pub struct TestStudent {
        pub full_name: String,
        pub school: String,
        pub physical_education: bool,
    }

    pub struct TestWorker {
        pub name: String,
        pub school: String,
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn school(mut self, name: &str) -> Self {
            self.schools.push(name.to_string());
            self
        }

        pub fn user(mut self, username: &str, role: Role, school: Option<&str>) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                role,
                school: school.map(String::from),
            });
            self
        }

        pub fn admin(self, username: &str) -> Self {
            self.user(username, Role::Admin, None)
        }

        pub fn student(mut self, full_name: &str, school: &str, physical_education: bool) -> Self {
            self.students.push(TestStudent {
                full_name: full_name.to_string(),
                school: school.to_string(),
                physical_education,
            });
            self
        }

        pub fn worker(mut self, name: &str, school: &str) -> Self {
            self.workers.push(TestWorker {
                name: name.to_string(),
                school: school.to_string(),
            });
            self
        }

        pub fn meal(mut self, name: &str) -> Self {
            self.meals.push(name.to_string());
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            INIT.call_once(|| {
                let _ = env_logger::builder()
                    .filter_level(LevelFilter::Debug)
                    .is_test(true)
                    .try_init();
            });

            // One connection, never recycled: each new in-memory connection
            // would be a fresh empty database.
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect("sqlite::memory:")
                .await?;

            sqlx::migrate!("./migrations").run(&pool).await?;

            let upload_dir =
                std::env::temp_dir().join(format!("school-admin-test-{}", uuid::Uuid::new_v4()));
            std::fs::create_dir_all(&upload_dir)
                .map_err(|e| AppError::Internal(format!("Failed to create upload dir: {}", e)))?;

            let mut school_id_map: HashMap<String, i64> = HashMap::new();
            let mut user_id_map: HashMap<String, i64> = HashMap::new();
            let mut student_id_map: HashMap<String, i64> = HashMap::new();
            let mut worker_id_map: HashMap<String, i64> = HashMap::new();
            let mut meal_id_map: HashMap<String, i64> = HashMap::new();

            for name in &self.schools {
                let school = create_school(
                    &pool,
                    &NewSchool {
                        name: name.clone(),
                        address: format!("1 {} Road", name),
                        contact_number: None,
                        email: None,
                    },
                )
                .await?;
                school_id_map.insert(name.clone(), school.id);
            }

            let lookup_school = |name: &str| {
                school_id_map
                    .get(name)
                    .copied()
                    .ok_or_else(|| AppError::NotFound(format!("Test school {} not declared", name)))
            };

            for user in &self.users {
                let school_id = match &user.school {
                    Some(name) => Some(lookup_school(name)?),
                    None => None,
                };
                let created = create_user(
                    &pool,
                    &NewUser {
                        username: user.username.clone(),
                        password: STANDARD_PASSWORD.to_string(),
                        email: Some(format!("{}@example.org", user.username)),
                        role: user.role,
                        school_id,
                        worker_id: None,
                        expires_at: None,
                    },
                )
                .await?;
                user_id_map.insert(user.username.clone(), created.id);
            }

            for student in &self.students {
                let created = create_student(
                    &pool,
                    &NewStudent {
                        full_name: student.full_name.clone(),
                        grade: "4".to_string(),
                        category: if student.physical_education {
                            Category::Pe
                        } else {
                            Category::Pr
                        },
                        physical_education: student.physical_education,
                        year: 2025,
                        school_id: lookup_school(&student.school)?,
                        id_number: None,
                        date_of_birth: None,
                    },
                )
                .await?;
                student_id_map.insert(student.full_name.clone(), created.id);
            }

            if !self.workers.is_empty() {
                let worker_role = role_id(&pool, Role::General).await?;
                for worker in &self.workers {
                    let created = create_worker(
                        &pool,
                        &NewWorker {
                            name: worker.name.clone(),
                            last_name: "Dlamini".to_string(),
                            id_number: None,
                            contact_number: None,
                            email: Some(format!("{}@example.org", worker.name.to_lowercase())),
                            start_date: None,
                            story: None,
                            role_id: worker_role,
                            school_id: lookup_school(&worker.school)?,
                        },
                    )
                    .await?;
                    worker_id_map.insert(worker.name.clone(), created.id);
                }
            }

            for name in &self.meals {
                let meal = create_meal(
                    &pool,
                    &NewMeal {
                        name: name.clone(),
                        meal_type: Some("breakfast".to_string()),
                        ingredients: None,
                    },
                )
                .await?;
                meal_id_map.insert(name.clone(), meal.id);
            }

            Ok(TestDb {
                pool,
                upload_dir,
                school_id_map,
                user_id_map,
                student_id_map,
                worker_id_map,
                meal_id_map,
            })
        }
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        pub upload_dir: PathBuf,
        pub school_id_map: HashMap<String, i64>,
        pub user_id_map: HashMap<String, i64>,
        pub student_id_map: HashMap<String, i64>,
        pub worker_id_map: HashMap<String, i64>,
        pub meal_id_map: HashMap<String, i64>,
    }

    impl TestDb {
        pub fn school_id(&self, name: &str) -> Option<i64> {
            self.school_id_map.get(name).copied()
        }

        pub fn user_id(&self, username: &str) -> Option<i64> {
            self.user_id_map.get(username).copied()
        }

        pub fn student_id(&self, full_name: &str) -> Option<i64> {
            self.student_id_map.get(full_name).copied()
        }

        pub fn worker_id(&self, name: &str) -> Option<i64> {
            self.worker_id_map.get(name).copied()
        }

        pub fn meal_id(&self, name: &str) -> Option<i64> {
            self.meal_id_map.get(name).copied()
        }
    }

    /// Two sites with one user of every role that matters for scoping.
    ///
    /// Oak: `tutor_oak` (head_tutor), `coach_oak` (head_coach), `field_oak`
    /// (tutor), students `Ana` and `Runner` (PE), worker `Bongani`.
    /// Elm: `tutor_elm` (head_tutor), students `Ben` and `Sprinter` (PE),
    /// worker `Thandi`. Site-less: `root`, `boss`, `people`, `watcher`, `fixer`.
    pub async fn create_standard_test_db() -> Result<TestDb, AppError> {
        TestDbBuilder::new()
            .school("Oak")
            .school("Elm")
            .user("root", Role::Superuser, None)
            .admin("boss")
            .user("people", Role::Hr, None)
            .user("watcher", Role::Viewer, None)
            .user("fixer", Role::MaintenanceUser, None)
            .user("tutor_oak", Role::HeadTutor, Some("Oak"))
            .user("coach_oak", Role::HeadCoach, Some("Oak"))
            .user("field_oak", Role::Tutor, Some("Oak"))
            .user("tutor_elm", Role::HeadTutor, Some("Elm"))
            .student("Ana", "Oak", false)
            .student("Runner", "Oak", true)
            .student("Ben", "Elm", false)
            .student("Sprinter", "Elm", true)
            .worker("Bongani", "Oak")
            .worker("Thandi", "Elm")
            .meal("Porridge")
            .build()
            .await
    }

    pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
        setup_test_client_with(test_db, |_| {}).await
    }

    pub async fn setup_test_client_with<F>(test_db: TestDb, tweak: F) -> (Client, TestDb)
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut config = AppConfig::for_tests(test_db.upload_dir.clone());
        tweak(&mut config);

        let rocket = init_rocket(test_db.pool.clone(), config);
        let client = Client::untracked(rocket)
            .await
            .expect("valid rocket instance");

        (client, test_db)
    }

    /// Logs in with the standard password and returns the access token.
    pub async fn login_test_user(client: &Client, username: &str) -> String {
        let response = client
            .post("/api/auth/login")
            .header(ContentType::JSON)
            .body(
                json!({
                    "username": username,
                    "password": STANDARD_PASSWORD
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok, "login failed for {}", username);

        response
            .cookies()
            .get(ACCESS_COOKIE)
            .map(|cookie| cookie.value().to_string())
            .expect("access cookie set on login")
    }

    pub fn bearer(token: &str) -> Header<'static> {
        Header::new("Authorization", format!("Bearer {}", token))
    }

    pub enum Part<'a> {
        Text(&'a str, &'a str),
        File(&'a str, &'a str, &'a [u8]),
    }

    /// Encodes `parts` as a multipart/form-data body.
    pub fn multipart(parts: &[Part<'_>]) -> (ContentType, Vec<u8>) {
        let mut body = Vec::new();

        for part in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match part {
                Part::Text(name, value) => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                            .as_bytes(),
                    );
                    body.extend_from_slice(value.as_bytes());
                }
                Part::File(name, filename, bytes) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                             Content-Type: application/octet-stream\r\n\r\n",
                            name, filename
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(bytes);
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

        let content_type =
            ContentType::new("multipart", "form-data").with_params(("boundary", BOUNDARY));

        (content_type, body)
    }
}
