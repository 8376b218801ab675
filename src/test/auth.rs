#[cfg(test)]
mod tests {
    use crate::auth::{ACCESS_COOKIE, REFRESH_COOKIE};
    use crate::test::test_utils::{
        STANDARD_PASSWORD, bearer, create_standard_test_db, login_test_user, setup_test_client,
        setup_test_client_with,
    };
    use rocket::http::{ContentType, Cookie, Status};
    use serde_json::{Value, json};

    #[rocket::async_test]
    async fn test_login_sets_token_cookies() {
        let test_db = create_standard_test_db().await.unwrap();
        let (client, _) = setup_test_client(test_db).await;

        let response = client
            .post("/api/auth/login")
            .header(ContentType::JSON)
            .body(
                json!({
                    "username": "tutor_oak",
                    "password": STANDARD_PASSWORD
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);
        assert!(response.cookies().get(ACCESS_COOKIE).is_some());
        assert!(response.cookies().get(REFRESH_COOKIE).is_some());

        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["user"]["username"], "tutor_oak");
        assert_eq!(body["user"]["role"], "head_tutor");
        assert!(body["user"].get("password_hash").is_none());
    }

    #[rocket::async_test]
    async fn test_login_failure_is_audited() {
        let test_db = create_standard_test_db().await.unwrap();
        let (client, test_db) = setup_test_client(test_db).await;

        let response = client
            .post("/api/auth/login")
            .header(ContentType::JSON)
            .body(
                json!({
                    "username": "tutor_oak",
                    "password": "wrong_password"
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Unauthorized);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["error"], "Invalid username or password");

        let failures: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM audit_logs WHERE action = 'LOGIN_FAILED: tutor_oak'",
        )
        .fetch_one(&test_db.pool)
        .await
        .unwrap();
        assert_eq!(failures, 1);
    }

    #[rocket::async_test]
    async fn test_protected_routes_require_a_token() {
        let test_db = create_standard_test_db().await.unwrap();
        let (client, _) = setup_test_client(test_db).await;

        for endpoint in ["/api/auth/me", "/api/students", "/api/workers", "/api/users"] {
            let response = client.get(endpoint).dispatch().await;
            assert_eq!(
                response.status(),
                Status::Unauthorized,
                "Endpoint {} did not require authentication",
                endpoint
            );
            let body: Value = response.into_json().await.unwrap();
            assert!(body["error"].is_string());
        }

        let response = client
            .get("/api/auth/me")
            .header(bearer("not-a-jwt"))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn test_token_accepted_from_cookie_or_header() {
        let test_db = create_standard_test_db().await.unwrap();
        let (client, _) = setup_test_client(test_db).await;
        let token = login_test_user(&client, "boss").await;

        let response = client
            .get("/api/auth/me")
            .cookie(Cookie::new(ACCESS_COOKIE, token.clone()))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let response = client
            .get("/api/auth/me")
            .header(bearer(&token))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["username"], "boss");
    }

    #[rocket::async_test]
    async fn test_logout_revokes_token() {
        let test_db = create_standard_test_db().await.unwrap();
        let (client, test_db) = setup_test_client(test_db).await;
        let token = login_test_user(&client, "tutor_oak").await;

        let response = client
            .post("/api/auth/logout")
            .header(bearer(&token))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let response = client
            .get("/api/students")
            .header(bearer(&token))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Unauthorized);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["error"], "Token has been revoked");

        let blocked: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM token_blocklist")
            .fetch_one(&test_db.pool)
            .await
            .unwrap();
        assert_eq!(blocked, 1);
    }

    #[rocket::async_test]
    async fn test_refresh_issues_new_access_token() {
        let test_db = create_standard_test_db().await.unwrap();
        let (client, _) = setup_test_client(test_db).await;

        let login = client
            .post("/api/auth/login")
            .header(ContentType::JSON)
            .body(json!({ "username": "coach_oak", "password": STANDARD_PASSWORD }).to_string())
            .dispatch()
            .await;
        let access = login.cookies().get(ACCESS_COOKIE).unwrap().value().to_string();
        let refresh = login.cookies().get(REFRESH_COOKIE).unwrap().value().to_string();

        // An access token cannot stand in for a refresh token.
        let response = client
            .post("/api/auth/refresh")
            .header(bearer(&access))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Unauthorized);

        let response = client
            .post("/api/auth/refresh")
            .cookie(Cookie::new(REFRESH_COOKIE, refresh))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let fresh = response
            .cookies()
            .get(ACCESS_COOKIE)
            .map(|c| c.value().to_string())
            .unwrap();

        let response = client
            .get("/api/auth/me")
            .header(bearer(&fresh))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
    }

    #[rocket::async_test]
    async fn test_login_rate_limit_is_audited() {
        let test_db = create_standard_test_db().await.unwrap();
        let (client, test_db) = setup_test_client_with(test_db, |config| {
            config.rate_limit_requests = 1;
        })
        .await;

        login_test_user(&client, "boss").await;

        let response = client
            .post("/api/auth/login")
            .header(ContentType::JSON)
            .body(json!({ "username": "boss", "password": STANDARD_PASSWORD }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::TooManyRequests);
        let body: Value = response.into_json().await.unwrap();
        assert!(body["error"].is_string());

        let audited: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM audit_logs WHERE action LIKE 'RATE_LIMIT_EXCEEDED%'",
        )
        .fetch_one(&test_db.pool)
        .await
        .unwrap();
        assert_eq!(audited, 1);
    }

    #[rocket::async_test]
    async fn test_register_requires_manage_users() {
        let test_db = create_standard_test_db().await.unwrap();
        let (client, test_db) = setup_test_client(test_db).await;
        let oak = test_db.school_id("Oak").unwrap();

        let payload = json!({
            "username": "new_tutor",
            "password": "longenough",
            "role": "tutor",
            "school_id": oak
        })
        .to_string();

        let token = login_test_user(&client, "tutor_oak").await;
        let response = client
            .post("/api/auth/register")
            .header(ContentType::JSON)
            .header(bearer(&token))
            .body(payload.clone())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);

        let token = login_test_user(&client, "boss").await;
        let response = client
            .post("/api/auth/register")
            .header(ContentType::JSON)
            .header(bearer(&token))
            .body(payload)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Created);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["school_id"], oak);

        // Only a superuser can mint another superuser.
        let response = client
            .post("/api/auth/register")
            .header(ContentType::JSON)
            .header(bearer(&token))
            .body(
                json!({
                    "username": "another_root",
                    "password": "longenough",
                    "role": "superuser"
                })
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);
    }
}
