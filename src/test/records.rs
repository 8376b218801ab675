#[cfg(test)]
mod tests {
    use crate::test::test_utils::{
        PDF_BYTES, PNG_BYTES, Part, bearer, create_standard_test_db, login_test_user, multipart,
        setup_test_client,
    };
    use rocket::http::{ContentType, Status};
    use serde_json::{Value, json};
    use std::io::{Cursor, Read};

    #[rocket::async_test]
    async fn test_student_soft_delete_and_restore() {
        let test_db = create_standard_test_db().await.unwrap();
        let (client, test_db) = setup_test_client(test_db).await;
        let ana = test_db.student_id("Ana").unwrap();

        // Site leads manage students but cannot remove them.
        let tutor = login_test_user(&client, "tutor_oak").await;
        let response = client
            .delete(format!("/api/students/{}", ana))
            .header(bearer(&tutor))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);

        let admin = login_test_user(&client, "boss").await;
        let response = client
            .delete(format!("/api/students/{}", ana))
            .header(bearer(&admin))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let response = client
            .get(format!("/api/students/{}", ana))
            .header(bearer(&admin))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::NotFound);

        let response = client
            .get("/api/students/deleted")
            .header(bearer(&admin))
            .dispatch()
            .await;
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["total"], 1);
        assert_eq!(body["items"][0]["id"], ana);
        assert_eq!(body["items"][0]["deleted"], true);

        let response = client
            .post(format!("/api/students/{}/restore", ana))
            .header(bearer(&admin))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let response = client
            .get(format!("/api/students/{}", ana))
            .header(bearer(&tutor))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["deleted"], false);
        assert!(body["deleted_at"].is_null());

        let response = client
            .post(format!("/api/students/{}/restore", ana))
            .header(bearer(&admin))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::NotFound);
    }

    #[rocket::async_test]
    async fn test_bulk_student_create_is_all_or_nothing() {
        let test_db = create_standard_test_db().await.unwrap();
        let (client, test_db) = setup_test_client(test_db).await;
        let elm = test_db.school_id("Elm").unwrap();
        let tutor = login_test_user(&client, "tutor_oak").await;

        let response = client
            .post("/api/students")
            .header(ContentType::JSON)
            .header(bearer(&tutor))
            .body(
                json!([
                    { "full_name": "Dee", "grade": "2", "category": "ww", "year": 2025 },
                    { "full_name": "Eli", "grade": "2", "category": "ww", "year": 2025,
                      "school_id": elm }
                ])
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);

        let response = client
            .post("/api/students")
            .header(ContentType::JSON)
            .header(bearer(&tutor))
            .body(
                json!([
                    { "full_name": "Dee", "grade": "2", "category": "ww", "year": 2025 },
                    { "full_name": "Eli", "grade": "2", "category": "nope", "year": 2025 }
                ])
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);

        let response = client
            .post("/api/students")
            .header(ContentType::JSON)
            .header(bearer(&tutor))
            .body(
                json!([
                    { "full_name": "Dee", "grade": "2", "category": "ww", "year": 2025 },
                    { "full_name": "Eli", "grade": "2", "category": "un", "year": 2025 }
                ])
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Created);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["created"], 2);

        let response = client
            .get("/api/students?search=Dee")
            .header(bearer(&tutor))
            .dispatch()
            .await;
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["total"], 1);
    }

    #[rocket::async_test]
    async fn test_session_writes_follow_pe_flag() {
        let test_db = create_standard_test_db().await.unwrap();
        let (client, test_db) = setup_test_client(test_db).await;
        let ana = test_db.student_id("Ana").unwrap().to_string();
        let runner = test_db.student_id("Runner").unwrap().to_string();

        let tutor = login_test_user(&client, "tutor_oak").await;
        let coach = login_test_user(&client, "coach_oak").await;

        let session = |student_id: &str| {
            multipart(&[
                Part::Text("student_id", student_id),
                Part::Text("session_name", "Reading circle"),
                Part::Text("date", "2025-02-10"),
                Part::Text("duration_hours", "1.5"),
                Part::Text("specs", r#"{"reading": 7}"#),
            ])
        };

        let (content_type, body) = session(&runner);
        let response = client
            .post("/api/sessions")
            .header(content_type)
            .header(bearer(&tutor))
            .body(body)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);

        let (content_type, body) = session(&ana);
        let response = client
            .post("/api/sessions")
            .header(content_type)
            .header(bearer(&coach))
            .body(body)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);

        let (content_type, body) = session(&ana);
        let response = client
            .post("/api/sessions")
            .header(content_type)
            .header(bearer(&tutor))
            .body(body)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Created);
        let record: Value = response.into_json().await.unwrap();
        assert_eq!(record["kind"], "academic");
        assert_eq!(record["specs"]["reading"], 7.0);

        let (content_type, body) = session(&runner);
        let response = client
            .post("/api/sessions")
            .header(content_type)
            .header(bearer(&coach))
            .body(body)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Created);
        let record: Value = response.into_json().await.unwrap();
        assert_eq!(record["kind"], "pe");

        let response = client
            .get("/api/sessions?kind=pe")
            .header(bearer(&tutor))
            .dispatch()
            .await;
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["total"], 1);

        let (content_type, body) = multipart(&[
            Part::Text("student_id", &ana),
            Part::Text("session_name", "Too short"),
            Part::Text("date", "2025-02-10"),
            Part::Text("duration_hours", "0"),
        ]);
        let response = client
            .post("/api/sessions")
            .header(content_type)
            .header(bearer(&tutor))
            .body(body)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
    }

    #[rocket::async_test]
    async fn test_bulk_session_upload_reports_skipped_rows() {
        let test_db = create_standard_test_db().await.unwrap();
        let (client, test_db) = setup_test_client(test_db).await;
        let ana = test_db.student_id("Ana").unwrap();
        let runner = test_db.student_id("Runner").unwrap();
        let ben = test_db.student_id("Ben").unwrap();

        let csv = format!(
            "student_id,session_name,date,duration_hours,outcomes\n\
             {ana},Phonics,2025-02-11,1,Good\n\
             {runner},Phonics,2025-02-11,1,\n\
             {ben},Phonics,2025-02-11,1,\n\
             9999,Phonics,2025-02-11,1,\n\
             {ana},Phonics,not-a-date,1,\n"
        );

        let tutor = login_test_user(&client, "tutor_oak").await;
        let (content_type, body) =
            multipart(&[Part::File("file", "sessions.csv", csv.as_bytes())]);
        let response = client
            .post("/api/sessions/bulkupload")
            .header(content_type)
            .header(bearer(&tutor))
            .body(body)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Created);

        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["created"], 1);
        let skipped_rows: Vec<i64> = body["skipped"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["row"].as_i64().unwrap())
            .collect();
        assert_eq!(skipped_rows, vec![3, 4, 5, 6]);
        assert_eq!(body["skipped"][1]["reason"], "Access forbidden: school mismatch");
        assert_eq!(body["skipped"][2]["reason"], "student 9999 not found");

        let (content_type, body) = multipart(&[Part::File(
            "file",
            "broken.csv",
            b"student,when\n1,2025-01-01\n",
        )]);
        let response = client
            .post("/api/sessions/bulkupload")
            .header(content_type)
            .header(bearer(&tutor))
            .body(body)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);

        // Field staff cannot bulk import.
        let field = login_test_user(&client, "field_oak").await;
        let (content_type, body) =
            multipart(&[Part::File("file", "sessions.csv", csv.as_bytes())]);
        let response = client
            .post("/api/sessions/bulkupload")
            .header(content_type)
            .header(bearer(&field))
            .body(body)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);
    }

    #[rocket::async_test]
    async fn test_assessment_terms_are_unique_per_student() {
        let test_db = create_standard_test_db().await.unwrap();
        let (client, test_db) = setup_test_client(test_db).await;
        let ana = test_db.student_id("Ana").unwrap();
        let tutor = login_test_user(&client, "tutor_oak").await;

        let uri = format!("/api/assessments/student/{}", ana);
        let response = client
            .post(uri.clone())
            .header(ContentType::JSON)
            .header(bearer(&tutor))
            .body(json!({ "term": "Term 1", "score": 61.5 }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Created);

        let response = client
            .post(uri.clone())
            .header(ContentType::JSON)
            .header(bearer(&tutor))
            .body(json!({ "term": "Term 1", "score": 70 }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["error"], "Assessment for Term 1 already exists");

        let response = client
            .put(uri.clone())
            .header(ContentType::JSON)
            .header(bearer(&tutor))
            .body(json!({ "term": "Term 1", "score": 70 }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["score"], 70.0);

        let response = client
            .post(uri.clone())
            .header(ContentType::JSON)
            .header(bearer(&tutor))
            .body(json!({ "term": "Term 2", "score": 101 }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);

        let response = client.get(uri).header(bearer(&tutor)).dispatch().await;
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[rocket::async_test]
    async fn test_attendance_mark_is_idempotent_per_day() {
        let test_db = create_standard_test_db().await.unwrap();
        let (client, test_db) = setup_test_client(test_db).await;
        let ana = test_db.student_id("Ana").unwrap();
        let runner = test_db.student_id("Runner").unwrap();
        let field = login_test_user(&client, "field_oak").await;

        for status in ["present", "late"] {
            let response = client
                .post("/api/students/attendance/mark")
                .header(ContentType::JSON)
                .header(bearer(&field))
                .body(
                    json!({
                        "date": "2025-03-04",
                        "entries": [
                            { "student_id": ana, "status": status },
                            { "student_id": runner, "status": "absent", "note": "Sick" }
                        ]
                    })
                    .to_string(),
                )
                .dispatch()
                .await;
            assert_eq!(response.status(), Status::Created);
        }

        let response = client
            .get("/api/students/attendance/summary?date=2025-03-04")
            .header(bearer(&field))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body: Value = response.into_json().await.unwrap();
        let oak = test_db.school_id("Oak").unwrap();
        let summary = body
            .as_array()
            .unwrap()
            .iter()
            .find(|s| s["school_id"] == oak)
            .unwrap();
        assert_eq!(summary["late"], 1);
        assert_eq!(summary["absent"], 1);
        assert_eq!(summary["present"], 0);
        assert_eq!(summary["total"], 2);

        let response = client
            .post("/api/students/attendance/mark")
            .header(ContentType::JSON)
            .header(bearer(&field))
            .body(json!({ "date": "2025-03-04", "entries": [] }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
    }

    #[rocket::async_test]
    async fn test_upload_content_must_match_extension() {
        let test_db = create_standard_test_db().await.unwrap();
        let (client, test_db) = setup_test_client(test_db).await;
        let ana = test_db.student_id("Ana").unwrap();
        let tutor = login_test_user(&client, "tutor_oak").await;
        let uri = format!("/api/students/{}/files", ana);

        let (content_type, body) =
            multipart(&[Part::File("photo", "me.png", b"MZ\x90\0\x03\0\0\0")]);
        let response = client
            .post(uri.clone())
            .header(content_type)
            .header(bearer(&tutor))
            .body(body)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);

        let (content_type, body) =
            multipart(&[Part::File("parent_permission_pdf", "consent.pdf", PNG_BYTES)]);
        let response = client
            .post(uri.clone())
            .header(content_type)
            .header(bearer(&tutor))
            .body(body)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);

        let (content_type, body) = multipart(&[
            Part::File("photo", "me.png", PNG_BYTES),
            Part::File("parent_permission_pdf", "consent.pdf", PDF_BYTES),
        ]);
        let response = client
            .post(uri)
            .header(content_type)
            .header(bearer(&tutor))
            .body(body)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body: Value = response.into_json().await.unwrap();
        let photo = body["photo"].as_str().unwrap();
        assert!(photo.starts_with("students/me_"));
        assert!(test_db.upload_dir.join(photo).exists());
        assert!(body["parent_permission_pdf"].as_str().unwrap().ends_with(".pdf"));
    }

    #[rocket::async_test]
    async fn test_worker_documents_download_as_zip() {
        let test_db = create_standard_test_db().await.unwrap();
        let (client, test_db) = setup_test_client(test_db).await;
        let bongani = test_db.worker_id("Bongani").unwrap();
        let thandi = test_db.worker_id("Thandi").unwrap();
        let people = login_test_user(&client, "people").await;

        let response = client
            .get(format!("/api/workers/{}/download-docs", bongani))
            .header(bearer(&people))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::NotFound);

        let (content_type, body) = multipart(&[
            Part::File("cv_pdf", "cv.pdf", PDF_BYTES),
            Part::File("photo", "face.png", PNG_BYTES),
        ]);
        let response = client
            .post(format!("/api/workers/{}/files", bongani))
            .header(content_type)
            .header(bearer(&people))
            .body(body)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let response = client
            .get(format!("/api/workers/{}/download-docs", bongani))
            .header(bearer(&people))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(response.content_type(), Some(ContentType::ZIP));
        let disposition = response
            .headers()
            .get_one("Content-Disposition")
            .unwrap()
            .to_string();
        assert_eq!(
            disposition,
            format!("attachment; filename=\"worker_{}_Dlamini_documents.zip\"", bongani)
        );

        let bytes = response.into_bytes().await.unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut names: Vec<String> = archive.file_names().map(String::from).collect();
        names.sort();
        assert_eq!(names, vec!["cv.pdf", "photo.png"]);

        let mut cv = Vec::new();
        archive.by_name("cv.pdf").unwrap().read_to_end(&mut cv).unwrap();
        assert_eq!(cv, PDF_BYTES);

        // Site staff may not pull documents from another school.
        let tutor = login_test_user(&client, "tutor_oak").await;
        let response = client
            .get(format!("/api/workers/{}/download-docs", thandi))
            .header(bearer(&tutor))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);
    }

    #[rocket::async_test]
    async fn test_student_list_handles_extreme_page_and_literal_search() {
        let test_db = create_standard_test_db().await.unwrap();
        let (client, _) = setup_test_client(test_db).await;
        let admin = login_test_user(&client, "boss").await;

        let response = client
            .get("/api/students?page=9223372036854775807&per_page=100")
            .header(bearer(&admin))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["total"], 4);
        assert!(body["items"].as_array().unwrap().is_empty());

        // LIKE wildcards in the term match literally.
        for term in ["%25", "A_a"] {
            let response = client
                .get(format!("/api/students?search={}", term))
                .header(bearer(&admin))
                .dispatch()
                .await;
            assert_eq!(response.status(), Status::Ok);
            let body: Value = response.into_json().await.unwrap();
            assert_eq!(body["total"], 0, "search {} acted as a wildcard", term);
        }
    }

    #[rocket::async_test]
    async fn test_blank_id_number_leaves_student_unchanged() {
        let test_db = create_standard_test_db().await.unwrap();
        let (client, test_db) = setup_test_client(test_db).await;
        let ana = test_db.student_id("Ana").unwrap();
        let tutor = login_test_user(&client, "tutor_oak").await;

        let response = client
            .put(format!("/api/students/{}", ana))
            .header(ContentType::JSON)
            .header(bearer(&tutor))
            .body(json!({ "id_number": "ID-1" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["id_number"], "ID-1");

        let response = client
            .put(format!("/api/students/{}", ana))
            .header(ContentType::JSON)
            .header(bearer(&tutor))
            .body(json!({ "id_number": "   " }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["id_number"], "ID-1");
    }
}
