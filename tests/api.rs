use autoecole::config::Config;
use autoecole::state::AppState;
use axum::body::{to_bytes, Body};
use axum::http::header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

const FORM: &str = "application/x-www-form-urlencoded";

struct TestApp {
    _dir: TempDir,
    app: Router,
    cookie: String,
}

impl TestApp {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(Config::rooted_at(dir.path())).await.unwrap();
        let app = autoecole::app(state);

        let response = app
            .clone()
            .oneshot(
                Request::post("/auth")
                    .header(CONTENT_TYPE, FORM)
                    .body(Body::from("username=admin&password=password"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        let cookie = response.headers()[SET_COOKIE]
            .to_str()
            .unwrap()
            .split(';')
            .next()
            .unwrap()
            .to_string();

        Self {
            _dir: dir,
            app,
            cookie,
        }
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.app.clone().oneshot(request).await.unwrap()
    }

    async fn get(&self, path: &str) -> Response {
        self.send(
            Request::get(path)
                .header(COOKIE, &self.cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    async fn post_form(&self, path: &str, body: &str) -> Response {
        self.send(
            Request::post(path)
                .header(COOKIE, &self.cookie)
                .header(CONTENT_TYPE, FORM)
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn delete(&self, path: &str) -> Response {
        self.send(
            Request::delete(path)
                .header(COOKIE, &self.cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    async fn json(&self, path: &str) -> Value {
        let response = self.get(path).await;
        assert_eq!(response.status(), StatusCode::OK, "GET {}", path);
        body_json(response).await
    }

    /// Registers a student and returns its generated identifier.
    async fn student(&self, name: &str, extra: &str) -> String {
        let body = format!(
            "name={}&phone=0600000000&national_id=AB{}&status=active&payment_status=not_defined{}",
            name, name, extra
        );
        let response = self.post_form("/students", &body).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[LOCATION], "/students");

        let students = self.json("/students").await;
        students
            .as_array()
            .unwrap()
            .iter()
            .find(|s| s["name"] == name)
            .map(|s| s["id"].as_str().unwrap().to_string())
            .unwrap()
    }
}

async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

#[tokio::test]
async fn requests_without_a_session_are_sent_to_login() {
    let app = TestApp::new().await;

    let response = app
        .send(Request::get("/students").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[LOCATION], "/login");

    let response = app
        .send(
            Request::get("/students")
                .header(COOKIE, "session=authenticated")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FOUND);

    let response = app
        .send(Request::get("/login").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn wrong_credentials_redirect_with_an_error_flag() {
    let app = TestApp::new().await;

    let response = app
        .send(
            Request::post("/auth")
                .header(CONTENT_TYPE, FORM)
                .body(Body::from("username=admin&password=nope"))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[LOCATION], "/login?error=1");
    assert!(response.headers().get(SET_COOKIE).is_none());
}

#[tokio::test]
async fn payment_status_follows_payments() {
    let app = TestApp::new().await;
    let ali = app.student("Ali", "&total_fees=1000").await;

    let response = app
        .post_form(
            "/payments",
            &format!(
                "student_id={}&amount=400&payment_date=2024-06-01&payment_type=cash",
                ali
            ),
        )
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[LOCATION], "/payments");

    let detail = app.json(&format!("/students/{}", ali)).await;
    assert_eq!(detail["success"], true);
    assert_eq!(detail["student"]["payment_status"], "partial");
    assert_eq!(detail["total_paid"], 400.0);
    assert_eq!(detail["payments"].as_array().unwrap().len(), 1);

    app.post_form(
        "/payments",
        &format!(
            "student_id={}&amount=600&payment_date=2024-06-02&payment_type=card",
            ali
        ),
    )
    .await;
    let detail = app.json(&format!("/students/{}", ali)).await;
    assert_eq!(detail["student"]["payment_status"], "complete");

    // the list view sees the same status without opening the detail
    let students = app.json("/students").await;
    assert_eq!(students[0]["payment_status"], "complete");
}

#[tokio::test]
async fn exam_without_date_is_rejected_and_not_stored() {
    let app = TestApp::new().await;
    let ali = app.student("Ali", "").await;

    let response = app
        .post_form(
            "/exams",
            &format!("student_id={}&exam_type=code&result=pass", ali),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error = body_json(response).await;
    assert_eq!(error["error"], "InvalidPayload");

    let listing = app.json("/exams").await;
    assert!(listing["exams"].as_array().unwrap().is_empty());
    assert_eq!(listing["students"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_records_are_not_found() {
    let app = TestApp::new().await;

    assert_eq!(
        app.get("/students/does-not-exist").await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        app.get("/exams/does-not-exist").await.status(),
        StatusCode::NOT_FOUND
    );
    let response = app
        .post_form(
            "/payments/does-not-exist",
            "amount=10&payment_date=2024-01-01&payment_type=cash",
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .post_form(
            "/exams",
            "student_id=ghost&exam_type=code&exam_date=2024-01-01&result=pass",
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_values_are_client_errors() {
    let app = TestApp::new().await;
    let ali = app.student("Ali", "").await;

    let response = app
        .post_form(
            "/payments",
            &format!(
                "student_id={}&amount=lots&payment_date=2024-06-01&payment_type=cash",
                ali
            ),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_form(
            "/payments",
            &format!(
                "student_id={}&amount=10&payment_date=2024-06-01&payment_type=cheque",
                ali
            ),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_form("/students", "name=Sara&phone=06&status=active&payment_status=partial")
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn changing_a_student_identifier_moves_its_records() {
    let app = TestApp::new().await;
    let old = app.student("Ali", "&total_fees=500").await;
    for date in ["2024-05-01", "2024-05-20"] {
        let response = app
            .post_form(
                "/exams",
                &format!(
                    "student_id={}&exam_type=code&exam_date={}&result=fail",
                    old, date
                ),
            )
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
    }
    app.post_form(
        "/payments",
        &format!(
            "student_id={}&amount=200&payment_date=2024-05-02&payment_type=cash",
            old
        ),
    )
    .await;

    let response = app
        .post_form(&format!("/students/{}", old), "id=ALI-001&phone=0611111111")
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[LOCATION], "/students/ALI-001");

    assert_eq!(
        app.get(&format!("/students/{}", old)).await.status(),
        StatusCode::NOT_FOUND
    );
    let detail = app.json("/students/ALI-001").await;
    assert_eq!(detail["student"]["name"], "Ali");
    assert_eq!(detail["student"]["phone"], "0611111111");
    assert_eq!(detail["student"]["payment_status"], "partial");
    assert_eq!(detail["exams"].as_array().unwrap().len(), 2);
    assert_eq!(detail["payments"].as_array().unwrap().len(), 1);

    let exams = app.json("/exams").await;
    for exam in exams["exams"].as_array().unwrap() {
        assert_eq!(exam["student_id"], "ALI-001");
    }
}

#[tokio::test]
async fn renaming_onto_a_taken_identifier_conflicts() {
    let app = TestApp::new().await;
    let ali = app.student("Ali", "").await;
    let sara = app.student("Sara", "").await;

    let response = app
        .post_form(&format!("/students/{}", ali), &format!("id={}", sara))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(
        app.get(&format!("/students/{}", ali)).await.status(),
        StatusCode::OK
    );
}

#[tokio::test]
async fn deleting_a_student_removes_its_records() {
    let app = TestApp::new().await;
    let ali = app.student("Ali", "").await;
    let sara = app.student("Sara", "").await;
    for student in [&ali, &sara] {
        app.post_form(
            "/exams",
            &format!(
                "student_id={}&exam_type=driving&exam_date=2024-05-01&result=pass",
                student
            ),
        )
        .await;
    }

    let response = app.delete(&format!("/students/{}", ali)).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let exams = app.json("/exams").await;
    let exams = exams["exams"].as_array().unwrap();
    assert_eq!(exams.len(), 1);
    assert_eq!(exams[0]["student_id"], sara.as_str());
}

#[tokio::test]
async fn exams_and_payments_can_be_edited_and_deleted() {
    let app = TestApp::new().await;
    let ali = app.student("Ali", "&total_fees=300").await;
    app.post_form(
        "/exams",
        &format!(
            "student_id={}&exam_type=code&exam_date=2024-05-01&result=pending&notes=first",
            ali
        ),
    )
    .await;
    app.post_form(
        "/payments",
        &format!(
            "student_id={}&amount=100&payment_date=2024-05-02&payment_type=cash",
            ali
        ),
    )
    .await;

    let exams = app.json("/exams").await;
    let exam_id = exams["exams"][0]["id"].as_str().unwrap().to_string();
    let response = app
        .send(
            Request::put(format!("/exams/{}", exam_id))
                .header(COOKIE, &app.cookie)
                .header(CONTENT_TYPE, FORM)
                .body(Body::from("result=pass&notes="))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let exam = app.json(&format!("/exams/{}", exam_id)).await;
    assert_eq!(exam["result"], "pass");
    assert_eq!(exam["exam_type"], "code");
    assert_eq!(exam["notes"], Value::Null);

    let payments = app.json("/payments").await;
    let payment_id = payments["payments"][0]["id"].as_str().unwrap().to_string();
    let response = app
        .post_form(&format!("/payments/{}", payment_id), "amount=300")
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let students = app.json("/students").await;
    assert_eq!(students[0]["payment_status"], "complete");

    let response = app.delete(&format!("/payments/{}", payment_id)).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let students = app.json("/students").await;
    assert_eq!(students[0]["payment_status"], "not_defined");

    let response = app.delete(&format!("/exams/{}", exam_id)).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        app.get(&format!("/exams/{}", exam_id)).await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn student_photo_is_uploaded_and_served() {
    let app = TestApp::new().await;
    let png: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

    let mut body = Vec::new();
    for (name, value) in [
        ("name", "Ali"),
        ("phone", "0600000000"),
        ("national_id", "AB1"),
        ("status", "active"),
        ("payment_status", "not_defined"),
    ] {
        body.extend_from_slice(
            format!(
                "--XBOUNDARY\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                name, value
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        b"--XBOUNDARY\r\nContent-Disposition: form-data; name=\"image\"; filename=\"ali.png\"\r\nContent-Type: image/png\r\n\r\n",
    );
    body.extend_from_slice(png);
    body.extend_from_slice(b"\r\n--XBOUNDARY--\r\n");

    let response = app
        .send(
            Request::post("/students")
                .header(COOKIE, &app.cookie)
                .header(CONTENT_TYPE, "multipart/form-data; boundary=XBOUNDARY")
                .body(Body::from(body))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let students = app.json("/students").await;
    let image_id = students[0]["image_id"].as_str().unwrap().to_string();
    let response = app.get(&format!("/images/{}", image_id)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], "image/png");
    assert_eq!(body_bytes(response).await, png);
}

#[tokio::test]
async fn statistics_and_exports_reflect_stored_records() {
    let app = TestApp::new().await;
    let ali = app.student("Ali, \"the fast\"", "").await;
    let today = chrono::Utc::now().date_naive();
    app.post_form(
        "/exams",
        &format!(
            "student_id={}&exam_type=code&exam_date={}&result=pass",
            ali, today
        ),
    )
    .await;
    app.post_form(
        "/exams",
        &format!(
            "student_id={}&exam_type=driving&exam_date={}&result=fail",
            ali, today
        ),
    )
    .await;

    let stats = app.json("/statistics?period=week").await;
    assert_eq!(stats["period"], "week");
    assert_eq!(stats["students"]["total"], 1);
    assert_eq!(stats["exams"]["total"], 2);
    assert_eq!(stats["success_rates"]["overall"], 50.0);
    assert_eq!(stats["success_rates"]["code"], 100.0);
    assert_eq!(stats["success_rates"]["driving"], 0.0);

    assert_eq!(
        app.get("/statistics?period=decade").await.status(),
        StatusCode::BAD_REQUEST
    );

    let response = app.get("/export/students.csv").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], "text/csv; charset=utf-8");
    let text = String::from_utf8(body_bytes(response).await).unwrap();
    let mut reader = csv::Reader::from_reader(text.as_bytes());
    let record = reader.records().next().unwrap().unwrap();
    assert_eq!(&record[1], "Ali, \"the fast\"");
    assert_eq!(&record[4], "Actif");

    let response = app.get("/export/all.tar.gz").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], "application/gzip");

    let dashboard = app.json("/").await;
    assert_eq!(dashboard["total_exams"], 2);
    assert_eq!(dashboard["passed_exams"], 1);
}

#[tokio::test]
async fn password_can_be_changed() {
    let app = TestApp::new().await;
    let change = |body: &'static str| {
        Request::post("/change-password")
            .header(COOKIE, app.cookie.as_str())
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    };

    let response = app.send(change(r#"{"currentPassword":"password"}"#)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .send(change(r#"{"currentPassword":"wrong","newPassword":"n3w"}"#))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .send(change(r#"{"currentPassword":"password","newPassword":"n3w"}"#))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["success"], true);

    let response = app
        .send(
            Request::post("/auth")
                .header(CONTENT_TYPE, FORM)
                .body(Body::from("username=admin&password=n3w"))
                .unwrap(),
        )
        .await;
    assert_eq!(response.headers()[LOCATION], "/");
}

#[tokio::test]
async fn logout_ends_the_session() {
    let app = TestApp::new().await;

    let response = app
        .send(
            Request::post("/logout")
                .header(COOKIE, &app.cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[LOCATION], "/login");

    let response = app.get("/students").await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[LOCATION], "/login");
}

#[tokio::test]
async fn failed_registration_keeps_no_photo() {
    let app = TestApp::new().await;
    let data = app._dir.path().join("data");
    // a directory where the record should go makes the write fail
    std::fs::create_dir(data.join("students").join("ALI-1.dat")).unwrap();

    let mut body = Vec::new();
    for (name, value) in [
        ("id", "ALI-1"),
        ("name", "Ali"),
        ("phone", "0600000000"),
        ("national_id", "AB1"),
        ("status", "active"),
        ("payment_status", "not_defined"),
    ] {
        body.extend_from_slice(
            format!(
                "--XBOUNDARY\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                name, value
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        b"--XBOUNDARY\r\nContent-Disposition: form-data; name=\"image\"; filename=\"ali.png\"\r\nContent-Type: image/png\r\n\r\n\x89PNG\r\n--XBOUNDARY--\r\n",
    );

    let response = app
        .send(
            Request::post("/students")
                .header(COOKIE, &app.cookie)
                .header(CONTENT_TYPE, "multipart/form-data; boundary=XBOUNDARY")
                .body(Body::from(body))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let images = std::fs::read_dir(data.join("images")).unwrap().count();
    assert_eq!(images, 0);
}

#[tokio::test]
async fn malformed_queries_get_a_json_error() {
    let app = TestApp::new().await;

    let response = app.get("/statistics?period=day&period=week").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
    let error = body_json(response).await;
    assert_eq!(error["error"], "InvalidPayload");
}
