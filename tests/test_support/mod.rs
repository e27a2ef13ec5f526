#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tower::ServiceExt;

use campusd::config::{Config, NotificationDriver};
use campusd::notify::fake::FakeProvider;
use campusd::notify::provider::PushProvider;
use campusd::{build_router, build_state, db, AppState};

pub struct TestApp {
    pub state: Arc<AppState>,
    pub router: Router,
    pub provider: Arc<FakeProvider>,
}

fn temp_db_path(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir.join("campusd.sqlite3")
}

pub fn spawn_app(prefix: &str) -> TestApp {
    spawn_app_with_driver(prefix, NotificationDriver::Sync)
}

pub fn spawn_app_with_driver(prefix: &str, driver: NotificationDriver) -> TestApp {
    let db_path = temp_db_path(prefix);
    let conn = db::open_db(&db_path).expect("open db");
    let provider = Arc::new(FakeProvider::new());
    let provider_dyn: Arc<dyn PushProvider> = provider.clone();
    let cfg = Config {
        addr: "127.0.0.1:0".to_string(),
        db_path,
        fcm_server_key: String::new(),
        notification_driver: driver,
        dispatch_concurrency: 3,
        dispatch_chunk_size: 500,
    };
    let state = build_state(cfg, conn, provider_dyn);
    TestApp {
        router: build_router(Arc::clone(&state)),
        state,
        provider,
    }
}

pub async fn request(
    app: &TestApp,
    method: &str,
    path: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(t) = token {
        builder = builder.header("authorization", format!("Bearer {}", t));
    }
    let req = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("build request");

    let resp = app.router.clone().oneshot(req).await.expect("send request");
    let status = resp.status();
    let bytes = resp
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    let value: Value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("parse response json")
    };
    (status, value)
}

pub async fn request_ok(
    app: &TestApp,
    method: &str,
    path: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Value {
    let (status, value) = request(app, method, path, token, body).await;
    assert!(
        value.get("success").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} {} failed ({}): {}",
        method,
        path,
        status,
        value
    );
    value.get("data").cloned().unwrap_or_else(|| json!({}))
}

pub fn error_code(value: &Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
        .unwrap_or("")
}

/// Seeds a bearer token row directly; token validation is an external
/// collaborator modeled as a lookup table.
pub async fn seed_auth_token(
    app: &TestApp,
    token: &str,
    role: &str,
    user_id: &str,
    enrollment_id: Option<&str>,
    classroom_id: Option<&str>,
) {
    let conn = app.state.db.lock().await;
    conn.execute(
        "INSERT OR REPLACE INTO auth_tokens(token, role, user_id, enrollment_id, classroom_id)
         VALUES(?, ?, ?, ?, ?)",
        (token, role, user_id, enrollment_id, classroom_id),
    )
    .expect("seed auth token");
}

pub async fn admin_token(app: &TestApp) -> &'static str {
    seed_auth_token(app, "admin-token", "admin", "admin-1", None, None).await;
    "admin-token"
}

pub struct StudentRef {
    pub student_id: String,
    pub enrollment_id: String,
}

pub struct ClassFixture {
    pub classroom_id: String,
    pub subject_ids: Vec<String>,
    pub students: Vec<StudentRef>,
}

/// Classroom + subjects + enrolled students, created through the API.
pub async fn seed_class(
    app: &TestApp,
    admin: &str,
    subject_names: &[&str],
    student_count: usize,
) -> ClassFixture {
    let created = request_ok(
        app,
        "POST",
        "/classrooms",
        Some(admin),
        Some(json!({
            "class": "8",
            "section": "A",
            "medium": "EN",
            "session": "2025-26",
        })),
    )
    .await;
    let classroom_id = created
        .get("classroomId")
        .and_then(|v| v.as_str())
        .expect("classroomId")
        .to_string();

    let mut subject_ids = Vec::new();
    for name in subject_names {
        let subject = request_ok(
            app,
            "POST",
            "/subjects",
            Some(admin),
            Some(json!({ "name": name })),
        )
        .await;
        subject_ids.push(
            subject
                .get("subjectId")
                .and_then(|v| v.as_str())
                .expect("subjectId")
                .to_string(),
        );
    }

    let mut students = Vec::new();
    for i in 0..student_count {
        let enrolled = request_ok(
            app,
            "POST",
            &format!("/classrooms/{}/enrollments", classroom_id),
            Some(admin),
            Some(json!({
                "studentName": format!("Student {}", i + 1),
                "rollNo": i as i64 + 1,
            })),
        )
        .await;
        students.push(StudentRef {
            student_id: enrolled
                .get("studentId")
                .and_then(|v| v.as_str())
                .expect("studentId")
                .to_string(),
            enrollment_id: enrolled
                .get("enrollmentId")
                .and_then(|v| v.as_str())
                .expect("enrollmentId")
                .to_string(),
        });
    }

    ClassFixture {
        classroom_id,
        subject_ids,
        students,
    }
}

/// Standard two-subject exam over the fixture classroom.
pub async fn create_exam(app: &TestApp, admin: &str, fixture: &ClassFixture, max_marks: f64) -> String {
    let subjects: Vec<Value> = fixture
        .subject_ids
        .iter()
        .map(|id| json!({ "subjectId": id, "maxMarks": max_marks }))
        .collect();
    let created = request_ok(
        app,
        "POST",
        "/exams",
        Some(admin),
        Some(json!({
            "classroomId": fixture.classroom_id,
            "session": "2025-26",
            "examType": "MIDTERM",
            "name": "Half Yearly Examination",
            "startDate": "2025-10-01",
            "endDate": "2025-10-10",
            "subjects": subjects,
        })),
    )
    .await;
    created
        .get("examId")
        .and_then(|v| v.as_str())
        .expect("examId")
        .to_string()
}
