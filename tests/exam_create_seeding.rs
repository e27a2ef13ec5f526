mod test_support;

use serde_json::json;
use test_support::{admin_token, create_exam, request, request_ok, seed_class, spawn_app};

#[tokio::test]
async fn creating_an_exam_seeds_one_null_mark_row_per_enrollment_and_subject() {
    let app = spawn_app("campusd-exam-seeding");
    let admin = admin_token(&app).await;
    let fixture = seed_class(&app, admin, &["Mathematics", "Science"], 3).await;

    let subjects: Vec<_> = fixture
        .subject_ids
        .iter()
        .map(|id| json!({ "subjectId": id, "maxMarks": 50 }))
        .collect();
    let created = request_ok(
        &app,
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

    assert_eq!(created.get("subjectCount").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(
        created.get("seededMarkRows").and_then(|v| v.as_u64()),
        Some(6)
    );
    let exam_id = created
        .get("examId")
        .and_then(|v| v.as_str())
        .expect("examId");

    // Every cell starts pending.
    let detail = request_ok(&app, "GET", &format!("/exams/{}", exam_id), Some(admin), None).await;
    let subjects = detail.get("subjects").and_then(|v| v.as_array()).expect("subjects");
    assert_eq!(subjects.len(), 2);
    for s in subjects {
        assert_eq!(s.get("pendingCount").and_then(|v| v.as_i64()), Some(3));
        assert_eq!(s.get("markedCount").and_then(|v| v.as_i64()), Some(0));
        assert_eq!(s.get("absentCount").and_then(|v| v.as_i64()), Some(0));
    }
}

#[tokio::test]
async fn reseeding_an_existing_subject_inserts_no_new_rows() {
    let app = spawn_app("campusd-exam-reseed");
    let admin = admin_token(&app).await;
    let fixture = seed_class(&app, admin, &["Mathematics", "Science"], 3).await;
    let exam_id = create_exam(&app, admin, &fixture, 50.0).await;

    let reseeded = request_ok(
        &app,
        "POST",
        &format!("/exams/{}/subjects", exam_id),
        Some(admin),
        Some(json!({ "subjectId": fixture.subject_ids[0], "maxMarks": 50 })),
    )
    .await;
    assert_eq!(
        reseeded.get("seededMarkRows").and_then(|v| v.as_u64()),
        Some(0),
        "duplicate seeding must be a no-op"
    );
}

#[tokio::test]
async fn exam_creation_validates_inputs() {
    let app = spawn_app("campusd-exam-validation");
    let admin = admin_token(&app).await;
    let fixture = seed_class(&app, admin, &["Mathematics"], 1).await;

    // Dates out of order.
    let (status, body) = request(
        &app,
        "POST",
        "/exams",
        Some(admin),
        Some(json!({
            "classroomId": fixture.classroom_id,
            "session": "2025-26",
            "examType": "MIDTERM",
            "name": "Backwards",
            "startDate": "2025-10-10",
            "endDate": "2025-10-01",
            "subjects": [{ "subjectId": fixture.subject_ids[0], "maxMarks": 50 }],
        })),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(test_support::error_code(&body), "VALIDATION_ERROR");

    // Unknown exam type.
    let (status, body) = request(
        &app,
        "POST",
        "/exams",
        Some(admin),
        Some(json!({
            "classroomId": fixture.classroom_id,
            "session": "2025-26",
            "examType": "NO_SUCH_TYPE",
            "name": "Mystery",
            "startDate": "2025-10-01",
            "endDate": "2025-10-10",
            "subjects": [{ "subjectId": fixture.subject_ids[0], "maxMarks": 50 }],
        })),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(test_support::error_code(&body), "VALIDATION_ERROR");

    // Empty subjects.
    let (status, body) = request(
        &app,
        "POST",
        "/exams",
        Some(admin),
        Some(json!({
            "classroomId": fixture.classroom_id,
            "session": "2025-26",
            "examType": "MIDTERM",
            "name": "Empty",
            "startDate": "2025-10-01",
            "endDate": "2025-10-10",
            "subjects": [],
        })),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(test_support::error_code(&body), "VALIDATION_ERROR");

    // Unknown classroom.
    let (status, body) = request(
        &app,
        "POST",
        "/exams",
        Some(admin),
        Some(json!({
            "classroomId": "nope",
            "session": "2025-26",
            "examType": "MIDTERM",
            "name": "Lost",
            "startDate": "2025-10-01",
            "endDate": "2025-10-10",
            "subjects": [{ "subjectId": fixture.subject_ids[0], "maxMarks": 50 }],
        })),
    )
    .await;
    assert_eq!(status, 404);
    assert_eq!(test_support::error_code(&body), "CLASSROOM_NOT_FOUND");
}

#[tokio::test]
async fn exam_routes_require_admin() {
    let app = spawn_app("campusd-exam-auth");
    let admin = admin_token(&app).await;
    let fixture = seed_class(&app, admin, &["Mathematics"], 1).await;
    test_support::seed_auth_token(
        &app,
        "student-token",
        "student",
        &fixture.students[0].student_id,
        Some(&fixture.students[0].enrollment_id),
        Some(&fixture.classroom_id),
    )
    .await;

    let (status, _) = request(&app, "GET", "/exams", None, None).await;
    assert_eq!(status, 401);

    let (status, body) = request(
        &app,
        "POST",
        "/exams",
        Some("student-token"),
        Some(json!({
            "classroomId": fixture.classroom_id,
            "session": "2025-26",
            "examType": "MIDTERM",
            "name": "Nope",
            "startDate": "2025-10-01",
            "endDate": "2025-10-10",
            "subjects": [{ "subjectId": fixture.subject_ids[0], "maxMarks": 50 }],
        })),
    )
    .await;
    assert_eq!(status, 403);
    assert_eq!(test_support::error_code(&body), "FORBIDDEN");
}
