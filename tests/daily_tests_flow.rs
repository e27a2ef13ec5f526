mod test_support;

use serde_json::json;
use test_support::{admin_token, error_code, request, request_ok, seed_auth_token, seed_class, spawn_app};

#[tokio::test]
async fn daily_test_marks_follow_absence_and_declaration_rules() {
    let app = spawn_app("campusd-daily-tests");
    let admin = admin_token(&app).await;
    let fixture = seed_class(&app, admin, &["Mathematics"], 3).await;
    seed_auth_token(
        &app,
        "teacher-token",
        "teacher",
        "tch-1",
        None,
        Some(&fixture.classroom_id),
    )
    .await;

    let created = request_ok(
        &app,
        "POST",
        "/daily-tests",
        Some("teacher-token"),
        Some(json!({
            "classroomId": fixture.classroom_id,
            "subjectId": fixture.subject_ids[0],
            "name": "Friday quiz",
            "testDate": "2025-09-12",
            "maxMarks": 20,
        })),
    )
    .await;
    let test_id = created.get("testId").and_then(|v| v.as_str()).expect("testId");

    // Over-range marks are rejected before any write.
    let (status, body) = request(
        &app,
        "PUT",
        &format!("/daily-tests/{}/marks", test_id),
        Some("teacher-token"),
        Some(json!({ "marks": [
            { "studentId": fixture.students[0].student_id, "marksObtained": 25 }
        ] })),
    )
    .await;
    assert_eq!(status, 422);
    assert_eq!(error_code(&body), "INVALID_MARKS");

    let updated = request_ok(
        &app,
        "PUT",
        &format!("/daily-tests/{}/marks", test_id),
        Some("teacher-token"),
        Some(json!({ "marks": [
            { "studentId": fixture.students[0].student_id, "marksObtained": 18 },
            { "studentId": fixture.students[1].student_id, "isAbsent": true },
        ] })),
    )
    .await;
    assert_eq!(updated.get("updatedRows").and_then(|v| v.as_u64()), Some(2));

    let listed = request_ok(
        &app,
        "GET",
        &format!("/daily-tests?classroomId={}", fixture.classroom_id),
        Some("teacher-token"),
        None,
    )
    .await;
    let tests = listed.get("tests").and_then(|v| v.as_array()).expect("tests");
    assert_eq!(tests.len(), 1);
    assert_eq!(tests[0].get("markedCount").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(tests[0].get("isDeclared").and_then(|v| v.as_bool()), Some(false));

    request_ok(
        &app,
        "PUT",
        &format!("/daily-tests/{}/declare", test_id),
        Some("teacher-token"),
        None,
    )
    .await;

    // Declared tests freeze marks and cannot be re-declared.
    let (status, body) = request(
        &app,
        "PUT",
        &format!("/daily-tests/{}/marks", test_id),
        Some("teacher-token"),
        Some(json!({ "marks": [
            { "studentId": fixture.students[2].student_id, "marksObtained": 10 }
        ] })),
    )
    .await;
    assert_eq!(status, 409);
    assert_eq!(error_code(&body), "EXAM_CANNOT_BE_MODIFIED");

    let (status, _) = request(
        &app,
        "PUT",
        &format!("/daily-tests/{}/declare", test_id),
        Some("teacher-token"),
        None,
    )
    .await;
    assert_eq!(status, 409);
}

#[tokio::test]
async fn teachers_cannot_create_tests_for_other_classrooms() {
    let app = spawn_app("campusd-daily-tests-auth");
    let admin = admin_token(&app).await;
    let fixture = seed_class(&app, admin, &["Mathematics"], 1).await;
    seed_auth_token(
        &app,
        "other-teacher",
        "teacher",
        "tch-2",
        None,
        Some("some-other-classroom"),
    )
    .await;

    let (status, _) = request(
        &app,
        "POST",
        "/daily-tests",
        Some("other-teacher"),
        Some(json!({
            "classroomId": fixture.classroom_id,
            "subjectId": fixture.subject_ids[0],
            "name": "Sneaky quiz",
            "testDate": "2025-09-12",
            "maxMarks": 20,
        })),
    )
    .await;
    assert_eq!(status, 403);
}
