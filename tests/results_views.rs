mod test_support;

use serde_json::json;
use test_support::{
    admin_token, create_exam, request, request_ok, seed_auth_token, seed_class, spawn_app,
};

#[tokio::test]
async fn projections_tolerate_missing_summaries() {
    let app = spawn_app("campusd-views-nosummary");
    let admin = admin_token(&app).await;
    let fixture = seed_class(&app, admin, &["Mathematics", "Science"], 2).await;
    let exam_id = create_exam(&app, admin, &fixture, 50.0).await;
    seed_auth_token(
        &app,
        "teacher-token",
        "teacher",
        "teacher-1",
        None,
        Some(&fixture.classroom_id),
    )
    .await;
    seed_auth_token(
        &app,
        "student-token",
        "student",
        &fixture.students[0].student_id,
        Some(&fixture.students[0].enrollment_id),
        Some(&fixture.classroom_id),
    )
    .await;

    request_ok(
        &app,
        "PUT",
        &format!("/exams/{}/students/{}/marks", exam_id, fixture.students[0].student_id),
        Some(admin),
        Some(json!({ "results": [
            { "subjectId": fixture.subject_ids[0], "marksObtained": 40, "remark": "good work" }
        ] })),
    )
    .await;

    // Teacher rank list: subject data present, no ranks yet.
    let ranks = request_ok(
        &app,
        "GET",
        &format!("/exams/{}/rank-list", exam_id),
        Some("teacher-token"),
        None,
    )
    .await;
    let students = ranks.get("students").and_then(|v| v.as_array()).expect("students");
    assert_eq!(students.len(), 2);
    for s in students {
        assert!(s.get("rank").expect("rank field").is_null());
        assert!(s.get("subjects").and_then(|v| v.as_array()).is_some());
    }

    // Student transcript: marks and remark visible, rank null.
    let transcript = request_ok(
        &app,
        "GET",
        &format!("/exams/{}/my-result", exam_id),
        Some("student-token"),
        None,
    )
    .await;
    assert!(transcript.get("rank").expect("rank field").is_null());
    assert!(transcript.get("percentage").expect("percentage field").is_null());
    let subjects = transcript.get("subjects").and_then(|v| v.as_array()).expect("subjects");
    assert_eq!(subjects.len(), 2);
    let marked = subjects
        .iter()
        .find(|s| s.get("marksObtained").and_then(|v| v.as_f64()) == Some(40.0))
        .expect("marked subject");
    assert_eq!(
        marked.get("teacherRemark").and_then(|v| v.as_str()),
        Some("good work")
    );
}

#[tokio::test]
async fn exam_detail_derives_per_student_statuses() {
    let app = spawn_app("campusd-views-status");
    let admin = admin_token(&app).await;
    let fixture = seed_class(&app, admin, &["Mathematics", "Science"], 4).await;
    let exam_id = create_exam(&app, admin, &fixture, 50.0).await;
    let s1 = fixture.subject_ids[0].as_str();
    let s2 = fixture.subject_ids[1].as_str();

    // Student 0: fully marked. Student 1: one subject marked. Student 2:
    // fully absent. Student 3: marked in one subject, absent in the other.
    request_ok(
        &app,
        "PUT",
        &format!("/exams/{}/students/{}/marks", exam_id, fixture.students[0].student_id),
        Some(admin),
        Some(json!({ "results": [
            { "subjectId": s1, "marksObtained": 45 },
            { "subjectId": s2, "marksObtained": 38 }
        ] })),
    )
    .await;
    request_ok(
        &app,
        "PUT",
        &format!("/exams/{}/students/{}/marks", exam_id, fixture.students[1].student_id),
        Some(admin),
        Some(json!({ "results": [{ "subjectId": s1, "marksObtained": 22 }] })),
    )
    .await;
    request_ok(
        &app,
        "PUT",
        &format!("/exams/{}/students/{}/absent", exam_id, fixture.students[2].student_id),
        Some(admin),
        Some(json!({})),
    )
    .await;
    request_ok(
        &app,
        "PUT",
        &format!("/exams/{}/students/{}/marks", exam_id, fixture.students[3].student_id),
        Some(admin),
        Some(json!({ "results": [
            { "subjectId": s1, "marksObtained": 31 },
            { "subjectId": s2, "isAbsent": true }
        ] })),
    )
    .await;

    let detail = request_ok(
        &app,
        "GET",
        &format!("/exams/{}/results", exam_id),
        Some(admin),
        None,
    )
    .await;
    let students = detail.get("students").and_then(|v| v.as_array()).expect("students");
    let status_of = |enrollment_id: &str| {
        students
            .iter()
            .find(|s| s.get("enrollmentId").and_then(|v| v.as_str()) == Some(enrollment_id))
            .and_then(|s| s.get("status"))
            .and_then(|v| v.as_str())
            .expect("status")
            .to_string()
    };
    assert_eq!(status_of(&fixture.students[0].enrollment_id), "completed");
    assert_eq!(status_of(&fixture.students[1].enrollment_id), "partial");
    assert_eq!(status_of(&fixture.students[2].enrollment_id), "absent");
    assert_eq!(status_of(&fixture.students[3].enrollment_id), "partial present");

    let stats = detail.get("statistics").expect("statistics");
    assert_eq!(stats.get("totalStudents").and_then(|v| v.as_u64()), Some(4));
    assert_eq!(stats.get("absentStudents").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(stats.get("gradedStudents").and_then(|v| v.as_u64()), Some(0));
}

#[tokio::test]
async fn transcript_reports_attendance_and_published_rank() {
    let app = spawn_app("campusd-views-transcript");
    let admin = admin_token(&app).await;
    let fixture = seed_class(&app, admin, &["Mathematics", "Science"], 2).await;
    let exam_id = create_exam(&app, admin, &fixture, 50.0).await;
    let s1 = fixture.subject_ids[0].as_str();
    let s2 = fixture.subject_ids[1].as_str();
    seed_auth_token(
        &app,
        "student-token",
        "student",
        &fixture.students[0].student_id,
        Some(&fixture.students[0].enrollment_id),
        Some(&fixture.classroom_id),
    )
    .await;

    request_ok(
        &app,
        "PUT",
        &format!("/exams/{}/students/{}/marks", exam_id, fixture.students[0].student_id),
        Some(admin),
        Some(json!({ "results": [
            { "subjectId": s1, "marksObtained": 48 },
            { "subjectId": s2, "isAbsent": true }
        ] })),
    )
    .await;
    request_ok(
        &app,
        "PUT",
        &format!("/exams/{}/students/{}/marks", exam_id, fixture.students[1].student_id),
        Some(admin),
        Some(json!({ "results": [
            { "subjectId": s1, "marksObtained": 20 },
            { "subjectId": s2, "marksObtained": 25 }
        ] })),
    )
    .await;
    request_ok(
        &app,
        "PUT",
        &format!("/exams/{}/generate-results", exam_id),
        Some(admin),
        None,
    )
    .await;

    let transcript = request_ok(
        &app,
        "GET",
        &format!("/exams/{}/my-result", exam_id),
        Some("student-token"),
        None,
    )
    .await;
    assert_eq!(
        transcript.get("attendance").and_then(|v| v.as_str()),
        Some("Partial Present")
    );
    // 48/100 = 48.00 beats 45/100.
    assert_eq!(transcript.get("rank").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(transcript.get("percentage").and_then(|v| v.as_f64()), Some(48.0));
    assert_eq!(transcript.get("grade").and_then(|v| v.as_str()), Some("D"));
}

#[tokio::test]
async fn projection_access_is_role_scoped() {
    let app = spawn_app("campusd-views-auth");
    let admin = admin_token(&app).await;
    let fixture = seed_class(&app, admin, &["Mathematics"], 1).await;
    let exam_id = create_exam(&app, admin, &fixture, 50.0).await;
    seed_auth_token(
        &app,
        "student-token",
        "student",
        &fixture.students[0].student_id,
        Some(&fixture.students[0].enrollment_id),
        Some(&fixture.classroom_id),
    )
    .await;
    seed_auth_token(
        &app,
        "other-teacher",
        "teacher",
        "teacher-2",
        None,
        Some("some-other-classroom"),
    )
    .await;

    let (status, _) = request(
        &app,
        "GET",
        &format!("/exams/{}/results", exam_id),
        Some("student-token"),
        None,
    )
    .await;
    assert_eq!(status, 403);

    let (status, _) = request(
        &app,
        "GET",
        &format!("/exams/{}/rank-list", exam_id),
        Some("other-teacher"),
        None,
    )
    .await;
    assert_eq!(status, 403);

    let (status, _) = request(
        &app,
        "GET",
        &format!("/exams/{}/my-result", exam_id),
        Some(admin),
        None,
    )
    .await;
    assert_eq!(status, 403);
}
