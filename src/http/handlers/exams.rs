use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use crate::exam_engine::{self, CreateExamInput, MarkEntry, UpdateExamInput};
use crate::http::auth;
use crate::http::error::{ok, ok_with_message, ApiError};
use crate::notify::orchestrator::{self, RecipientSpec, SendInput};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamListQuery {
    #[serde(default)]
    pub classroom_id: Option<String>,
}

pub async fn list_exams(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ExamListQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db.lock().await;
    let principal = auth::authenticate(&conn, &headers)?;
    auth::require_staff(&principal)?;

    let mut stmt = conn.prepare(
        "SELECT x.id, x.name, t.name, x.session, x.classroom_id, x.start_date, x.end_date,
                x.is_declared,
                (SELECT COUNT(DISTINCT m.enrollment_id) FROM exam_marks m WHERE m.exam_id = x.id),
                (SELECT COUNT(DISTINCT m.subject_id) FROM exam_marks m WHERE m.exam_id = x.id)
         FROM exams x
         JOIN exam_types t ON t.id = x.exam_type_id
         WHERE (?1 IS NULL OR x.classroom_id = ?1)
         ORDER BY x.start_date DESC, x.name",
    )?;
    let rows = stmt
        .query_map([&query.classroom_id], |r| {
            Ok(json!({
                "examId": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "examType": r.get::<_, String>(2)?,
                "session": r.get::<_, String>(3)?,
                "classroomId": r.get::<_, String>(4)?,
                "startDate": r.get::<_, String>(5)?,
                "endDate": r.get::<_, String>(6)?,
                "isDeclared": r.get::<_, i64>(7)? != 0,
                "studentCount": r.get::<_, i64>(8)?,
                "subjectCount": r.get::<_, i64>(9)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ok(json!({ "exams": rows })))
}

pub async fn create_exam(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(input): Json<CreateExamInput>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db.lock().await;
    let principal = auth::authenticate(&conn, &headers)?;
    auth::require_admin(&principal)?;

    let created = exam_engine::create_exam(&conn, &input)?;
    Ok(ok_with_message(
        json!({
            "examId": created.exam_id,
            "subjectCount": created.subject_count,
            "seededMarkRows": created.seeded_mark_rows,
        }),
        "exam created",
    ))
}

pub async fn get_exam(
    State(state): State<Arc<AppState>>,
    Path(exam_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db.lock().await;
    let principal = auth::authenticate(&conn, &headers)?;
    let exam = exam_engine::exam_row(&conn, &exam_id)?;
    auth::require_classroom_access(&principal, &exam.classroom_id)?;

    let mut stmt = conn.prepare(
        "SELECT m.subject_id, s.name, MAX(m.max_marks),
                SUM(CASE WHEN m.marks_obtained IS NOT NULL AND m.is_absent = 0 THEN 1 ELSE 0 END),
                SUM(m.is_absent),
                SUM(CASE WHEN m.marks_obtained IS NULL AND m.is_absent = 0 THEN 1 ELSE 0 END)
         FROM exam_marks m
         JOIN subjects s ON s.id = m.subject_id
         WHERE m.exam_id = ?
         GROUP BY m.subject_id, s.name
         ORDER BY s.name",
    )?;
    let subjects = stmt
        .query_map([&exam_id], |r| {
            Ok(json!({
                "subjectId": r.get::<_, String>(0)?,
                "subjectName": r.get::<_, String>(1)?,
                "maxMarks": r.get::<_, f64>(2)?,
                "markedCount": r.get::<_, i64>(3)?,
                "absentCount": r.get::<_, i64>(4)?,
                "pendingCount": r.get::<_, i64>(5)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ok(json!({
        "examId": exam.id,
        "name": exam.name,
        "session": exam.session,
        "classroomId": exam.classroom_id,
        "startDate": exam.start_date,
        "endDate": exam.end_date,
        "isDeclared": exam.is_declared,
        "subjects": subjects,
    })))
}

pub async fn update_exam(
    State(state): State<Arc<AppState>>,
    Path(exam_id): Path<String>,
    headers: HeaderMap,
    Json(input): Json<UpdateExamInput>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db.lock().await;
    let principal = auth::authenticate(&conn, &headers)?;
    auth::require_admin(&principal)?;

    exam_engine::update_exam(&conn, &exam_id, &input)?;
    Ok(ok_with_message(json!({ "examId": exam_id }), "exam updated"))
}

pub async fn delete_exam(
    State(state): State<Arc<AppState>>,
    Path(exam_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db.lock().await;
    let principal = auth::authenticate(&conn, &headers)?;
    auth::require_admin(&principal)?;

    exam_engine::delete_exam(&conn, &exam_id)?;
    Ok(ok_with_message(json!({ "examId": exam_id }), "exam deleted"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddSubjectInput {
    pub subject_id: String,
    pub max_marks: f64,
}

pub async fn add_subject(
    State(state): State<Arc<AppState>>,
    Path(exam_id): Path<String>,
    headers: HeaderMap,
    Json(input): Json<AddSubjectInput>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db.lock().await;
    let principal = auth::authenticate(&conn, &headers)?;
    auth::require_admin(&principal)?;

    let seeded = exam_engine::add_subject(&conn, &exam_id, &input.subject_id, input.max_marks)?;
    Ok(ok_with_message(
        json!({ "examId": exam_id, "seededMarkRows": seeded }),
        "subject added to exam",
    ))
}

/// Enrollments of the exam's classroom that have no mark rows yet.
pub async fn list_addable_students(
    State(state): State<Arc<AppState>>,
    Path(exam_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db.lock().await;
    let principal = auth::authenticate(&conn, &headers)?;
    let exam = exam_engine::exam_row(&conn, &exam_id)?;
    auth::require_classroom_access(&principal, &exam.classroom_id)?;

    let mut stmt = conn.prepare(
        "SELECT e.id, e.student_id, st.name, e.roll_no
         FROM enrollments e
         JOIN students st ON st.id = e.student_id
         WHERE e.classroom_id = ?
           AND e.id NOT IN (SELECT DISTINCT enrollment_id FROM exam_marks WHERE exam_id = ?)
         ORDER BY e.roll_no",
    )?;
    let rows = stmt
        .query_map((&exam.classroom_id, &exam_id), |r| {
            Ok(json!({
                "enrollmentId": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "studentName": r.get::<_, String>(2)?,
                "rollNo": r.get::<_, i64>(3)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ok(json!({ "students": rows })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddStudentInput {
    pub student_id: String,
}

pub async fn add_student(
    State(state): State<Arc<AppState>>,
    Path(exam_id): Path<String>,
    headers: HeaderMap,
    Json(input): Json<AddStudentInput>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db.lock().await;
    let principal = auth::authenticate(&conn, &headers)?;
    auth::require_admin(&principal)?;

    let seeded = exam_engine::add_student(&conn, &exam_id, &input.student_id)?;
    Ok(ok_with_message(
        json!({ "examId": exam_id, "seededMarkRows": seeded }),
        "student added to exam",
    ))
}

pub async fn remove_student(
    State(state): State<Arc<AppState>>,
    Path((exam_id, student_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db.lock().await;
    let principal = auth::authenticate(&conn, &headers)?;
    auth::require_admin(&principal)?;

    let deleted = exam_engine::remove_student(&conn, &exam_id, &student_id)?;
    Ok(ok_with_message(
        json!({ "examId": exam_id, "deletedMarkRows": deleted }),
        "student removed from exam",
    ))
}

#[derive(Debug, Deserialize)]
pub struct UpdateMarksInput {
    pub results: Vec<MarkEntry>,
}

pub async fn update_marks(
    State(state): State<Arc<AppState>>,
    Path((exam_id, student_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(input): Json<UpdateMarksInput>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db.lock().await;
    let principal = auth::authenticate(&conn, &headers)?;
    let exam = exam_engine::exam_row(&conn, &exam_id)?;
    auth::require_classroom_access(&principal, &exam.classroom_id)?;

    let updated = exam_engine::update_marks(
        &conn,
        &exam_id,
        &student_id,
        &input.results,
        &principal.user_id,
    )?;
    Ok(ok_with_message(
        json!({ "examId": exam_id, "updatedRows": updated }),
        "marks updated",
    ))
}

#[derive(Debug, Deserialize)]
pub struct MarkAbsentInput {
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn mark_absent(
    State(state): State<Arc<AppState>>,
    Path((exam_id, student_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(input): Json<MarkAbsentInput>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db.lock().await;
    let principal = auth::authenticate(&conn, &headers)?;
    let exam = exam_engine::exam_row(&conn, &exam_id)?;
    auth::require_classroom_access(&principal, &exam.classroom_id)?;

    let updated = exam_engine::mark_absent(
        &conn,
        &exam_id,
        &student_id,
        input.reason.as_deref(),
        &principal.user_id,
    )?;
    Ok(ok_with_message(
        json!({ "examId": exam_id, "updatedRows": updated }),
        "student marked absent",
    ))
}

pub async fn generate_results(
    State(state): State<Arc<AppState>>,
    Path(exam_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let (published, recipients) = {
        let conn = state.db.lock().await;
        let principal = auth::authenticate(&conn, &headers)?;
        auth::require_admin(&principal)?;

        let published = exam_engine::publish_exam(&conn, &exam_id)?;

        let mut stmt =
            conn.prepare("SELECT student_id FROM enrollments WHERE classroom_id = ?")?;
        let recipients = stmt
            .query_map([&published.classroom_id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|id| RecipientSpec {
                role: "student".to_string(),
                id,
            })
            .collect::<Vec<_>>();
        (published, recipients)
    };

    // Students learn about declared results through the push pipeline;
    // a delivery problem never rolls back the declaration.
    if !recipients.is_empty() {
        let input = SendInput {
            event_type: Some("RESULTS_DECLARED".to_string()),
            title: "Results declared".to_string(),
            body: format!("Results for {} have been declared.", published.exam_name),
            recipients,
            data: Some(json!({ "examId": published.exam_id })),
        };
        match orchestrator::send(
            &state.db,
            &state.dispatcher,
            state.cfg.notification_driver,
            input,
        )
        .await
        {
            Ok(receipt) => drop(receipt.delivery),
            Err(e) => warn!(exam = %published.exam_id, error = %e.message,
                "results-declared notification was not persisted"),
        }
    }

    Ok(ok_with_message(
        json!({
            "examId": published.exam_id,
            "studentCount": published.student_count,
            "isDeclared": true,
            "results": published.results,
        }),
        "results generated",
    ))
}
