use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use rusqlite::OptionalExtension;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::http::auth;
use crate::http::error::{ok, ok_with_message, ApiError};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClassroomInput {
    pub class: String,
    pub section: String,
    pub medium: String,
    pub session: String,
}

pub async fn create_classroom(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(input): Json<CreateClassroomInput>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db.lock().await;
    let principal = auth::authenticate(&conn, &headers)?;
    auth::require_admin(&principal)?;

    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM classrooms WHERE session = ? AND class = ? AND section = ? AND medium = ?",
            (&input.session, &input.class, &input.section, &input.medium),
            |r| r.get(0),
        )
        .optional()?;
    if existing.is_some() {
        return Err(ApiError::conflict(
            "ALREADY_EXISTS",
            "classroom already exists for this session",
        ));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classrooms(id, class, section, medium, session) VALUES(?, ?, ?, ?, ?)",
        (&id, &input.class, &input.section, &input.medium, &input.session),
    )?;
    Ok(ok_with_message(
        json!({ "classroomId": id }),
        "classroom created",
    ))
}

pub async fn list_classrooms(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db.lock().await;
    let principal = auth::authenticate(&conn, &headers)?;
    auth::require_staff(&principal)?;

    let mut stmt = conn.prepare(
        "SELECT c.id, c.class, c.section, c.medium, c.session,
                (SELECT COUNT(*) FROM enrollments e WHERE e.classroom_id = c.id)
         FROM classrooms c
         ORDER BY c.session DESC, c.class, c.section",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "classroomId": r.get::<_, String>(0)?,
                "class": r.get::<_, String>(1)?,
                "section": r.get::<_, String>(2)?,
                "medium": r.get::<_, String>(3)?,
                "session": r.get::<_, String>(4)?,
                "studentCount": r.get::<_, i64>(5)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ok(json!({ "classrooms": rows })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollInput {
    pub student_name: String,
    #[serde(default)]
    pub guardian_phone: Option<String>,
    pub roll_no: i64,
}

/// Admission: creates the student record and the enrollment in one go.
pub async fn enroll_student(
    State(state): State<Arc<AppState>>,
    Path(classroom_id): Path<String>,
    headers: HeaderMap,
    Json(input): Json<EnrollInput>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db.lock().await;
    let principal = auth::authenticate(&conn, &headers)?;
    auth::require_admin(&principal)?;

    let session: Option<String> = conn
        .query_row(
            "SELECT session FROM classrooms WHERE id = ?",
            [&classroom_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(session) = session else {
        return Err(ApiError::not_found("CLASSROOM_NOT_FOUND", "classroom not found"));
    };
    if input.student_name.trim().is_empty() {
        return Err(ApiError::validation("studentName must be non-empty"));
    }

    let tx = conn.unchecked_transaction()?;
    let student_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO students(id, name, guardian_phone) VALUES(?, ?, ?)",
        (&student_id, input.student_name.trim(), &input.guardian_phone),
    )?;
    let enrollment_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO enrollments(id, student_id, classroom_id, session, roll_no)
         VALUES(?, ?, ?, ?, ?)",
        (&enrollment_id, &student_id, &classroom_id, &session, input.roll_no),
    )?;
    tx.commit()?;

    Ok(ok_with_message(
        json!({ "studentId": student_id, "enrollmentId": enrollment_id }),
        "student enrolled",
    ))
}

pub async fn list_enrollments(
    State(state): State<Arc<AppState>>,
    Path(classroom_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db.lock().await;
    let principal = auth::authenticate(&conn, &headers)?;
    auth::require_classroom_access(&principal, &classroom_id)?;

    let mut stmt = conn.prepare(
        "SELECT e.id, e.student_id, st.name, e.roll_no, e.session
         FROM enrollments e
         JOIN students st ON st.id = e.student_id
         WHERE e.classroom_id = ?
         ORDER BY e.roll_no",
    )?;
    let rows = stmt
        .query_map([&classroom_id], |r| {
            Ok(json!({
                "enrollmentId": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "studentName": r.get::<_, String>(2)?,
                "rollNo": r.get::<_, i64>(3)?,
                "session": r.get::<_, String>(4)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ok(json!({ "enrollments": rows })))
}

#[derive(Debug, Deserialize)]
pub struct CreateSubjectInput {
    pub name: String,
}

pub async fn create_subject(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(input): Json<CreateSubjectInput>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db.lock().await;
    let principal = auth::authenticate(&conn, &headers)?;
    auth::require_admin(&principal)?;

    let name = input.name.trim();
    if name.is_empty() {
        return Err(ApiError::validation("name must be non-empty"));
    }
    let existing: Option<String> = conn
        .query_row("SELECT id FROM subjects WHERE name = ?", [name], |r| r.get(0))
        .optional()?;
    if let Some(id) = existing {
        // Subject creation is idempotent by name.
        return Ok(ok(json!({ "subjectId": id })));
    }
    let id = Uuid::new_v4().to_string();
    conn.execute("INSERT INTO subjects(id, name) VALUES(?, ?)", (&id, name))?;
    Ok(ok(json!({ "subjectId": id })))
}

pub async fn list_subjects(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db.lock().await;
    let principal = auth::authenticate(&conn, &headers)?;
    auth::require_staff(&principal)?;

    let mut stmt = conn.prepare("SELECT id, name FROM subjects ORDER BY name")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "subjectId": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ok(json!({ "subjects": rows })))
}
