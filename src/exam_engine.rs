//! Exam lifecycle engine: mark-row seeding, mark entry with absence
//! semantics, result generation with two-pool ranking, and the
//! declaration freeze.

use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::grading;
use crate::http::error::ApiError;

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

#[derive(Debug, Clone)]
pub struct ExamRow {
    pub id: String,
    pub classroom_id: String,
    pub session: String,
    pub exam_type_id: String,
    pub name: String,
    pub start_date: String,
    pub end_date: String,
    pub is_declared: bool,
}

pub fn exam_row(conn: &Connection, exam_id: &str) -> Result<ExamRow, ApiError> {
    conn.query_row(
        "SELECT id, classroom_id, session, exam_type_id, name, start_date, end_date, is_declared
         FROM exams WHERE id = ?",
        [exam_id],
        |r| {
            Ok(ExamRow {
                id: r.get(0)?,
                classroom_id: r.get(1)?,
                session: r.get(2)?,
                exam_type_id: r.get(3)?,
                name: r.get(4)?,
                start_date: r.get(5)?,
                end_date: r.get(6)?,
                is_declared: r.get::<_, i64>(7)? != 0,
            })
        },
    )
    .optional()?
    .ok_or_else(|| ApiError::not_found("EXAM_NOT_FOUND", "exam not found"))
}

fn ensure_not_declared(exam: &ExamRow) -> Result<(), ApiError> {
    if exam.is_declared {
        return Err(ApiError::conflict(
            "EXAM_CANNOT_BE_MODIFIED",
            "results have been declared for this exam",
        ));
    }
    Ok(())
}

/// Enrollment of `student_id` in the exam's classroom.
fn resolve_enrollment(
    conn: &Connection,
    classroom_id: &str,
    student_id: &str,
) -> Result<String, ApiError> {
    conn.query_row(
        "SELECT id FROM enrollments WHERE classroom_id = ? AND student_id = ?",
        (classroom_id, student_id),
        |r| r.get::<_, String>(0),
    )
    .optional()?
    .ok_or_else(|| {
        ApiError::not_found("STUDENT_NOT_FOUND", "student is not enrolled in this classroom")
    })
}

fn parse_date(label: &str, value: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
        ApiError::validation(format!("{} must be a YYYY-MM-DD date", label))
            .with_details(json!({ label: value }))
    })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectSpec {
    pub subject_id: String,
    pub max_marks: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateExamInput {
    pub classroom_id: String,
    pub session: String,
    pub exam_type: String,
    pub name: String,
    pub start_date: String,
    pub end_date: String,
    pub subjects: Vec<SubjectSpec>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedExam {
    pub exam_id: String,
    pub subject_count: usize,
    pub seeded_mark_rows: usize,
}

pub fn create_exam(conn: &Connection, input: &CreateExamInput) -> Result<CreatedExam, ApiError> {
    if input.subjects.is_empty() {
        return Err(ApiError::validation("subjects must be non-empty"));
    }
    for s in &input.subjects {
        if s.max_marks <= 0.0 {
            return Err(ApiError::validation("maxMarks must be > 0")
                .with_details(json!({ "subjectId": s.subject_id, "maxMarks": s.max_marks })));
        }
    }
    let start = parse_date("startDate", &input.start_date)?;
    let end = parse_date("endDate", &input.end_date)?;
    if end < start {
        return Err(ApiError::validation("endDate must not be before startDate")
            .with_details(json!({ "startDate": input.start_date, "endDate": input.end_date })));
    }

    let classroom_exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM classrooms WHERE id = ?",
            [&input.classroom_id],
            |r| r.get(0),
        )
        .optional()?;
    if classroom_exists.is_none() {
        return Err(ApiError::not_found("CLASSROOM_NOT_FOUND", "classroom not found"));
    }

    // Exam type is addressed by code or display name.
    let exam_type_id: Option<String> = conn
        .query_row(
            "SELECT id FROM exam_types WHERE code = ?1 OR name = ?1",
            [&input.exam_type],
            |r| r.get(0),
        )
        .optional()?;
    let Some(exam_type_id) = exam_type_id else {
        return Err(ApiError::validation("unknown exam type")
            .with_details(json!({ "examType": input.exam_type })));
    };

    for s in &input.subjects {
        let known: Option<i64> = conn
            .query_row("SELECT 1 FROM subjects WHERE id = ?", [&s.subject_id], |r| r.get(0))
            .optional()?;
        if known.is_none() {
            return Err(ApiError::validation("unknown subject")
                .with_details(json!({ "subjectId": s.subject_id })));
        }
    }

    let tx = conn.unchecked_transaction()?;
    let exam_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO exams(id, classroom_id, session, exam_type_id, name, start_date, end_date)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &exam_id,
            &input.classroom_id,
            &input.session,
            &exam_type_id,
            &input.name,
            &input.start_date,
            &input.end_date,
        ),
    )?;

    let mut seeded = 0usize;
    for s in &input.subjects {
        seeded += seed_subject_rows(&tx, &exam_id, &input.classroom_id, &s.subject_id, s.max_marks)?;
    }
    tx.commit()?;

    Ok(CreatedExam {
        exam_id,
        subject_count: input.subjects.len(),
        seeded_mark_rows: seeded,
    })
}

/// One null-mark row per current enrollment. Existing rows (unique on
/// exam/enrollment/subject) are left untouched.
fn seed_subject_rows(
    conn: &Connection,
    exam_id: &str,
    classroom_id: &str,
    subject_id: &str,
    max_marks: f64,
) -> Result<usize, ApiError> {
    let mut stmt = conn.prepare("SELECT id FROM enrollments WHERE classroom_id = ?")?;
    let enrollment_ids = stmt
        .query_map([classroom_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut inserted = 0usize;
    for enrollment_id in &enrollment_ids {
        inserted += conn.execute(
            "INSERT OR IGNORE INTO exam_marks(id, exam_id, enrollment_id, subject_id, max_marks)
             VALUES(?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                exam_id,
                enrollment_id,
                subject_id,
                max_marks,
            ),
        )?;
    }
    Ok(inserted)
}

pub fn add_subject(
    conn: &Connection,
    exam_id: &str,
    subject_id: &str,
    max_marks: f64,
) -> Result<usize, ApiError> {
    let exam = exam_row(conn, exam_id)?;
    ensure_not_declared(&exam)?;
    if max_marks <= 0.0 {
        return Err(ApiError::validation("maxMarks must be > 0")
            .with_details(json!({ "maxMarks": max_marks })));
    }
    let known: Option<i64> = conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [subject_id], |r| r.get(0))
        .optional()?;
    if known.is_none() {
        return Err(
            ApiError::validation("unknown subject").with_details(json!({ "subjectId": subject_id }))
        );
    }
    seed_subject_rows(conn, exam_id, &exam.classroom_id, subject_id, max_marks)
}

pub fn add_student(conn: &Connection, exam_id: &str, student_id: &str) -> Result<usize, ApiError> {
    let exam = exam_row(conn, exam_id)?;
    ensure_not_declared(&exam)?;
    let enrollment_id = resolve_enrollment(conn, &exam.classroom_id, student_id)?;

    // The exam's subject set lives in its existing mark rows.
    let mut stmt = conn.prepare(
        "SELECT subject_id, MAX(max_marks) FROM exam_marks WHERE exam_id = ? GROUP BY subject_id",
    )?;
    let subjects = stmt
        .query_map([exam_id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    if subjects.is_empty() {
        return Err(ApiError::unprocessable(
            "NO_SUBJECTS",
            "exam has no subjects to seed marks from",
        ));
    }

    let existing: i64 = conn.query_row(
        "SELECT COUNT(*) FROM exam_marks WHERE exam_id = ? AND enrollment_id = ?",
        (exam_id, &enrollment_id),
        |r| r.get(0),
    )?;
    if existing > 0 {
        return Err(ApiError::conflict(
            "ALREADY_EXISTS",
            "student already has mark rows for this exam",
        ));
    }

    let mut inserted = 0usize;
    for (subject_id, max_marks) in &subjects {
        inserted += conn.execute(
            "INSERT OR IGNORE INTO exam_marks(id, exam_id, enrollment_id, subject_id, max_marks)
             VALUES(?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                exam_id,
                &enrollment_id,
                subject_id,
                max_marks,
            ),
        )?;
    }
    Ok(inserted)
}

pub fn remove_student(conn: &Connection, exam_id: &str, student_id: &str) -> Result<usize, ApiError> {
    let exam = exam_row(conn, exam_id)?;
    ensure_not_declared(&exam)?;
    let enrollment_id = resolve_enrollment(conn, &exam.classroom_id, student_id)?;
    let deleted = conn.execute(
        "DELETE FROM exam_marks WHERE exam_id = ? AND enrollment_id = ?",
        (exam_id, &enrollment_id),
    )?;
    Ok(deleted)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkEntry {
    pub subject_id: String,
    #[serde(default)]
    pub marks_obtained: Option<f64>,
    #[serde(default)]
    pub is_absent: Option<bool>,
    #[serde(default)]
    pub remark: Option<String>,
    #[serde(default)]
    pub max_marks: Option<f64>,
}

pub fn update_marks(
    conn: &Connection,
    exam_id: &str,
    student_id: &str,
    entries: &[MarkEntry],
    updated_by: &str,
) -> Result<usize, ApiError> {
    let exam = exam_row(conn, exam_id)?;
    ensure_not_declared(&exam)?;
    if entries.is_empty() {
        return Err(ApiError::validation("results must be non-empty"));
    }
    let enrollment_id = resolve_enrollment(conn, &exam.classroom_id, student_id)?;

    let tx = conn.unchecked_transaction()?;
    let now = now_iso();
    let mut updated = 0usize;
    for entry in entries {
        updated += apply_mark_entry(&tx, exam_id, &enrollment_id, entry, updated_by, &now)?;
    }
    tx.commit()?;
    Ok(updated)
}

fn apply_mark_entry(
    conn: &Connection,
    exam_id: &str,
    enrollment_id: &str,
    entry: &MarkEntry,
    updated_by: &str,
    now: &str,
) -> Result<usize, ApiError> {
    let row: Option<(String, f64)> = conn
        .query_row(
            "SELECT id, max_marks FROM exam_marks
             WHERE exam_id = ? AND enrollment_id = ? AND subject_id = ?",
            (exam_id, enrollment_id, &entry.subject_id),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((row_id, current_max)) = row else {
        return Err(ApiError::not_found("NOT_FOUND", "no mark row for subject")
            .with_details(json!({ "subjectId": entry.subject_id })));
    };

    let max_marks = match entry.max_marks {
        Some(m) if m <= 0.0 => {
            return Err(ApiError::validation("maxMarks must be > 0")
                .with_details(json!({ "subjectId": entry.subject_id, "maxMarks": m })));
        }
        Some(m) => m,
        None => current_max,
    };

    let absent = entry.is_absent.unwrap_or(false);
    if absent && entry.marks_obtained.is_some() {
        return Err(ApiError::validation(
            "marksObtained cannot be combined with isAbsent",
        )
        .with_details(json!({ "subjectId": entry.subject_id })));
    }

    let marks = if absent {
        Some(0.0)
    } else {
        match entry.marks_obtained {
            Some(v) if v < 0.0 || v > max_marks => {
                return Err(ApiError::unprocessable("INVALID_MARKS", "marks out of range")
                    .with_details(json!({
                        "subjectId": entry.subject_id,
                        "marksObtained": v,
                        "maxMarks": max_marks,
                    })));
            }
            other => other,
        }
    };

    let changed = match marks {
        Some(v) => conn.execute(
            "UPDATE exam_marks
             SET marks_obtained = ?, is_absent = ?, max_marks = ?,
                 remark = COALESCE(?, remark), updated_by = ?, updated_at = ?
             WHERE id = ?",
            (v, absent as i64, max_marks, &entry.remark, updated_by, now, &row_id),
        )?,
        // Remark-only (or max-only) touch keeps the mark cell as-is.
        None => conn.execute(
            "UPDATE exam_marks
             SET max_marks = ?,
                 remark = COALESCE(?, remark), updated_by = ?, updated_at = ?
             WHERE id = ?",
            (max_marks, &entry.remark, updated_by, now, &row_id),
        )?,
    };
    Ok(changed)
}

pub fn mark_absent(
    conn: &Connection,
    exam_id: &str,
    student_id: &str,
    reason: Option<&str>,
    updated_by: &str,
) -> Result<usize, ApiError> {
    let exam = exam_row(conn, exam_id)?;
    ensure_not_declared(&exam)?;
    let enrollment_id = resolve_enrollment(conn, &exam.classroom_id, student_id)?;

    let marked: i64 = conn.query_row(
        "SELECT COUNT(*) FROM exam_marks
         WHERE exam_id = ? AND enrollment_id = ?
           AND marks_obtained IS NOT NULL AND is_absent = 0",
        (exam_id, &enrollment_id),
        |r| r.get(0),
    )?;
    if marked > 0 {
        return Err(ApiError::conflict(
            "STUDENT_ALREADY_HAS_MARKS",
            "student already has entered marks for this exam",
        ));
    }

    let updated = conn.execute(
        "UPDATE exam_marks
         SET is_absent = 1, marks_obtained = 0, remark = ?, updated_by = ?, updated_at = ?
         WHERE exam_id = ? AND enrollment_id = ?",
        (reason, updated_by, now_iso(), exam_id, &enrollment_id),
    )?;
    Ok(updated)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentResult {
    pub enrollment_id: String,
    pub roll_no: i64,
    pub total_marks: f64,
    pub max_marks: f64,
    pub percentage: f64,
    pub grade: String,
    pub rank: i64,
    pub is_absent: bool,
}

struct StudentAgg {
    enrollment_id: String,
    roll_no: i64,
    total: f64,
    max: f64,
    absent_subjects: i64,
    subject_count: i64,
    pending_subjects: i64,
}

fn load_student_aggregates(conn: &Connection, exam_id: &str) -> Result<Vec<StudentAgg>, ApiError> {
    let mut stmt = conn.prepare(
        "SELECT m.enrollment_id,
                e.roll_no,
                COALESCE(SUM(CASE WHEN m.is_absent = 1 THEN 0 ELSE COALESCE(m.marks_obtained, 0) END), 0),
                COALESCE(SUM(m.max_marks), 0),
                SUM(m.is_absent),
                COUNT(*),
                SUM(CASE WHEN m.marks_obtained IS NULL AND m.is_absent = 0 THEN 1 ELSE 0 END)
         FROM exam_marks m
         JOIN enrollments e ON e.id = m.enrollment_id
         WHERE m.exam_id = ?
         GROUP BY m.enrollment_id, e.roll_no",
    )?;
    let rows = stmt
        .query_map([exam_id], |r| {
            Ok(StudentAgg {
                enrollment_id: r.get(0)?,
                roll_no: r.get(1)?,
                total: r.get(2)?,
                max: r.get(3)?,
                absent_subjects: r.get(4)?,
                subject_count: r.get(5)?,
                pending_subjects: r.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Two disjoint rank pools: students with at least one non-absent
/// subject take 1..N by percentage (roll number breaks ties), fully
/// absent students continue at N+1.
fn assign_results(aggregates: Vec<StudentAgg>) -> Vec<StudentResult> {
    let mut present: Vec<StudentResult> = Vec::new();
    let mut absent: Vec<StudentResult> = Vec::new();

    for agg in aggregates {
        let percentage = if agg.max > 0.0 {
            grading::round2(agg.total / agg.max * 100.0)
        } else {
            0.0
        };
        let all_absent = agg.absent_subjects == agg.subject_count;
        let result = StudentResult {
            enrollment_id: agg.enrollment_id,
            roll_no: agg.roll_no,
            total_marks: agg.total,
            max_marks: agg.max,
            percentage,
            grade: grading::grade_for(percentage, all_absent).to_string(),
            rank: 0,
            is_absent: all_absent,
        };
        if all_absent {
            absent.push(result);
        } else {
            present.push(result);
        }
    }

    let by_percentage = |a: &StudentResult, b: &StudentResult| {
        b.percentage
            .partial_cmp(&a.percentage)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.roll_no.cmp(&b.roll_no))
    };
    present.sort_by(by_percentage);
    absent.sort_by(by_percentage);

    let offset = present.len() as i64;
    for (i, r) in present.iter_mut().enumerate() {
        r.rank = i as i64 + 1;
    }
    for (i, r) in absent.iter_mut().enumerate() {
        r.rank = offset + i as i64 + 1;
    }

    present.extend(absent);
    present
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedExam {
    pub exam_id: String,
    pub classroom_id: String,
    pub exam_name: String,
    pub student_count: usize,
    pub results: Vec<StudentResult>,
}

pub fn publish_exam(conn: &Connection, exam_id: &str) -> Result<PublishedExam, ApiError> {
    let exam = exam_row(conn, exam_id)?;
    ensure_not_declared(&exam)?;

    let aggregates = load_student_aggregates(conn, exam_id)?;
    let total_students = aggregates.len();
    let pending_students = aggregates.iter().filter(|a| a.pending_subjects > 0).count();
    if pending_students > 0 {
        let marked = total_students - pending_students;
        let completion = grading::round2(marked as f64 / total_students as f64 * 100.0);
        return Err(ApiError::unprocessable(
            "MARKING_INCOMPLETE",
            "every student must be fully marked or absent before results are generated",
        )
        .with_details(json!({
            "totalStudents": total_students,
            "markedStudents": marked,
            "pendingStudents": pending_students,
            "completionPercentage": completion,
        })));
    }

    let results = assign_results(aggregates);

    // Summaries first, declaration flag last: a reader never observes a
    // declared exam with missing summary rows.
    let tx = conn.unchecked_transaction()?;
    for r in &results {
        tx.execute(
            "INSERT INTO exam_summaries(id, exam_id, enrollment_id, total_marks, max_marks,
                                        percentage, grade, rank, is_absent)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(exam_id, enrollment_id) DO UPDATE SET
               total_marks = excluded.total_marks,
               max_marks = excluded.max_marks,
               percentage = excluded.percentage,
               grade = excluded.grade,
               rank = excluded.rank,
               is_absent = excluded.is_absent",
            (
                Uuid::new_v4().to_string(),
                exam_id,
                &r.enrollment_id,
                r.total_marks,
                r.max_marks,
                r.percentage,
                &r.grade,
                r.rank,
                r.is_absent as i64,
            ),
        )?;
    }
    tx.execute("UPDATE exams SET is_declared = 1 WHERE id = ?", [exam_id])?;
    tx.commit()?;

    Ok(PublishedExam {
        exam_id: exam_id.to_string(),
        classroom_id: exam.classroom_id,
        exam_name: exam.name,
        student_count: total_students,
        results,
    })
}

pub fn delete_exam(conn: &Connection, exam_id: &str) -> Result<(), ApiError> {
    let exam = exam_row(conn, exam_id)?;
    let summaries: i64 = conn.query_row(
        "SELECT COUNT(*) FROM exam_summaries WHERE exam_id = ?",
        [exam_id],
        |r| r.get(0),
    )?;
    if exam.is_declared || summaries > 0 {
        return Err(ApiError::conflict(
            "EXAM_HAS_RESULTS",
            "exam has generated results and cannot be deleted",
        ));
    }
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM exam_marks WHERE exam_id = ?", [exam_id])?;
    tx.execute("DELETE FROM exams WHERE id = ?", [exam_id])?;
    tx.commit()?;
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateExamInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

pub fn update_exam(conn: &Connection, exam_id: &str, input: &UpdateExamInput) -> Result<(), ApiError> {
    let exam = exam_row(conn, exam_id)?;
    ensure_not_declared(&exam)?;

    let name = input.name.clone().unwrap_or(exam.name);
    let start_date = input.start_date.clone().unwrap_or(exam.start_date);
    let end_date = input.end_date.clone().unwrap_or(exam.end_date);
    let start = parse_date("startDate", &start_date)?;
    let end = parse_date("endDate", &end_date)?;
    if end < start {
        return Err(ApiError::validation("endDate must not be before startDate")
            .with_details(json!({ "startDate": start_date, "endDate": end_date })));
    }

    conn.execute(
        "UPDATE exams SET name = ?, start_date = ?, end_date = ? WHERE id = ?",
        (&name, &start_date, &end_date, exam_id),
    )?;
    Ok(())
}
