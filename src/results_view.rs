//! Read projections over exams, marks and summaries: the admin exam
//! detail, the teacher rank list, and the per-student transcript.
//!
//! Every projection tolerates missing summary rows (results not yet
//! generated) and reports `rank: null` while still returning the
//! subject-level data.

use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::exam_engine::{exam_row, ExamRow};
use crate::grading;
use crate::http::error::ApiError;

#[derive(Debug, Clone)]
struct SubjectCell {
    subject_id: String,
    subject_name: String,
    max_marks: f64,
    marks_obtained: Option<f64>,
    is_absent: bool,
    remark: Option<String>,
}

#[derive(Debug, Clone)]
struct StudentMarks {
    enrollment_id: String,
    student_id: String,
    student_name: String,
    roll_no: i64,
    cells: Vec<SubjectCell>,
}

impl StudentMarks {
    fn absent_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_absent).count()
    }

    fn marked_count(&self) -> usize {
        self.cells
            .iter()
            .filter(|c| !c.is_absent && c.marks_obtained.is_some())
            .count()
    }

    fn pending_count(&self) -> usize {
        self.cells
            .iter()
            .filter(|c| !c.is_absent && c.marks_obtained.is_none())
            .count()
    }

    fn total_obtained(&self) -> f64 {
        self.cells
            .iter()
            .filter(|c| !c.is_absent)
            .filter_map(|c| c.marks_obtained)
            .sum()
    }

    fn total_max(&self) -> f64 {
        self.cells.iter().map(|c| c.max_marks).sum()
    }

    /// Overall marking status, most specific first.
    fn status(&self, has_summary: bool) -> &'static str {
        let total = self.cells.len();
        let absent = self.absent_count();
        let marked = self.marked_count();
        if total > 0 && absent == total {
            "absent"
        } else if absent > 0 && marked > 0 {
            "partial present"
        } else if has_summary || (marked > 0 && self.pending_count() == 0) {
            "completed"
        } else if marked > 0 {
            "partial"
        } else {
            "pending"
        }
    }
}

#[derive(Debug, Clone)]
struct SummaryRow {
    total_marks: f64,
    max_marks: f64,
    percentage: f64,
    grade: String,
    rank: i64,
    is_absent: bool,
}

fn load_matrix(conn: &Connection, exam_id: &str) -> Result<Vec<StudentMarks>, ApiError> {
    let mut stmt = conn.prepare(
        "SELECT m.enrollment_id, e.student_id, st.name, e.roll_no,
                m.subject_id, s.name, m.max_marks, m.marks_obtained, m.is_absent, m.remark
         FROM exam_marks m
         JOIN enrollments e ON e.id = m.enrollment_id
         JOIN students st ON st.id = e.student_id
         JOIN subjects s ON s.id = m.subject_id
         WHERE m.exam_id = ?
         ORDER BY e.roll_no, m.enrollment_id, s.name",
    )?;
    let rows = stmt
        .query_map([exam_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, i64>(3)?,
                SubjectCell {
                    subject_id: r.get(4)?,
                    subject_name: r.get(5)?,
                    max_marks: r.get(6)?,
                    marks_obtained: r.get(7)?,
                    is_absent: r.get::<_, i64>(8)? != 0,
                    remark: r.get(9)?,
                },
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut students: Vec<StudentMarks> = Vec::new();
    for (enrollment_id, student_id, student_name, roll_no, cell) in rows {
        match students.last_mut() {
            Some(last) if last.enrollment_id == enrollment_id => last.cells.push(cell),
            _ => students.push(StudentMarks {
                enrollment_id,
                student_id,
                student_name,
                roll_no,
                cells: vec![cell],
            }),
        }
    }
    Ok(students)
}

fn load_summaries(conn: &Connection, exam_id: &str) -> Result<HashMap<String, SummaryRow>, ApiError> {
    let mut stmt = conn.prepare(
        "SELECT enrollment_id, total_marks, max_marks, percentage, grade, rank, is_absent
         FROM exam_summaries WHERE exam_id = ?",
    )?;
    let rows = stmt
        .query_map([exam_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                SummaryRow {
                    total_marks: r.get(1)?,
                    max_marks: r.get(2)?,
                    percentage: r.get(3)?,
                    grade: r.get(4)?,
                    rank: r.get(5)?,
                    is_absent: r.get::<_, i64>(6)? != 0,
                },
            ))
        })?
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(rows)
}

fn exam_header(conn: &Connection, exam: &ExamRow) -> Result<Value, ApiError> {
    let exam_type: Option<String> = conn
        .query_row(
            "SELECT name FROM exam_types WHERE id = ?",
            [&exam.exam_type_id],
            |r| r.get(0),
        )
        .optional()?;
    let classroom: Option<(String, String, String)> = conn
        .query_row(
            "SELECT class, section, medium FROM classrooms WHERE id = ?",
            [&exam.classroom_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let (class, section, medium) = classroom.unwrap_or_default();
    Ok(json!({
        "examId": exam.id,
        "name": exam.name,
        "examType": exam_type,
        "session": exam.session,
        "classroomId": exam.classroom_id,
        "class": class,
        "section": section,
        "medium": medium,
        "startDate": exam.start_date,
        "endDate": exam.end_date,
        "isDeclared": exam.is_declared,
    }))
}

fn subject_cells_json(cells: &[SubjectCell]) -> Vec<Value> {
    cells
        .iter()
        .map(|c| {
            json!({
                "subjectId": c.subject_id,
                "subjectName": c.subject_name,
                "maxMarks": c.max_marks,
                "marksObtained": c.marks_obtained,
                "isAbsent": c.is_absent,
                "remark": c.remark,
            })
        })
        .collect()
}

/// Percentage/grade for one student, preferring the stored summary and
/// falling back to a live computation when the student is fully marked.
fn effective_result(student: &StudentMarks, summary: Option<&SummaryRow>) -> Option<(f64, String, bool)> {
    if let Some(s) = summary {
        return Some((s.percentage, s.grade.clone(), s.is_absent));
    }
    if student.pending_count() > 0 || student.cells.is_empty() {
        return None;
    }
    let all_absent = student.absent_count() == student.cells.len();
    let max = student.total_max();
    let percentage = if max > 0.0 {
        grading::round2(student.total_obtained() / max * 100.0)
    } else {
        0.0
    };
    Some((
        percentage,
        grading::grade_for(percentage, all_absent).to_string(),
        all_absent,
    ))
}

/// Admin projection: header, per-subject marking progress, per-student
/// transcripts and aggregate statistics.
pub fn exam_detail(conn: &Connection, exam_id: &str) -> Result<Value, ApiError> {
    let exam = exam_row(conn, exam_id)?;
    let students = load_matrix(conn, exam_id)?;
    let summaries = load_summaries(conn, exam_id)?;

    // Per-subject progress across the whole classroom.
    let mut subject_progress: Vec<(String, String, f64, usize, usize, usize)> = Vec::new();
    for student in &students {
        for cell in &student.cells {
            let idx = match subject_progress.iter().position(|s| s.0 == cell.subject_id) {
                Some(i) => i,
                None => {
                    subject_progress.push((
                        cell.subject_id.clone(),
                        cell.subject_name.clone(),
                        cell.max_marks,
                        0,
                        0,
                        0,
                    ));
                    subject_progress.len() - 1
                }
            };
            let entry = &mut subject_progress[idx];
            if cell.is_absent {
                entry.4 += 1;
            } else if cell.marks_obtained.is_some() {
                entry.3 += 1;
            } else {
                entry.5 += 1;
            }
        }
    }

    let mut graded = 0usize;
    let mut absent_students = 0usize;
    let mut pending_students = 0usize;
    let mut totals: Vec<f64> = Vec::new();
    let mut passed = 0usize;
    let mut assessed = 0usize;
    let mut grade_distribution: HashMap<String, usize> = HashMap::new();

    let student_rows: Vec<Value> = students
        .iter()
        .map(|student| {
            let summary = summaries.get(&student.enrollment_id);
            let status = student.status(summary.is_some());
            if summary.is_some() {
                graded += 1;
            }
            if status == "absent" {
                absent_students += 1;
            }
            if student.pending_count() > 0 {
                pending_students += 1;
            }
            if let Some((percentage, grade, all_absent)) = effective_result(student, summary) {
                totals.push(student.total_obtained());
                *grade_distribution.entry(grade.clone()).or_insert(0) += 1;
                if !all_absent {
                    assessed += 1;
                    if grading::is_pass(percentage) {
                        passed += 1;
                    }
                }
            }
            json!({
                "enrollmentId": student.enrollment_id,
                "studentId": student.student_id,
                "studentName": student.student_name,
                "rollNo": student.roll_no,
                "status": status,
                "subjects": subject_cells_json(&student.cells),
                "totalMarks": student.total_obtained(),
                "maxMarks": student.total_max(),
                "percentage": summary.map(|s| s.percentage),
                "grade": summary.map(|s| s.grade.clone()),
                "rank": summary.map(|s| s.rank),
            })
        })
        .collect();

    let average_total = if totals.is_empty() {
        0.0
    } else {
        grading::round2(totals.iter().sum::<f64>() / totals.len() as f64)
    };
    let highest_total = totals.iter().cloned().fold(0.0, f64::max);
    let pass_rate = if assessed > 0 {
        grading::round2(passed as f64 / assessed as f64 * 100.0)
    } else {
        0.0
    };

    Ok(json!({
        "exam": exam_header(conn, &exam)?,
        "subjectProgress": subject_progress
            .iter()
            .map(|(id, name, max, marked, absent, pending)| json!({
                "subjectId": id,
                "subjectName": name,
                "maxMarks": max,
                "markedCount": marked,
                "absentCount": absent,
                "pendingCount": pending,
            }))
            .collect::<Vec<_>>(),
        "students": student_rows,
        "statistics": {
            "totalStudents": students.len(),
            "gradedStudents": graded,
            "absentStudents": absent_students,
            "pendingStudents": pending_students,
            "averageTotal": average_total,
            "highestTotal": highest_total,
            "passRate": pass_rate,
            "gradeDistribution": grade_distribution,
        },
    }))
}

/// Teacher projection: present students by stored rank, absent (or
/// unranked) students after them with `rank: null`.
pub fn rank_list(conn: &Connection, exam_id: &str) -> Result<Value, ApiError> {
    let exam = exam_row(conn, exam_id)?;
    let students = load_matrix(conn, exam_id)?;
    let summaries = load_summaries(conn, exam_id)?;

    let mut present: Vec<Value> = Vec::new();
    let mut unranked: Vec<Value> = Vec::new();
    for student in &students {
        let summary = summaries.get(&student.enrollment_id);
        let row = json!({
            "enrollmentId": student.enrollment_id,
            "studentId": student.student_id,
            "studentName": student.student_name,
            "rollNo": student.roll_no,
            "subjects": subject_cells_json(&student.cells),
            "totalMarks": summary.map(|s| s.total_marks).unwrap_or_else(|| student.total_obtained()),
            "maxMarks": summary.map(|s| s.max_marks).unwrap_or_else(|| student.total_max()),
            "percentage": summary.map(|s| s.percentage),
            "grade": summary.map(|s| s.grade.clone()),
            "rank": match summary {
                Some(s) if !s.is_absent => json!(s.rank),
                _ => Value::Null,
            },
            "isAbsent": summary.map(|s| s.is_absent).unwrap_or(false),
        });
        match summary {
            Some(s) if !s.is_absent => present.push(row),
            _ => unranked.push(row),
        }
    }
    present.sort_by_key(|r| r.get("rank").and_then(|v| v.as_i64()).unwrap_or(i64::MAX));
    present.extend(unranked);

    Ok(json!({
        "exam": exam_header(conn, &exam)?,
        "students": present,
    }))
}

/// Student projection: one enrollment's transcript for one exam.
pub fn student_transcript(
    conn: &Connection,
    exam_id: &str,
    enrollment_id: &str,
) -> Result<Value, ApiError> {
    let exam = exam_row(conn, exam_id)?;
    let students = load_matrix(conn, exam_id)?;
    let Some(student) = students.iter().find(|s| s.enrollment_id == enrollment_id) else {
        return Err(ApiError::not_found(
            "STUDENT_NOT_FOUND",
            "student has no marks for this exam",
        ));
    };
    let summaries = load_summaries(conn, exam_id)?;
    let summary = summaries.get(enrollment_id);

    let attendance = if student.absent_count() == student.cells.len() && !student.cells.is_empty() {
        "Absent"
    } else if student.absent_count() > 0 {
        "Partial Present"
    } else {
        "Present"
    };

    Ok(json!({
        "exam": exam_header(conn, &exam)?,
        "rollNo": student.roll_no,
        "studentName": student.student_name,
        "attendance": attendance,
        "subjects": student.cells.iter().map(|c| json!({
            "subjectId": c.subject_id,
            "subjectName": c.subject_name,
            "marksObtained": c.marks_obtained,
            "maxMarks": c.max_marks,
            "teacherRemark": c.remark,
            "isAbsent": c.is_absent,
        })).collect::<Vec<_>>(),
        "totalMarks": summary.map(|s| s.total_marks).unwrap_or_else(|| student.total_obtained()),
        "maxMarks": summary.map(|s| s.max_marks).unwrap_or_else(|| student.total_max()),
        "percentage": summary.map(|s| s.percentage),
        "grade": summary.map(|s| s.grade.clone()),
        "rank": match summary {
            Some(s) if !s.is_absent => json!(s.rank),
            _ => Value::Null,
        },
    }))
}
