use rusqlite::Connection;
use std::path::Path;

pub fn open_db(path: &Path) -> anyhow::Result<Connection> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    let conn = Connection::open(path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classrooms(
            id TEXT PRIMARY KEY,
            class TEXT NOT NULL,
            section TEXT NOT NULL,
            medium TEXT NOT NULL,
            session TEXT NOT NULL,
            UNIQUE(session, class, section, medium)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            guardian_phone TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            classroom_id TEXT NOT NULL,
            session TEXT NOT NULL,
            roll_no INTEGER NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
            UNIQUE(student_id, classroom_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_classroom ON enrollments(classroom_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_student ON enrollments(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_types(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL
        )",
        [],
    )?;
    seed_exam_types(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exams(
            id TEXT PRIMARY KEY,
            classroom_id TEXT NOT NULL,
            session TEXT NOT NULL,
            exam_type_id TEXT NOT NULL,
            name TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            is_declared INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
            FOREIGN KEY(exam_type_id) REFERENCES exam_types(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exams_classroom ON exams(classroom_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_marks(
            id TEXT PRIMARY KEY,
            exam_id TEXT NOT NULL,
            enrollment_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            max_marks REAL NOT NULL,
            marks_obtained REAL,
            is_absent INTEGER NOT NULL DEFAULT 0,
            remark TEXT,
            updated_by TEXT,
            updated_at TEXT,
            FOREIGN KEY(exam_id) REFERENCES exams(id),
            FOREIGN KEY(enrollment_id) REFERENCES enrollments(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            UNIQUE(exam_id, enrollment_id, subject_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_marks_exam ON exam_marks(exam_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_marks_enrollment ON exam_marks(enrollment_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_summaries(
            id TEXT PRIMARY KEY,
            exam_id TEXT NOT NULL,
            enrollment_id TEXT NOT NULL,
            total_marks REAL NOT NULL,
            max_marks REAL NOT NULL,
            percentage REAL NOT NULL,
            grade TEXT NOT NULL,
            rank INTEGER NOT NULL,
            is_absent INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(exam_id) REFERENCES exams(id),
            FOREIGN KEY(enrollment_id) REFERENCES enrollments(id),
            UNIQUE(exam_id, enrollment_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_summaries_exam ON exam_summaries(exam_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS daily_tests(
            id TEXT PRIMARY KEY,
            classroom_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            name TEXT NOT NULL,
            test_date TEXT NOT NULL,
            max_marks REAL NOT NULL,
            created_by TEXT,
            is_declared INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_daily_tests_classroom ON daily_tests(classroom_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS daily_test_marks(
            id TEXT PRIMARY KEY,
            test_id TEXT NOT NULL,
            enrollment_id TEXT NOT NULL,
            marks_obtained REAL,
            is_absent INTEGER NOT NULL DEFAULT 0,
            updated_by TEXT,
            updated_at TEXT,
            FOREIGN KEY(test_id) REFERENCES daily_tests(id),
            FOREIGN KEY(enrollment_id) REFERENCES enrollments(id),
            UNIQUE(test_id, enrollment_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_daily_test_marks_test ON daily_test_marks(test_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notifications(
            id TEXT PRIMARY KEY,
            template_id TEXT,
            title TEXT NOT NULL,
            body TEXT NOT NULL,
            data TEXT NOT NULL DEFAULT '{}',
            dispatch_mode TEXT NOT NULL,
            recipient_type TEXT NOT NULL,
            recipient_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            sent_at TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notifications_status ON notifications(status)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notifications_recipient
         ON notifications(recipient_type, recipient_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notification_failures(
            id TEXT PRIMARY KEY,
            notification_id TEXT NOT NULL,
            error_code TEXT NOT NULL,
            error_message TEXT NOT NULL,
            failed_at TEXT NOT NULL,
            FOREIGN KEY(notification_id) REFERENCES notifications(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notification_failures_notification
         ON notification_failures(notification_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS device_tokens(
            token TEXT PRIMARY KEY,
            platform TEXT NOT NULL,
            recipient_type TEXT NOT NULL,
            recipient_id TEXT NOT NULL,
            is_valid INTEGER NOT NULL DEFAULT 1,
            registered_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_device_tokens_recipient
         ON device_tokens(recipient_type, recipient_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notification_templates(
            id TEXT PRIMARY KEY,
            type TEXT NOT NULL UNIQUE,
            title_template TEXT NOT NULL,
            body_template TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS auth_tokens(
            token TEXT PRIMARY KEY,
            role TEXT NOT NULL,
            user_id TEXT NOT NULL,
            enrollment_id TEXT,
            classroom_id TEXT
        )",
        [],
    )?;

    Ok(conn)
}

fn seed_exam_types(conn: &Connection) -> anyhow::Result<()> {
    // Fresh databases get the standard set; existing codes are left alone.
    for (code, name) in [
        ("UNIT_TEST", "Unit Test"),
        ("MIDTERM", "Half Yearly Examination"),
        ("FINAL", "Final Examination"),
        ("ANNUAL", "Annual Examination"),
    ] {
        conn.execute(
            "INSERT OR IGNORE INTO exam_types(id, code, name) VALUES(?, ?, ?)",
            (uuid::Uuid::new_v4().to_string(), code, name),
        )?;
    }
    Ok(())
}
