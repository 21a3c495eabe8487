use crate::calc::GradeSettings;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "registrar.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            description TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            email TEXT,
            password_sha256 TEXT NOT NULL,
            role TEXT NOT NULL,
            position TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            description TEXT,
            teacher_id TEXT,
            course_id TEXT NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES users(id),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_course ON subjects(course_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_teacher ON subjects(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            student_id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL,
            email TEXT,
            course_id TEXT NOT NULL,
            year_level INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            enrolled_on TEXT,
            updated_at TEXT,
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    ensure_students_updated_at(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_course ON students(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            requested_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(student_id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            UNIQUE(student_id, subject_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_student ON enrollments(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_subject ON enrollments(subject_id)",
        [],
    )?;

    // One grade record per enrollment. Component scores are NULL until
    // entered; a NULL is "pending", never an implicit zero. Component-mode
    // final scores are not stored: they are derived on read from current
    // settings, so a settings change can never leave stale numbers behind.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            enrollment_id TEXT PRIMARY KEY,
            mode TEXT NOT NULL DEFAULT 'component',
            quiz REAL,
            activity REAL,
            exam REAL,
            legacy_grade REAL,
            quiz_weight REAL,
            activity_weight REAL,
            exam_weight REAL,
            updated_at TEXT,
            FOREIGN KEY(enrollment_id) REFERENCES enrollments(id)
        )",
        [],
    )?;
    ensure_grades_weight_columns(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_audit(
            id TEXT PRIMARY KEY,
            enrollment_id TEXT NOT NULL,
            field TEXT NOT NULL,
            old_value REAL,
            new_value REAL,
            changed_by TEXT NOT NULL,
            changed_at TEXT NOT NULL,
            FOREIGN KEY(enrollment_id) REFERENCES enrollments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_audit_enrollment ON grade_audit(enrollment_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

fn ensure_students_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

// Early workspaces carried only the global weights; per-record overrides
// came later.
fn ensure_grades_weight_columns(conn: &Connection) -> anyhow::Result<()> {
    for col in ["quiz_weight", "activity_weight", "exam_weight"] {
        if !table_has_column(conn, "grades", col)? {
            conn.execute(
                &format!("ALTER TABLE grades ADD COLUMN {} REAL", col),
                [],
            )?;
        }
    }
    Ok(())
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    let text = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, &text),
    )?;
    Ok(())
}

pub const GRADING_SETTINGS_KEY: &str = "grading";
pub const REGISTRATION_SETTINGS_KEY: &str = "registration";
pub const DEFAULT_STUDENT_ID_LENGTH: usize = 8;

/// Active grading parameters; defaults apply when nothing is persisted.
pub fn load_grade_settings(conn: &Connection) -> anyhow::Result<GradeSettings> {
    match settings_get_json(conn, GRADING_SETTINGS_KEY)? {
        Some(v) => Ok(serde_json::from_value(v)?),
        None => Ok(GradeSettings::default()),
    }
}

pub fn save_grade_settings(conn: &Connection, settings: &GradeSettings) -> anyhow::Result<()> {
    settings_set_json(conn, GRADING_SETTINGS_KEY, &serde_json::to_value(settings)?)
}

/// Configured public student-id length, default 8 digits.
pub fn student_id_length(conn: &Connection) -> anyhow::Result<usize> {
    let Some(v) = settings_get_json(conn, REGISTRATION_SETTINGS_KEY)? else {
        return Ok(DEFAULT_STUDENT_ID_LENGTH);
    };
    Ok(v.get("idLength")
        .and_then(|n| n.as_u64())
        .map(|n| n as usize)
        .unwrap_or(DEFAULT_STUDENT_ID_LENGTH))
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
