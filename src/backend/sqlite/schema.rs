use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

use crate::backend::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Text,
    Integer,
    Real,
    Bool,
    Json,
}

/// Value the service assigns when an insert leaves the column out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    Uuid,
    Now,
    Today,
    Bool(bool),
    Int(i64),
    Text(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub kind: Kind,
    pub fill: Option<Fill>,
}

const fn col(name: &'static str, kind: Kind) -> Column {
    Column {
        name,
        kind,
        fill: None,
    }
}

const fn filled(name: &'static str, kind: Kind, fill: Fill) -> Column {
    Column {
        name,
        kind,
        fill: Some(fill),
    }
}

const ID: Column = filled("id", Kind::Text, Fill::Uuid);
const CREATED_AT: Column = filled("created_at", Kind::Text, Fill::Now);
const UPDATED_AT: Column = filled("updated_at", Kind::Text, Fill::Now);

const PROFILES: &[Column] = &[
    col("id", Kind::Text),
    col("full_name", Kind::Text),
    col("phone", Kind::Text),
    filled("role", Kind::Text, Fill::Text("student")),
    col("institution_id", Kind::Text),
    col("avatar_url", Kind::Text),
    CREATED_AT,
    UPDATED_AT,
];

const INSTITUTIONS: &[Column] = &[
    ID,
    col("name", Kind::Text),
    col("address", Kind::Text),
    col("phone", Kind::Text),
    col("email", Kind::Text),
    col("owner_id", Kind::Text),
    CREATED_AT,
    UPDATED_AT,
];

const CLASSES: &[Column] = &[
    ID,
    col("name", Kind::Text),
    col("subject", Kind::Text),
    col("description", Kind::Text),
    col("teacher_id", Kind::Text),
    col("institution_id", Kind::Text),
    col("room_code", Kind::Text),
    col("schedule", Kind::Text),
    filled("is_active", Kind::Bool, Fill::Bool(true)),
    CREATED_AT,
    UPDATED_AT,
];

const CLASS_ENROLLMENTS: &[Column] = &[
    ID,
    col("student_id", Kind::Text),
    col("class_id", Kind::Text),
    filled("enrolled_at", Kind::Text, Fill::Now),
    filled("is_active", Kind::Bool, Fill::Bool(true)),
];

const ATTENDANCE_RECORDS: &[Column] = &[
    ID,
    col("student_id", Kind::Text),
    col("class_id", Kind::Text),
    filled("date", Kind::Text, Fill::Today),
    col("status", Kind::Text),
    col("marked_by", Kind::Text),
    col("notes", Kind::Text),
    filled("marked_at", Kind::Text, Fill::Now),
];

const RESOURCES: &[Column] = &[
    ID,
    col("title", Kind::Text),
    col("description", Kind::Text),
    col("type", Kind::Text),
    col("url", Kind::Text),
    col("file_size", Kind::Integer),
    col("class_id", Kind::Text),
    col("uploaded_by", Kind::Text),
    filled("uploaded_at", Kind::Text, Fill::Now),
];

const TESTS: &[Column] = &[
    ID,
    col("title", Kind::Text),
    col("description", Kind::Text),
    col("type", Kind::Text),
    col("class_id", Kind::Text),
    col("created_by", Kind::Text),
    filled("total_marks", Kind::Integer, Fill::Int(0)),
    col("duration_minutes", Kind::Integer),
    col("start_time", Kind::Text),
    col("end_time", Kind::Text),
    filled("is_published", Kind::Bool, Fill::Bool(false)),
    CREATED_AT,
    UPDATED_AT,
];

const TEST_QUESTIONS: &[Column] = &[
    ID,
    col("test_id", Kind::Text),
    col("question_text", Kind::Text),
    col("type", Kind::Text),
    filled("marks", Kind::Integer, Fill::Int(1)),
    col("options", Kind::Json),
    col("correct_answer", Kind::Text),
    filled("order_index", Kind::Integer, Fill::Int(0)),
    CREATED_AT,
];

const TEST_SUBMISSIONS: &[Column] = &[
    ID,
    col("test_id", Kind::Text),
    col("student_id", Kind::Text),
    col("answers", Kind::Json),
    col("score", Kind::Real),
    filled("submitted_at", Kind::Text, Fill::Now),
];

const CO_TEACHERS: &[Column] = &[
    ID,
    col("class_id", Kind::Text),
    col("teacher_id", Kind::Text),
    col("added_by", Kind::Text),
    col("permissions", Kind::Json),
    filled("added_at", Kind::Text, Fill::Now),
];

const NOTIFICATIONS: &[Column] = &[
    ID,
    col("title", Kind::Text),
    col("message", Kind::Text),
    filled("type", Kind::Text, Fill::Text("general")),
    col("recipient_id", Kind::Text),
    col("class_id", Kind::Text),
    filled("is_read", Kind::Bool, Fill::Bool(false)),
    CREATED_AT,
];

pub fn columns(table: Table) -> &'static [Column] {
    match table {
        Table::Profiles => PROFILES,
        Table::Institutions => INSTITUTIONS,
        Table::Classes => CLASSES,
        Table::ClassEnrollments => CLASS_ENROLLMENTS,
        Table::AttendanceRecords => ATTENDANCE_RECORDS,
        Table::Resources => RESOURCES,
        Table::Tests => TESTS,
        Table::TestQuestions => TEST_QUESTIONS,
        Table::TestSubmissions => TEST_SUBMISSIONS,
        Table::CoTeachers => CO_TEACHERS,
        Table::Notifications => NOTIFICATIONS,
    }
}

pub fn open_db(path: &Path) -> anyhow::Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS auth_users(
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            email_confirmed_at TEXT,
            confirmation_token TEXT,
            user_metadata TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS auth_sessions(
            access_token TEXT PRIMARY KEY,
            refresh_token TEXT NOT NULL UNIQUE,
            user_id TEXT NOT NULL,
            expires_at INTEGER NOT NULL,
            FOREIGN KEY(user_id) REFERENCES auth_users(id) ON DELETE CASCADE
        )",
        [],
    )?;
    // Client-side persisted state (current session, service key).
    conn.execute(
        "CREATE TABLE IF NOT EXISTS client_state(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS institutions(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            address TEXT,
            phone TEXT,
            email TEXT,
            owner_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS profiles(
            id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL,
            phone TEXT,
            role TEXT NOT NULL CHECK(role IN ('admin', 'teacher', 'student')),
            institution_id TEXT,
            avatar_url TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(id) REFERENCES auth_users(id) ON DELETE CASCADE,
            FOREIGN KEY(institution_id) REFERENCES institutions(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_profiles_institution ON profiles(institution_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            subject TEXT NOT NULL,
            description TEXT,
            teacher_id TEXT NOT NULL,
            institution_id TEXT NOT NULL,
            room_code TEXT NOT NULL,
            schedule TEXT,
            is_active INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES profiles(id),
            FOREIGN KEY(institution_id) REFERENCES institutions(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_teacher ON classes(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_enrollments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            enrolled_at TEXT NOT NULL,
            is_active INTEGER NOT NULL,
            FOREIGN KEY(student_id) REFERENCES profiles(id),
            FOREIGN KEY(class_id) REFERENCES classes(id) ON DELETE CASCADE,
            UNIQUE(student_id, class_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_enrollments_class ON class_enrollments(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('present', 'absent', 'late')),
            marked_by TEXT,
            notes TEXT,
            marked_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES profiles(id),
            FOREIGN KEY(class_id) REFERENCES classes(id) ON DELETE CASCADE,
            FOREIGN KEY(marked_by) REFERENCES profiles(id),
            UNIQUE(student_id, class_id, date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_records_class_date ON attendance_records(class_id, date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS resources(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT,
            type TEXT NOT NULL CHECK(type IN ('pdf', 'image', 'link', 'video')),
            url TEXT NOT NULL,
            file_size INTEGER,
            class_id TEXT NOT NULL,
            uploaded_by TEXT NOT NULL,
            uploaded_at TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id) ON DELETE CASCADE,
            FOREIGN KEY(uploaded_by) REFERENCES profiles(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tests(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT,
            type TEXT NOT NULL CHECK(type IN ('mcq', 'subjective', 'mixed')),
            class_id TEXT NOT NULL,
            created_by TEXT NOT NULL,
            total_marks INTEGER NOT NULL,
            duration_minutes INTEGER,
            start_time TEXT,
            end_time TEXT,
            is_published INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id) ON DELETE CASCADE,
            FOREIGN KEY(created_by) REFERENCES profiles(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS test_questions(
            id TEXT PRIMARY KEY,
            test_id TEXT NOT NULL,
            question_text TEXT NOT NULL,
            type TEXT NOT NULL CHECK(type IN ('mcq', 'subjective')),
            marks INTEGER NOT NULL,
            options TEXT,
            correct_answer TEXT,
            order_index INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(test_id) REFERENCES tests(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS test_submissions(
            id TEXT PRIMARY KEY,
            test_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            answers TEXT NOT NULL,
            score REAL,
            submitted_at TEXT NOT NULL,
            FOREIGN KEY(test_id) REFERENCES tests(id) ON DELETE CASCADE,
            FOREIGN KEY(student_id) REFERENCES profiles(id),
            UNIQUE(test_id, student_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS co_teachers(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            added_by TEXT NOT NULL,
            permissions TEXT NOT NULL,
            added_at TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id) ON DELETE CASCADE,
            FOREIGN KEY(teacher_id) REFERENCES profiles(id),
            UNIQUE(class_id, teacher_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notifications(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            message TEXT NOT NULL,
            type TEXT NOT NULL,
            recipient_id TEXT NOT NULL,
            class_id TEXT,
            is_read INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(recipient_id) REFERENCES profiles(id) ON DELETE CASCADE,
            FOREIGN KEY(class_id) REFERENCES classes(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notifications_recipient ON notifications(recipient_id, created_at)",
        [],
    )?;

    Ok(())
}

pub fn state_get(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM client_state WHERE key = ?",
        [key],
        |r| r.get(0),
    )
    .optional()
}

pub fn state_set(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO client_state(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, value),
    )?;
    Ok(())
}

pub fn state_clear(conn: &Connection, key: &str) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM client_state WHERE key = ?", [key])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_declared_column_exists_in_its_table() {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("schema");
        for table in Table::ALL {
            let mut stmt = conn
                .prepare(&format!("PRAGMA table_info({})", table.name()))
                .expect("pragma");
            let names: Vec<String> = stmt
                .query_map([], |r| r.get::<_, String>(1))
                .and_then(|it| it.collect())
                .expect("columns");
            for c in columns(table) {
                assert!(
                    names.iter().any(|n| n == c.name),
                    "{}.{} not in schema",
                    table.name(),
                    c.name
                );
            }
            assert_eq!(names.len(), columns(table).len(), "{}", table.name());
        }
    }

    #[test]
    fn init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("first");
        init_schema(&conn).expect("second");
        state_set(&conn, "k", "v1").expect("set");
        state_set(&conn, "k", "v2").expect("overwrite");
        assert_eq!(state_get(&conn, "k").expect("get").as_deref(), Some("v2"));
        state_clear(&conn, "k").expect("clear");
        assert_eq!(state_get(&conn, "k").expect("get"), None);
    }
}
