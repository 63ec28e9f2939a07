use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use uuid::Uuid;

use crate::auth;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("nodues.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL,
            department TEXT NOT NULL,
            class_section TEXT,
            year INTEGER,
            semester INTEGER,
            roll_number TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_role_dept ON users(role, department)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            department TEXT NOT NULL,
            year INTEGER NOT NULL,
            semester INTEGER NOT NULL,
            section TEXT NOT NULL,
            class_advisor_id TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(class_advisor_id) REFERENCES users(id),
            UNIQUE(department, year, semester, section)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_department ON classes(department)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT NOT NULL,
            department TEXT NOT NULL,
            semester INTEGER NOT NULL,
            credits INTEGER NOT NULL,
            class_id TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            UNIQUE(code, department)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_dept_sem ON subjects(department, semester)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_class ON subjects(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS staff_subjects(
            id TEXT PRIMARY KEY,
            staff_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(staff_id) REFERENCES users(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            UNIQUE(staff_id, subject_id, class_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_staff_subjects_staff ON staff_subjects(staff_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS no_due_status(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            status TEXT NOT NULL,
            approved_by TEXT,
            remarks TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            UNIQUE(student_id, subject_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_no_due_status_student ON no_due_status(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_no_due_status_subject ON no_due_status(subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS final_approvals(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL,
            approved_by TEXT,
            remarks TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES users(id)
        )",
        [],
    )?;

    Ok(conn)
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
    pub department: String,
    pub class_section: Option<String>,
    pub year: Option<i64>,
    pub semester: Option<i64>,
    pub roll_number: Option<String>,
}

fn user_from_row(row: &rusqlite::Row) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        role: row.get(3)?,
        department: row.get(4)?,
        class_section: row.get(5)?,
        year: row.get(6)?,
        semester: row.get(7)?,
        roll_number: row.get(8)?,
    })
}

const USER_COLUMNS: &str =
    "id, name, email, role, department, class_section, year, semester, roll_number";

pub fn user_by_id(conn: &Connection, user_id: &str) -> rusqlite::Result<Option<UserRow>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"),
        [user_id],
        user_from_row,
    )
    .optional()
}

pub fn user_by_email(
    conn: &Connection,
    email: &str,
) -> rusqlite::Result<Option<(UserRow, String)>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS}, password_hash FROM users WHERE email = ?"),
        [email],
        |row| Ok((user_from_row(row)?, row.get(9)?)),
    )
    .optional()
}

#[derive(Debug, Clone)]
pub struct ClassRow {
    pub id: String,
    pub name: String,
    pub department: String,
    pub year: i64,
    pub semester: i64,
    pub section: String,
    pub class_advisor_id: Option<String>,
}

pub fn class_by_id(conn: &Connection, class_id: &str) -> rusqlite::Result<Option<ClassRow>> {
    conn.query_row(
        "SELECT id, name, department, year, semester, section, class_advisor_id
         FROM classes WHERE id = ?",
        [class_id],
        |row| {
            Ok(ClassRow {
                id: row.get(0)?,
                name: row.get(1)?,
                department: row.get(2)?,
                year: row.get(3)?,
                semester: row.get(4)?,
                section: row.get(5)?,
                class_advisor_id: row.get(6)?,
            })
        },
    )
    .optional()
}

#[derive(Debug, Clone)]
pub struct SubjectRow {
    pub id: String,
    pub name: String,
    pub code: String,
    pub department: String,
    pub semester: i64,
    pub credits: i64,
    pub class_id: Option<String>,
}

pub fn subject_by_id(conn: &Connection, subject_id: &str) -> rusqlite::Result<Option<SubjectRow>> {
    conn.query_row(
        "SELECT id, name, code, department, semester, credits, class_id
         FROM subjects WHERE id = ?",
        [subject_id],
        |row| {
            Ok(SubjectRow {
                id: row.get(0)?,
                name: row.get(1)?,
                code: row.get(2)?,
                department: row.get(3)?,
                semester: row.get(4)?,
                credits: row.get(5)?,
                class_id: row.get(6)?,
            })
        },
    )
    .optional()
}

/// Idempotent starter data: one HOD account, four CSE classes and the
/// semester-1 subject list. Safe to call on a populated workspace.
pub fn seed_demo(conn: &Connection) -> anyhow::Result<()> {
    let now = now_rfc3339();

    let has_hod: Option<i64> = conn
        .query_row("SELECT 1 FROM users WHERE role = 'hod' LIMIT 1", [], |r| {
            r.get(0)
        })
        .optional()?;
    if has_hod.is_none() {
        conn.execute(
            "INSERT INTO users(id, name, email, password_hash, role, department,
                               class_section, year, semester, roll_number, created_at)
             VALUES(?, ?, ?, ?, 'hod', 'CSE', 'A', NULL, NULL, NULL, ?)",
            (
                Uuid::new_v4().to_string(),
                "Dr. John Smith",
                "hod@college.edu",
                auth::hash_password("password123")?,
                &now,
            ),
        )?;
    }

    let has_class: Option<i64> = conn
        .query_row("SELECT 1 FROM classes LIMIT 1", [], |r| r.get(0))
        .optional()?;
    if has_class.is_none() {
        let classes = [
            ("CSE 1st Year Section A", 1i64, 1i64, "A"),
            ("CSE 1st Year Section B", 1, 1, "B"),
            ("CSE 2nd Year Section A", 2, 3, "A"),
            ("CSE 2nd Year Section B", 2, 3, "B"),
        ];
        for (name, year, semester, section) in classes {
            conn.execute(
                "INSERT INTO classes(id, name, department, year, semester, section,
                                     class_advisor_id, created_at)
                 VALUES(?, ?, 'CSE', ?, ?, ?, NULL, ?)",
                (
                    Uuid::new_v4().to_string(),
                    name,
                    year,
                    semester,
                    section,
                    &now,
                ),
            )?;
        }
    }

    let has_subject: Option<i64> = conn
        .query_row("SELECT 1 FROM subjects LIMIT 1", [], |r| r.get(0))
        .optional()?;
    if has_subject.is_none() {
        let first_class: Option<String> = conn
            .query_row("SELECT id FROM classes ORDER BY rowid LIMIT 1", [], |r| {
                r.get(0)
            })
            .optional()?;
        let subjects = [
            ("Mathematics", "MATH101", 4i64),
            ("Physics", "PHY101", 3),
            ("Chemistry", "CHEM101", 3),
            ("Programming", "CS101", 4),
            ("English", "ENG101", 2),
        ];
        for (name, code, credits) in subjects {
            conn.execute(
                "INSERT INTO subjects(id, name, code, department, semester, credits,
                                      class_id, created_at)
                 VALUES(?, ?, ?, 'CSE', 1, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    name,
                    code,
                    credits,
                    &first_class,
                    &now,
                ),
            )?;
        }
    }

    Ok(())
}
