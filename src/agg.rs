//! Read-only derivation layer over the clearance collections. Nothing in
//! here mutates the store; every function returns a well-formed (possibly
//! zeroed/empty) structure on lookup misses.

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;

use crate::db::{self, ClassRow, UserRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueStatus {
    Pending,
    Approved,
    Rejected,
}

impl DueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DueStatus::Pending => "pending",
            DueStatus::Approved => "approved",
            DueStatus::Rejected => "rejected",
        }
    }

    /// Writes validate before storing, so anything else in the column is
    /// treated as pending rather than rejected.
    pub fn from_db(s: &str) -> DueStatus {
        match s {
            "approved" => DueStatus::Approved,
            "rejected" => DueStatus::Rejected,
            _ => DueStatus::Pending,
        }
    }
}

/// True iff every entry is an existing `approved` record. A missing record
/// (`None`) counts as not-approved; short-circuits on the first miss.
/// Vacuously true over an empty scope -- final-eligibility semantics.
pub fn all_approved<I>(statuses: I) -> bool
where
    I: IntoIterator<Item = Option<DueStatus>>,
{
    statuses
        .into_iter()
        .all(|s| matches!(s, Some(DueStatus::Approved)))
}

/// Completion fold for class statistics: zero subjects can never be fully
/// cleared, so an empty scope is false, not vacuously true.
pub fn dues_cleared<I>(statuses: I) -> bool
where
    I: IntoIterator<Item = Option<DueStatus>>,
{
    let mut any = false;
    for s in statuses {
        if !matches!(s, Some(DueStatus::Approved)) {
            return false;
        }
        any = true;
    }
    any
}

/// Stored timestamps are RFC 3339; the dashboards show minute precision.
pub fn fmt_minute(ts: &str) -> Option<String> {
    chrono::DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
}

fn fmt_minute_opt(ts: Option<String>) -> Option<String> {
    ts.as_deref().and_then(fmt_minute)
}

fn subject_ids_in_scope(
    conn: &Connection,
    department: &str,
    semester: Option<i64>,
) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM subjects WHERE department = ? AND semester = ? ORDER BY rowid",
    )?;
    let ids = stmt
        .query_map((department, semester), |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Per-subject status rows for one student, keyed by subject id and limited
/// to the student's (department, semester) scope.
fn student_status_map(
    conn: &Connection,
    student_id: &str,
    department: &str,
    semester: Option<i64>,
) -> rusqlite::Result<HashMap<String, DueStatus>> {
    let mut stmt = conn.prepare(
        "SELECT n.subject_id, n.status
         FROM no_due_status n
         JOIN subjects s ON s.id = n.subject_id
         WHERE n.student_id = ? AND s.department = ? AND s.semester = ?",
    )?;
    let rows = stmt.query_map((student_id, department, semester), |row| {
        let subject_id: String = row.get(0)?;
        let status: String = row.get(1)?;
        Ok((subject_id, DueStatus::from_db(&status)))
    })?;
    rows.collect()
}

fn students_in_class_scope(conn: &Connection, class: &ClassRow) -> rusqlite::Result<Vec<UserRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, email, role, department, class_section, year, semester, roll_number
         FROM users
         WHERE role = 'student' AND department = ? AND year = ? AND semester = ?
           AND class_section = ?
         ORDER BY rowid",
    )?;
    let rows = stmt.query_map(
        (&class.department, class.year, class.semester, &class.section),
        |row| {
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
        },
    )?;
    rows.collect()
}

fn total_subjects(
    conn: &Connection,
    department: &str,
    semester: Option<i64>,
) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM subjects WHERE department = ? AND semester = ?",
        (department, semester),
        |r| r.get(0),
    )
}

/// Approved-status count scoped to the student's own subject set, so it can
/// never exceed `total_subjects` even after a semester change.
fn approved_subjects(
    conn: &Connection,
    student: &UserRow,
) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*)
         FROM no_due_status n
         JOIN subjects s ON s.id = n.subject_id
         WHERE n.student_id = ? AND n.status = 'approved'
           AND s.department = ? AND s.semester = ?",
        (&student.id, &student.department, student.semester),
        |r| r.get(0),
    )
}

struct FinalRow {
    status: String,
    remarks: Option<String>,
    updated_at: String,
}

fn final_approval(conn: &Connection, student_id: &str) -> rusqlite::Result<Option<FinalRow>> {
    conn.query_row(
        "SELECT status, remarks, updated_at FROM final_approvals WHERE student_id = ?",
        [student_id],
        |row| {
            Ok(FinalRow {
                status: row.get(0)?,
                remarks: row.get(1)?,
                updated_at: row.get(2)?,
            })
        },
    )
    .optional()
}

#[derive(Debug, Clone, Serialize)]
pub struct SubjectView {
    pub id: String,
    pub name: String,
    pub status: String,
    pub remarks: Option<String>,
    pub updated_at: Option<String>,
}

/// One row per subject in the student's (department, semester) scope, in
/// subject insertion order; missing status rows read as pending.
pub fn student_subject_view(
    conn: &Connection,
    student: &UserRow,
) -> rusqlite::Result<Vec<SubjectView>> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.name, n.status, n.remarks, n.updated_at
         FROM subjects s
         LEFT JOIN no_due_status n
           ON n.subject_id = s.id AND n.student_id = ?1
         WHERE s.department = ?2 AND s.semester = ?3
         ORDER BY s.rowid",
    )?;
    let rows = stmt.query_map(
        (&student.id, &student.department, student.semester),
        |row| {
            let status: Option<String> = row.get(2)?;
            let updated_at: Option<String> = row.get(4)?;
            Ok(SubjectView {
                id: row.get(0)?,
                name: row.get(1)?,
                status: status.unwrap_or_else(|| "pending".to_string()),
                remarks: row.get(3)?,
                updated_at: fmt_minute_opt(updated_at),
            })
        },
    )?;
    rows.collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct FinalEligibility {
    pub can_request: bool,
    pub status: Option<String>,
    pub remarks: Option<String>,
    pub updated_at: Option<String>,
}

pub fn student_final_eligibility(
    conn: &Connection,
    student: &UserRow,
) -> rusqlite::Result<FinalEligibility> {
    let existing = final_approval(conn, &student.id)?;
    let subject_ids = subject_ids_in_scope(conn, &student.department, student.semester)?;
    let statuses = student_status_map(conn, &student.id, &student.department, student.semester)?;

    let cleared = all_approved(subject_ids.iter().map(|sid| statuses.get(sid).copied()));

    Ok(FinalEligibility {
        can_request: cleared && existing.is_none(),
        status: existing.as_ref().map(|f| f.status.clone()),
        remarks: existing.as_ref().and_then(|f| f.remarks.clone()),
        updated_at: existing.and_then(|f| fmt_minute(&f.updated_at)),
    })
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClassStatistics {
    pub total_students: i64,
    pub completed_dues: i64,
    pub pending_dues: i64,
}

pub fn class_statistics(conn: &Connection, class_id: &str) -> anyhow::Result<ClassStatistics> {
    let Some(class) = db::class_by_id(conn, class_id)? else {
        return Ok(ClassStatistics::default());
    };

    let students = students_in_class_scope(conn, &class)?;
    let subject_ids = subject_ids_in_scope(conn, &class.department, Some(class.semester))?;

    let mut completed = 0i64;
    for student in &students {
        let statuses =
            student_status_map(conn, &student.id, &class.department, Some(class.semester))?;
        if dues_cleared(subject_ids.iter().map(|sid| statuses.get(sid).copied())) {
            completed += 1;
        }
    }

    let total = students.len() as i64;
    Ok(ClassStatistics {
        total_students: total,
        completed_dues: completed,
        pending_dues: total - completed,
    })
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SubjectStatistics {
    pub completed: i64,
    pub pending: i64,
}

/// Clearance counts across every student sharing the subject's
/// (department, semester), independent of class section.
pub fn subject_statistics(
    conn: &Connection,
    subject_id: &str,
) -> anyhow::Result<SubjectStatistics> {
    let Some(subject) = db::subject_by_id(conn, subject_id)? else {
        return Ok(SubjectStatistics::default());
    };

    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users
         WHERE role = 'student' AND department = ? AND semester = ?",
        (&subject.department, subject.semester),
        |r| r.get(0),
    )?;
    let completed: i64 = conn.query_row(
        "SELECT COUNT(*)
         FROM users u
         JOIN no_due_status n
           ON n.student_id = u.id AND n.subject_id = ?1 AND n.status = 'approved'
         WHERE u.role = 'student' AND u.department = ?2 AND u.semester = ?3",
        (&subject.id, &subject.department, subject.semester),
        |r| r.get(0),
    )?;

    Ok(SubjectStatistics {
        completed,
        pending: total - completed,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentSummary {
    pub id: String,
    pub name: String,
    pub roll_number: Option<String>,
    pub class_section: Option<String>,
    pub year: Option<i64>,
    pub semester: Option<i64>,
    pub approved_subjects: i64,
    pub total_subjects: i64,
    pub final_status: String,
    pub final_remarks: Option<String>,
}

fn summarize_student(conn: &Connection, student: &UserRow) -> rusqlite::Result<StudentSummary> {
    let total = total_subjects(conn, &student.department, student.semester)?;
    let approved = approved_subjects(conn, student)?;
    let final_row = final_approval(conn, &student.id)?;

    Ok(StudentSummary {
        id: student.id.clone(),
        name: student.name.clone(),
        roll_number: student.roll_number.clone(),
        class_section: student.class_section.clone(),
        year: student.year,
        semester: student.semester,
        approved_subjects: approved,
        total_subjects: total,
        final_status: final_row
            .as_ref()
            .map(|f| f.status.clone())
            .unwrap_or_else(|| "not_requested".to_string()),
        final_remarks: final_row.and_then(|f| f.remarks),
    })
}

pub fn department_student_summary(
    conn: &Connection,
    department: &str,
) -> anyhow::Result<Vec<StudentSummary>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, email, role, department, class_section, year, semester, roll_number
         FROM users
         WHERE role = 'student' AND department = ?
         ORDER BY rowid",
    )?;
    let students = stmt
        .query_map([department], |row| {
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
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(students.len());
    for student in &students {
        out.push(summarize_student(conn, student)?);
    }
    Ok(out)
}

#[derive(Debug, Clone, Serialize)]
pub struct TeacherNote {
    pub subject: String,
    pub remarks: String,
    pub teacher_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassStudentDetail {
    #[serde(flatten)]
    pub summary: StudentSummary,
    pub teacher_notes: Vec<TeacherNote>,
}

/// Per-student clearance detail for a class, including every non-empty
/// remark with the approving staff member's name (NULL when the approver
/// reference is missing or dangling).
pub fn class_student_detail(
    conn: &Connection,
    class_id: &str,
) -> anyhow::Result<Vec<ClassStudentDetail>> {
    let Some(class) = db::class_by_id(conn, class_id)? else {
        return Ok(Vec::new());
    };

    let students = students_in_class_scope(conn, &class)?;
    let mut notes_stmt = conn.prepare(
        "SELECT s.name, n.remarks, t.name
         FROM subjects s
         JOIN no_due_status n
           ON n.subject_id = s.id AND n.student_id = ?1
         LEFT JOIN users t ON t.id = n.approved_by
         WHERE s.department = ?2 AND s.semester = ?3
           AND n.remarks IS NOT NULL AND n.remarks <> ''
         ORDER BY s.rowid",
    )?;

    let mut out = Vec::with_capacity(students.len());
    for student in &students {
        let summary = summarize_student(conn, student)?;
        let teacher_notes = notes_stmt
            .query_map(
                (&student.id, &student.department, student.semester),
                |row| {
                    Ok(TeacherNote {
                        subject: row.get(0)?,
                        remarks: row.get(1)?,
                        teacher_name: row.get(2)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        out.push(ClassStudentDetail {
            summary,
            teacher_notes,
        });
    }
    Ok(out)
}

#[derive(Debug, Clone, Serialize)]
pub struct SubjectBreakdown {
    pub id: String,
    pub name: String,
    pub code: String,
    pub credits: i64,
    pub completed: i64,
    pub pending: i64,
}

/// Per-subject clearance counts over one class's students, at an explicit
/// semester (the dashboard lets the HOD browse other semesters of the same
/// department).
pub fn class_subject_breakdown(
    conn: &Connection,
    class_id: &str,
    semester: i64,
) -> anyhow::Result<Vec<SubjectBreakdown>> {
    let Some(class) = db::class_by_id(conn, class_id)? else {
        return Ok(Vec::new());
    };

    let students = students_in_class_scope(conn, &class)?;
    let total = students.len() as i64;

    let mut subj_stmt = conn.prepare(
        "SELECT id, name, code, credits FROM subjects
         WHERE department = ? AND semester = ?
         ORDER BY rowid",
    )?;
    let subjects = subj_stmt
        .query_map((&class.department, semester), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut approved_stmt = conn.prepare(
        "SELECT COUNT(*)
         FROM users u
         JOIN no_due_status n
           ON n.student_id = u.id AND n.subject_id = ?1 AND n.status = 'approved'
         WHERE u.role = 'student' AND u.department = ?2 AND u.year = ?3
           AND u.semester = ?4 AND u.class_section = ?5",
    )?;

    let mut out = Vec::with_capacity(subjects.len());
    for (id, name, code, credits) in subjects {
        let completed: i64 = approved_stmt.query_row(
            (&id, &class.department, class.year, class.semester, &class.section),
            |r| r.get(0),
        )?;
        out.push(SubjectBreakdown {
            id,
            name,
            code,
            credits,
            completed,
            pending: total - completed,
        });
    }
    Ok(out)
}

pub fn class_subject_count(
    conn: &Connection,
    class_id: &str,
    semester: i64,
) -> anyhow::Result<i64> {
    let Some(class) = db::class_by_id(conn, class_id)? else {
        return Ok(0);
    };
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM subjects WHERE department = ? AND semester = ?",
        (&class.department, semester),
        |r| r.get(0),
    )?;
    Ok(count)
}
