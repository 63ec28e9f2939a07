use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::agg::{self, DueStatus};
use crate::auth::{require_role, Role};
use crate::db;
use crate::ipc::error::{err, ok, ok_message};
use crate::ipc::types::{AppState, Request};

use super::param_str;

/// HOD accounts can do everything staff can.
const STAFF_ROLES: &[Role] = &[Role::Staff, Role::Hod];

fn handle_assigned_subjects(state: &mut AppState, req: &Request) -> serde_json::Value {
    let claims = match require_role(state, req, STAFF_ROLES) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    // Inner joins drop assignments whose subject or class has vanished.
    let mut stmt = match conn.prepare(
        "SELECT sub.id, sub.name, c.section, sub.department, sub.semester
         FROM staff_subjects a
         JOIN subjects sub ON sub.id = a.subject_id
         JOIN classes c ON c.id = a.class_id
         WHERE a.staff_id = ?
         ORDER BY a.rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&claims.user_id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "class_section": row.get::<_, String>(2)?,
                "department": row.get::<_, String>(3)?,
                "semester": row.get::<_, i64>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_role(state, req, STAFF_ROLES) {
        return e;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let (Some(subject_id), Some(class_section)) = (
        param_str(&req.params, "subject_id"),
        param_str(&req.params, "class_section"),
    ) else {
        return err(&req.id, "bad_params", "missing subject_id or class_section", None);
    };

    let subject = match db::subject_by_id(conn, &subject_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "Subject not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut stmt = match conn.prepare(
        "SELECT u.id, u.name, u.roll_number, n.status, n.remarks, n.updated_at
         FROM users u
         LEFT JOIN no_due_status n
           ON n.student_id = u.id AND n.subject_id = ?1
         WHERE u.role = 'student' AND u.department = ?2 AND u.semester = ?3
           AND u.class_section = ?4
         ORDER BY u.rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(
            (&subject.id, &subject.department, subject.semester, &class_section),
            |row| {
                let status: Option<String> = row.get(3)?;
                let updated_at: Option<String> = row.get(5)?;
                Ok(json!({
                    "id": row.get::<_, String>(0)?,
                    "name": row.get::<_, String>(1)?,
                    "roll_number": row.get::<_, Option<String>>(2)?,
                    "status": status.unwrap_or_else(|| "pending".to_string()),
                    "remarks": row.get::<_, Option<String>>(4)?,
                    "updated_at": updated_at.as_deref().and_then(agg::fmt_minute),
                }))
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_approve_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let claims = match require_role(state, req, STAFF_ROLES) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let (Some(student_id), Some(subject_id)) = (
        param_str(&req.params, "student_id"),
        param_str(&req.params, "subject_id"),
    ) else {
        return err(&req.id, "bad_params", "missing student_id or subject_id", None);
    };
    let status = match param_str(&req.params, "action").as_deref() {
        Some("approve") => DueStatus::Approved,
        Some("reject") => DueStatus::Rejected,
        _ => return err(&req.id, "bad_params", "action must be approve or reject", None),
    };
    let remarks = param_str(&req.params, "remarks");

    match db::user_by_id(conn, &student_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "Student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    match db::subject_by_id(conn, &subject_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "Subject not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    // Upsert on (student, subject): at most one status row per pair, no
    // history. Overwrites keep the original created_at.
    let existing: Option<String> = match conn
        .query_row(
            "SELECT id FROM no_due_status WHERE student_id = ? AND subject_id = ?",
            (&student_id, &subject_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let now = db::now_rfc3339();
    let write = if let Some(row_id) = existing {
        conn.execute(
            "UPDATE no_due_status
             SET status = ?, approved_by = ?, remarks = ?, updated_at = ?
             WHERE id = ?",
            rusqlite::params![status.as_str(), claims.user_id, remarks, now, row_id],
        )
    } else {
        conn.execute(
            "INSERT INTO no_due_status(id, student_id, subject_id, status, approved_by,
                                       remarks, created_at, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                student_id,
                subject_id,
                status.as_str(),
                claims.user_id,
                remarks,
                now,
                now,
            ],
        )
    };

    match write {
        Ok(_) => {
            let verb = match status {
                DueStatus::Approved => "approved",
                _ => "rejected",
            };
            ok_message(&req.id, format!("Student {verb} successfully"))
        }
        // The existence check above races with a concurrent write; the
        // UNIQUE index on (student_id, subject_id) is the arbiter.
        Err(e) if db::is_constraint_violation(&e) => {
            err(&req.id, "conflict", "Status already recorded", None)
        }
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "staff.assignedSubjects" => Some(handle_assigned_subjects(state, req)),
        "staff.students" => Some(handle_students(state, req)),
        "staff.approveStudent" => Some(handle_approve_student(state, req)),
        _ => None,
    }
}
