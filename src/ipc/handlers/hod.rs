use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::agg::{self, DueStatus};
use crate::auth::{require_role, Claims, Role};
use crate::db::{self, UserRow};
use crate::ipc::error::{err, ok, ok_message};
use crate::ipc::types::{AppState, Request};

use super::{load_user, param_i64, param_str};

/// All HOD methods start the same way: hod-only gate, open store, and the
/// HOD's own user row (for department scoping).
fn hod_context<'a>(
    state: &'a AppState,
    req: &Request,
) -> Result<(&'a Connection, Claims, UserRow), serde_json::Value> {
    let claims = require_role(state, req, &[Role::Hod])?;
    let Some(conn) = state.db.as_ref() else {
        return Err(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let hod = load_user(conn, req, &claims)?;
    Ok((conn, claims, hod))
}

fn handle_department_students(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, _, hod) = match hod_context(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match agg::department_student_summary(conn, &hod.department) {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_staff(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, _, hod) = match hod_context(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT u.id, u.name, u.email,
           (SELECT COUNT(*) FROM staff_subjects a WHERE a.staff_id = u.id) AS assignments,
           (SELECT COUNT(*) FROM classes c WHERE c.class_advisor_id = u.id) AS advised_classes
         FROM users u
         WHERE u.role = 'staff' AND u.department = ?
         ORDER BY u.rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&hod.department], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "email": row.get::<_, String>(2)?,
                "assignments": row.get::<_, i64>(3)?,
                "advised_classes": row.get::<_, i64>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(staff) => ok(&req.id, json!({ "staff": staff })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_subjects(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, _, hod) = match hod_context(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT s.id, s.name, s.code, s.semester, s.credits, c.name
         FROM subjects s
         LEFT JOIN classes c ON c.id = s.class_id
         WHERE s.department = ?
         ORDER BY s.rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&hod.department], |row| {
            let class_name: Option<String> = row.get(5)?;
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "code": row.get::<_, String>(2)?,
                "semester": row.get::<_, i64>(3)?,
                "credits": row.get::<_, i64>(4)?,
                "class_name": class_name.unwrap_or_else(|| "Not assigned".to_string()),
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, _, hod) = match hod_context(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT c.id, c.name, c.year, c.semester, c.section,
           a.name, c.class_advisor_id,
           (SELECT COUNT(*) FROM subjects s WHERE s.class_id = c.id) AS subject_count
         FROM classes c
         LEFT JOIN users a ON a.id = c.class_advisor_id
         WHERE c.department = ?
         ORDER BY c.rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&hod.department], |row| {
            let advisor_name: Option<String> = row.get(5)?;
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "year": row.get::<_, i64>(2)?,
                "semester": row.get::<_, i64>(3)?,
                "section": row.get::<_, String>(4)?,
                "advisor_name": advisor_name.unwrap_or_else(|| "Not assigned".to_string()),
                "advisor_id": row.get::<_, Option<String>>(6)?,
                "subject_count": row.get::<_, i64>(7)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_create_class(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, _, hod) = match hod_context(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let (Some(name), Some(year), Some(semester), Some(section)) = (
        param_str(&req.params, "name"),
        param_i64(&req.params, "year"),
        param_i64(&req.params, "semester"),
        param_str(&req.params, "section"),
    ) else {
        return err(
            &req.id,
            "bad_params",
            "missing name, year, semester or section",
            None,
        );
    };

    let existing: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM classes
             WHERE department = ? AND year = ? AND semester = ? AND section = ?",
            (&hod.department, year, semester, &section),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if existing.is_some() {
        return err(&req.id, "conflict", "Class already exists", None);
    }

    let insert = conn.execute(
        "INSERT INTO classes(id, name, department, year, semester, section,
                             class_advisor_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?, NULL, ?)",
        rusqlite::params![
            Uuid::new_v4().to_string(),
            name,
            hod.department,
            year,
            semester,
            section,
            db::now_rfc3339(),
        ],
    );
    match insert {
        Ok(_) => ok_message(&req.id, "Class created successfully"),
        Err(e) if db::is_constraint_violation(&e) => {
            err(&req.id, "conflict", "Class already exists", None)
        }
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_create_subject(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, _, hod) = match hod_context(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let (Some(name), Some(code), Some(semester)) = (
        param_str(&req.params, "name"),
        param_str(&req.params, "code"),
        param_i64(&req.params, "semester"),
    ) else {
        return err(&req.id, "bad_params", "missing name, code or semester", None);
    };
    let credits = param_i64(&req.params, "credits").unwrap_or(3);
    let class_id = param_str(&req.params, "class_id");

    if let Some(cid) = class_id.as_deref() {
        match db::class_by_id(conn, cid) {
            Ok(Some(_)) => {}
            Ok(None) => return err(&req.id, "not_found", "Class not found", None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let existing: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM subjects WHERE code = ? AND department = ?",
            (&code, &hod.department),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if existing.is_some() {
        return err(&req.id, "conflict", "Subject code already exists", None);
    }

    let insert = conn.execute(
        "INSERT INTO subjects(id, name, code, department, semester, credits,
                              class_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            Uuid::new_v4().to_string(),
            name,
            code,
            hod.department,
            semester,
            credits,
            class_id,
            db::now_rfc3339(),
        ],
    );
    match insert {
        Ok(_) => ok_message(&req.id, "Subject created successfully"),
        Err(e) if db::is_constraint_violation(&e) => {
            err(&req.id, "conflict", "Subject code already exists", None)
        }
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_assign_class_advisor(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, _, _) = match hod_context(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let (Some(class_id), Some(staff_id)) = (
        param_str(&req.params, "class_id"),
        param_str(&req.params, "staff_id"),
    ) else {
        return err(&req.id, "bad_params", "missing class_id or staff_id", None);
    };

    match db::class_by_id(conn, &class_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "Class not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    match db::user_by_id(conn, &staff_id) {
        Ok(Some(user)) if user.role == "staff" => {}
        Ok(_) => {
            return err(
                &req.id,
                "bad_params",
                "Selected user is not a staff member",
                None,
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    match conn.execute(
        "UPDATE classes SET class_advisor_id = ? WHERE id = ?",
        (&staff_id, &class_id),
    ) {
        Ok(_) => ok_message(&req.id, "Class advisor assigned successfully"),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_assign_subject(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, _, _) = match hod_context(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let (Some(staff_id), Some(subject_id), Some(class_id)) = (
        param_str(&req.params, "staff_id"),
        param_str(&req.params, "subject_id"),
        param_str(&req.params, "class_id"),
    ) else {
        return err(
            &req.id,
            "bad_params",
            "missing staff_id, subject_id or class_id",
            None,
        );
    };

    match db::user_by_id(conn, &staff_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "Staff member not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    match db::subject_by_id(conn, &subject_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "Subject not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    match db::class_by_id(conn, &class_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "Class not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let existing: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM staff_subjects
             WHERE staff_id = ? AND subject_id = ? AND class_id = ?",
            (&staff_id, &subject_id, &class_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if existing.is_some() {
        return err(&req.id, "conflict", "Assignment already exists", None);
    }

    let insert = conn.execute(
        "INSERT INTO staff_subjects(id, staff_id, subject_id, class_id, created_at)
         VALUES(?, ?, ?, ?, ?)",
        rusqlite::params![
            Uuid::new_v4().to_string(),
            staff_id,
            subject_id,
            class_id,
            db::now_rfc3339(),
        ],
    );
    match insert {
        Ok(_) => ok_message(&req.id, "Subject assigned successfully"),
        Err(e) if db::is_constraint_violation(&e) => {
            err(&req.id, "conflict", "Assignment already exists", None)
        }
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_final_approve(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, claims, _) = match hod_context(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let Some(student_id) = param_str(&req.params, "student_id") else {
        return err(&req.id, "bad_params", "missing student_id", None);
    };
    let status = match param_str(&req.params, "action").as_deref() {
        Some("approve") => DueStatus::Approved,
        Some("reject") => DueStatus::Rejected,
        _ => return err(&req.id, "bad_params", "action must be approve or reject", None),
    };
    let remarks = param_str(&req.params, "remarks");

    let existing: Option<String> = match conn
        .query_row(
            "SELECT id FROM final_approvals WHERE student_id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(row_id) = existing else {
        return err(&req.id, "not_found", "No final approval request found", None);
    };

    let update = conn.execute(
        "UPDATE final_approvals
         SET status = ?, approved_by = ?, remarks = ?, updated_at = ?
         WHERE id = ?",
        rusqlite::params![
            status.as_str(),
            claims.user_id,
            remarks,
            db::now_rfc3339(),
            row_id,
        ],
    );
    match update {
        Ok(_) => {
            let verb = match status {
                DueStatus::Approved => "approved",
                _ => "rejected",
            };
            ok_message(&req.id, format!("Final approval {verb} successfully"))
        }
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

// The statistics views below keep the original's lenient contract: any
// store fault degrades to a zeroed/empty payload and is only logged.

fn handle_class_statistics(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, _, _) = match hod_context(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(class_id) = param_str(&req.params, "class_id") else {
        return err(&req.id, "bad_params", "missing class_id", None);
    };

    let stats = agg::class_statistics(conn, &class_id).unwrap_or_else(|e| {
        log::warn!("class statistics failed for {class_id}: {e}");
        agg::ClassStatistics::default()
    });
    ok(&req.id, json!(stats))
}

fn handle_subject_statistics(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, _, _) = match hod_context(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(subject_id) = param_str(&req.params, "subject_id") else {
        return err(&req.id, "bad_params", "missing subject_id", None);
    };

    let stats = agg::subject_statistics(conn, &subject_id).unwrap_or_else(|e| {
        log::warn!("subject statistics failed for {subject_id}: {e}");
        agg::SubjectStatistics::default()
    });
    ok(&req.id, json!(stats))
}

fn handle_class_students(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, _, _) = match hod_context(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(class_id) = param_str(&req.params, "class_id") else {
        return err(&req.id, "bad_params", "missing class_id", None);
    };

    let students = agg::class_student_detail(conn, &class_id).unwrap_or_else(|e| {
        log::warn!("class student detail failed for {class_id}: {e}");
        Vec::new()
    });
    ok(&req.id, json!({ "students": students }))
}

fn handle_class_subjects(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, _, _) = match hod_context(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (Some(class_id), Some(semester)) = (
        param_str(&req.params, "class_id"),
        param_i64(&req.params, "semester"),
    ) else {
        return err(&req.id, "bad_params", "missing class_id or semester", None);
    };

    let subjects = agg::class_subject_breakdown(conn, &class_id, semester).unwrap_or_else(|e| {
        log::warn!("class subject breakdown failed for {class_id}: {e}");
        Vec::new()
    });
    ok(&req.id, json!({ "subjects": subjects }))
}

fn handle_class_subject_count(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, _, _) = match hod_context(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (Some(class_id), Some(semester)) = (
        param_str(&req.params, "class_id"),
        param_i64(&req.params, "semester"),
    ) else {
        return err(&req.id, "bad_params", "missing class_id or semester", None);
    };

    let count = agg::class_subject_count(conn, &class_id, semester).unwrap_or_else(|e| {
        log::warn!("class subject count failed for {class_id}: {e}");
        0
    });
    ok(&req.id, json!({ "subject_count": count }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "hod.departmentStudents" => Some(handle_department_students(state, req)),
        "hod.staff" => Some(handle_staff(state, req)),
        "hod.subjects" => Some(handle_subjects(state, req)),
        "hod.classes" => Some(handle_classes(state, req)),
        "hod.createClass" => Some(handle_create_class(state, req)),
        "hod.createSubject" => Some(handle_create_subject(state, req)),
        "hod.assignClassAdvisor" => Some(handle_assign_class_advisor(state, req)),
        "hod.assignSubject" => Some(handle_assign_subject(state, req)),
        "hod.finalApprove" => Some(handle_final_approve(state, req)),
        "hod.classStatistics" => Some(handle_class_statistics(state, req)),
        "hod.subjectStatistics" => Some(handle_subject_statistics(state, req)),
        "hod.classStudents" => Some(handle_class_students(state, req)),
        "hod.classSubjects" => Some(handle_class_subjects(state, req)),
        "hod.classSubjectCount" => Some(handle_class_subject_count(state, req)),
        _ => None,
    }
}
