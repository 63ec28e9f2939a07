use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::agg;
use crate::auth::{require_role, Role};
use crate::db;
use crate::ipc::error::{err, ok, ok_message};
use crate::ipc::types::{AppState, Request};

use super::load_user;

fn handle_subjects(state: &mut AppState, req: &Request) -> serde_json::Value {
    let claims = match require_role(state, req, &[Role::Student]) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student = match load_user(conn, req, &claims) {
        Ok(u) => u,
        Err(e) => return e,
    };

    match agg::student_subject_view(conn, &student) {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_final_approval_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let claims = match require_role(state, req, &[Role::Student]) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student = match load_user(conn, req, &claims) {
        Ok(u) => u,
        Err(e) => return e,
    };

    match agg::student_final_eligibility(conn, &student) {
        Ok(eligibility) => ok(&req.id, json!(eligibility)),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_request_final_approval(state: &mut AppState, req: &Request) -> serde_json::Value {
    let claims = match require_role(state, req, &[Role::Student]) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student = match load_user(conn, req, &claims) {
        Ok(u) => u,
        Err(e) => return e,
    };

    // One request per student, ever; a rejected request is not re-openable.
    let existing: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM final_approvals WHERE student_id = ?",
            [&student.id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if existing.is_some() {
        return err(&req.id, "conflict", "Final approval already requested", None);
    }

    let now = db::now_rfc3339();
    let insert = conn.execute(
        "INSERT INTO final_approvals(id, student_id, status, approved_by, remarks,
                                     created_at, updated_at)
         VALUES(?, ?, 'pending', NULL, NULL, ?, ?)",
        (Uuid::new_v4().to_string(), &student.id, &now, &now),
    );
    match insert {
        Ok(_) => ok_message(&req.id, "Final approval requested successfully"),
        Err(e) if db::is_constraint_violation(&e) => {
            err(&req.id, "conflict", "Final approval already requested", None)
        }
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "student.subjects" => Some(handle_subjects(state, req)),
        "student.finalApprovalStatus" => Some(handle_final_approval_status(state, req)),
        "student.requestFinalApproval" => Some(handle_request_final_approval(state, req)),
        _ => None,
    }
}
