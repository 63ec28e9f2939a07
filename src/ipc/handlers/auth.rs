use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::auth::{self, Claims, Role};
use crate::db;
use crate::ipc::error::{err, ok, ok_message};
use crate::ipc::types::{AppState, Request};

use super::{param_i64, param_str};

fn handle_register(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let required = |key: &str| -> Result<String, serde_json::Value> {
        param_str(&req.params, key)
            .ok_or_else(|| err(&req.id, "bad_params", format!("missing {key}"), None))
    };
    let name = match required("name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let email = match required("email") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let password = match required("password") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let role_raw = match required("role") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let department = match required("department") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(role) = Role::parse(&role_raw) else {
        return err(&req.id, "bad_params", "role must be student, staff or hod", None);
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM users WHERE email = ?", [&email], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_some() {
        return err(&req.id, "conflict", "Email already registered", None);
    }

    let password_hash = match auth::hash_password(&password) {
        Ok(h) => h,
        Err(e) => return err(&req.id, "internal_error", e.to_string(), None),
    };

    // Student-only fields are dropped for staff and HOD accounts.
    let class_section = param_str(&req.params, "class_section");
    let (year, semester, roll_number) = if role == Role::Student {
        (
            param_i64(&req.params, "year"),
            param_i64(&req.params, "semester"),
            param_str(&req.params, "roll_number"),
        )
    } else {
        (None, None, None)
    };

    let insert = conn.execute(
        "INSERT INTO users(id, name, email, password_hash, role, department,
                           class_section, year, semester, roll_number, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            Uuid::new_v4().to_string(),
            name,
            email,
            password_hash,
            role.as_str(),
            department,
            class_section,
            year,
            semester,
            roll_number,
            db::now_rfc3339(),
        ],
    );
    match insert {
        Ok(_) => ok_message(&req.id, "Registration successful"),
        // The existence check above races with concurrent registration; the
        // UNIQUE index on email is the arbiter.
        Err(e) if db::is_constraint_violation(&e) => {
            err(&req.id, "conflict", "Email already registered", None)
        }
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let (Some(email), Some(password)) = (
        param_str(&req.params, "email"),
        param_str(&req.params, "password"),
    ) else {
        return err(&req.id, "bad_params", "missing email or password", None);
    };

    let found = match db::user_by_email(conn, &email) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    // Unknown email and wrong password are indistinguishable on the wire.
    let Some((user, password_hash)) = found else {
        return err(&req.id, "unauthorized", "Invalid email or password", None);
    };
    if !auth::verify_password(&password, &password_hash) {
        return err(&req.id, "unauthorized", "Invalid email or password", None);
    }
    let Some(role) = Role::parse(&user.role) else {
        return err(
            &req.id,
            "internal_error",
            format!("user {} has unknown role", user.id),
            None,
        );
    };

    let token = auth::mint_session_token();
    state.sessions.insert(
        token.clone(),
        Claims {
            user_id: user.id,
            role,
            name: user.name.clone(),
        },
    );

    ok(
        &req.id,
        json!({
            "session_token": token,
            "role": role.as_str(),
            "name": user.name,
            "redirect": role.dashboard_path(),
        }),
    )
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Some(token) = auth::session_token(req) {
        state.sessions.remove(token);
    }
    ok_message(&req.id, "Logged out successfully")
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.register" => Some(handle_register(state, req)),
        "auth.login" => Some(handle_login(state, req)),
        "auth.logout" => Some(handle_logout(state, req)),
        _ => None,
    }
}
