pub mod auth;
pub mod core;
pub mod hod;
pub mod staff;
pub mod student;

use rusqlite::Connection;
use serde_json::{json, Value};

use crate::auth::Claims;
use crate::db::{self, UserRow};
use crate::ipc::error::err;
use crate::ipc::types::Request;

/// Shared param accessors. Values arrive from web forms either as JSON
/// numbers or numeric strings; accept both.
pub fn param_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn param_i64(params: &Value, key: &str) -> Option<i64> {
    match params.get(key) {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Re-resolve the session's user row. A session whose user has vanished is
/// treated the same as no session at all.
pub fn load_user(
    conn: &Connection,
    req: &Request,
    claims: &Claims,
) -> Result<UserRow, serde_json::Value> {
    match db::user_by_id(conn, &claims.user_id) {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(err(
            &req.id,
            "unauthorized",
            "login required",
            Some(json!({ "redirect": "/login" })),
        )),
        Err(e) => Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    }
}
