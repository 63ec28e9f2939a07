use crate::auth;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspace_path": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            ok(&req.id, json!({ "workspace_path": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

fn handle_seed_demo(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match db::seed_demo(conn) {
        Ok(()) => ok(&req.id, json!({ "message": "Demo data ready" })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

/// Role-based landing page dispatch for the `/` route. A stale session
/// (token unknown, or the user row has since vanished) is dropped and sent
/// back to the login page.
fn handle_dashboard_resolve(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(token) = auth::session_token(req).map(|t| t.to_string()) else {
        return ok(&req.id, json!({ "redirect": "/login" }));
    };
    let Some(claims) = state.sessions.get(&token).cloned() else {
        return ok(&req.id, json!({ "redirect": "/login" }));
    };

    let user = state
        .db
        .as_ref()
        .and_then(|conn| db::user_by_id(conn, &claims.user_id).ok().flatten());
    if user.is_none() {
        state.sessions.remove(&token);
        return ok(&req.id, json!({ "redirect": "/login" }));
    }

    ok(&req.id, json!({ "redirect": claims.role.dashboard_path() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "workspace.seedDemo" => Some(handle_seed_demo(state, req)),
        "dashboard.resolve" => Some(handle_dashboard_resolve(state, req)),
        _ => None,
    }
}
