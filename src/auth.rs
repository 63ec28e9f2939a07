use pbkdf2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use pbkdf2::Pbkdf2;
use rand::{thread_rng, Rng};
use rand_core::OsRng;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Student,
    Staff,
    Hod,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Staff => "staff",
            Role::Hod => "hod",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "student" => Some(Role::Student),
            "staff" => Some(Role::Staff),
            "hod" => Some(Role::Hod),
            _ => None,
        }
    }

    pub fn dashboard_path(&self) -> String {
        format!("/{}/dashboard", self.as_str())
    }
}

/// Request-scoped identity resolved from a session token. Handlers receive
/// this by value; nothing reads ambient session state.
#[derive(Debug, Clone)]
pub struct Claims {
    pub user_id: String,
    pub role: Role,
    pub name: String,
}

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Pbkdf2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("hash password: {e}"))?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored) else {
        return false;
    };
    Pbkdf2.verify_password(password.as_bytes(), &parsed).is_ok()
}

pub fn mint_session_token() -> String {
    let bytes: [u8; 32] = thread_rng().gen();
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub fn session_token(req: &Request) -> Option<&str> {
    req.params
        .get("session_token")
        .and_then(|v| v.as_str())
        .filter(|t| !t.is_empty())
}

/// Role gate invoked at the top of every role-scoped handler. The redirect
/// detail mirrors the web front-end's send-to-login behavior; it is a UI
/// convenience, not a security boundary.
pub fn require_role(
    state: &AppState,
    req: &Request,
    allowed: &[Role],
) -> Result<Claims, serde_json::Value> {
    let claims = session_token(req).and_then(|t| state.sessions.get(t).cloned());
    match claims {
        Some(c) if allowed.contains(&c.role) => Ok(c),
        _ => Err(err(
            &req.id,
            "unauthorized",
            "login required",
            Some(json!({ "redirect": "/login" })),
        )),
    }
}
