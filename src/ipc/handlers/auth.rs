use crate::backup::hex_sha256;
use crate::ipc::error::ok;
use crate::ipc::helpers::{opt_str, random_digit_id, require_conn, require_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::validate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

/// Staff/portal account ids keep the original system's fixed 6 digits;
/// student record ids are configured separately.
const USER_ID_DIGITS: usize = 6;
const ROLES: [&str; 3] = ["admin", "teacher", "student"];

fn generate_user_id(conn: &Connection) -> Result<String, HandlerErr> {
    loop {
        let candidate = random_digit_id(USER_ID_DIGITS);
        let taken: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM users WHERE user_id = ?",
                [&candidate],
                |r| r.get(0),
            )
            .optional()
            .map_err(HandlerErr::db_query)?;
        if taken.is_none() {
            return Ok(candidate);
        }
    }
}

fn handle_create_user(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_conn(state)?;
    let name = validate::validate_name(require_str(&req.params, "name")?)
        .map_err(HandlerErr::validation)?;
    let email = validate::validate_email(opt_str(&req.params, "email").unwrap_or(""))
        .map_err(HandlerErr::validation)?;
    let password = require_str(&req.params, "password")?;
    if password.len() < 4 {
        return Err(HandlerErr::validation(
            "Password must be at least 4 characters",
        ));
    }
    let role = require_str(&req.params, "role")?;
    if !ROLES.contains(&role) {
        return Err(HandlerErr::bad_params(
            "role must be one of: admin, teacher, student",
        ));
    }
    let position = opt_str(&req.params, "position");

    let user_id = generate_user_id(conn)?;
    let row_id = Uuid::new_v4().to_string();
    let digest = hex_sha256(password.as_bytes());
    conn.execute(
        "INSERT INTO users(id, user_id, name, email, password_sha256, role, position)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &row_id,
            &user_id,
            &name,
            if email.is_empty() { None } else { Some(&email) },
            &digest,
            role,
            position,
        ),
    )
    .map_err(HandlerErr::db_update)?;

    Ok(ok(
        &req.id,
        json!({ "userId": user_id, "name": name, "role": role }),
    ))
}

fn handle_login(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_conn(state)?;
    let user_id = require_str(&req.params, "userId")?;
    let password = require_str(&req.params, "password")?;
    let digest = hex_sha256(password.as_bytes());

    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT name, role FROM users WHERE user_id = ? AND password_sha256 = ?",
            (user_id, &digest),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;

    match row {
        Some((name, role)) => Ok(ok(
            &req.id,
            json!({ "userId": user_id, "name": name, "role": role }),
        )),
        None => Err(HandlerErr::new("auth_failed", "invalid credentials")),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let out = match req.method.as_str() {
        "auth.createUser" => handle_create_user(state, req),
        "auth.login" => handle_login(state, req),
        _ => return None,
    };
    Some(out.unwrap_or_else(|e| e.response(&req.id)))
}
