use crate::ipc::error::ok;
use crate::ipc::helpers::{opt_str, require_conn, require_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_conn(state)?;
    let code = require_str(&req.params, "code")?.trim().to_string();
    let name = require_str(&req.params, "name")?.trim().to_string();
    if code.is_empty() || name.is_empty() {
        return Err(HandlerErr::validation("code and name must not be empty"));
    }
    let description = opt_str(&req.params, "description");

    let course_id = Uuid::new_v4().to_string();
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO courses(id, code, name, description) VALUES(?, ?, ?, ?)",
        (&course_id, &code, &name, description),
    )
    .map_err(HandlerErr::db_update)?;
    if inserted == 0 {
        return Err(HandlerErr::with_details(
            "conflict",
            "course code already exists",
            json!({ "code": code }),
        ));
    }

    Ok(ok(&req.id, json!({ "courseId": course_id, "code": code })))
}

fn handle_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_conn(state)?;
    let mut stmt = conn
        .prepare("SELECT id, code, name, description FROM courses ORDER BY code")
        .map_err(HandlerErr::db_query)?;
    let courses = stmt
        .query_map([], |r| {
            Ok(json!({
                "courseId": r.get::<_, String>(0)?,
                "code": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "description": r.get::<_, Option<String>>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(ok(&req.id, json!({ "courses": courses })))
}

fn handle_delete(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_conn(state)?;
    let course_id = require_str(&req.params, "courseId")?;

    let subject_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM subjects WHERE course_id = ?",
            [course_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;
    let student_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM students WHERE course_id = ?",
            [course_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;
    if subject_count > 0 || student_count > 0 {
        return Err(HandlerErr::with_details(
            "conflict",
            "course still has subjects or students",
            json!({ "subjects": subject_count, "students": student_count }),
        ));
    }

    let deleted = conn
        .execute("DELETE FROM courses WHERE id = ?", [course_id])
        .map_err(HandlerErr::db_update)?;
    if deleted == 0 {
        return Err(HandlerErr::not_found("course not found"));
    }
    Ok(ok(&req.id, json!({ "deleted": true })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let out = match req.method.as_str() {
        "courses.create" => handle_create(state, req),
        "courses.list" => handle_list(state, req),
        "courses.delete" => handle_delete(state, req),
        _ => return None,
    };
    Some(out.unwrap_or_else(|e| e.response(&req.id)))
}
