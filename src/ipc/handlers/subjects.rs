use crate::ipc::error::ok;
use crate::ipc::helpers::{opt_str, require_conn, require_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn resolve_course(conn: &Connection, course_id: &str) -> Result<(), HandlerErr> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM courses WHERE id = ?", [course_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db_query)?;
    if found.is_none() {
        return Err(HandlerErr::not_found("course not found"));
    }
    Ok(())
}

/// Maps a public teacher user id to the users row id, checking the role.
fn resolve_teacher(conn: &Connection, teacher_user_id: &str) -> Result<String, HandlerErr> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT id, role FROM users WHERE user_id = ?",
            [teacher_user_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    match row {
        Some((id, role)) if role == "teacher" => Ok(id),
        Some(_) => Err(HandlerErr::bad_params("user is not a teacher")),
        None => Err(HandlerErr::not_found("teacher not found")),
    }
}

fn handle_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_conn(state)?;
    let code = require_str(&req.params, "code")?.trim().to_string();
    let name = require_str(&req.params, "name")?.trim().to_string();
    if code.is_empty() || name.is_empty() {
        return Err(HandlerErr::validation("code and name must not be empty"));
    }
    let description = opt_str(&req.params, "description");
    let course_id = require_str(&req.params, "courseId")?;
    resolve_course(conn, course_id)?;

    let teacher_id = match opt_str(&req.params, "teacherUserId") {
        Some(uid) => Some(resolve_teacher(conn, uid)?),
        None => None,
    };

    let subject_id = Uuid::new_v4().to_string();
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO subjects(id, code, name, description, teacher_id, course_id)
             VALUES(?, ?, ?, ?, ?, ?)",
            (&subject_id, &code, &name, description, &teacher_id, course_id),
        )
        .map_err(HandlerErr::db_update)?;
    if inserted == 0 {
        return Err(HandlerErr::with_details(
            "conflict",
            "subject code already exists",
            json!({ "code": code }),
        ));
    }

    Ok(ok(&req.id, json!({ "subjectId": subject_id, "code": code })))
}

fn handle_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_conn(state)?;
    let course_id = opt_str(&req.params, "courseId");
    let teacher_user_id = opt_str(&req.params, "teacherUserId");

    let base = "SELECT sub.id, sub.code, sub.name, sub.description,
                       c.code, u.name
                FROM subjects sub
                JOIN courses c ON sub.course_id = c.id
                LEFT JOIN users u ON sub.teacher_id = u.id";
    let map_row = |r: &rusqlite::Row<'_>| {
        Ok(json!({
            "subjectId": r.get::<_, String>(0)?,
            "code": r.get::<_, String>(1)?,
            "name": r.get::<_, String>(2)?,
            "description": r.get::<_, Option<String>>(3)?,
            "courseCode": r.get::<_, String>(4)?,
            "teacherName": r.get::<_, Option<String>>(5)?,
        }))
    };

    let subjects = if let Some(cid) = course_id {
        let sql = format!("{} WHERE sub.course_id = ? ORDER BY sub.code", base);
        let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
        stmt.query_map([cid], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db_query)?
    } else if let Some(uid) = teacher_user_id {
        let teacher_id = resolve_teacher(conn, uid)?;
        let sql = format!("{} WHERE sub.teacher_id = ? ORDER BY sub.code", base);
        let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
        stmt.query_map([teacher_id], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db_query)?
    } else {
        let sql = format!("{} ORDER BY sub.code", base);
        let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
        stmt.query_map([], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db_query)?
    };

    Ok(ok(&req.id, json!({ "subjects": subjects })))
}

fn handle_update(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_conn(state)?;
    let subject_id = require_str(&req.params, "subjectId")?;

    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [subject_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db_query)?;
    if exists.is_none() {
        return Err(HandlerErr::not_found("subject not found"));
    }

    if let Some(code) = opt_str(&req.params, "code") {
        let code = code.trim();
        if code.is_empty() {
            return Err(HandlerErr::validation("code must not be empty"));
        }
        conn.execute(
            "UPDATE subjects SET code = ? WHERE id = ?",
            (code, subject_id),
        )
        .map_err(|_| {
            HandlerErr::with_details(
                "conflict",
                "subject code already exists",
                json!({ "code": code }),
            )
        })?;
    }
    if let Some(name) = opt_str(&req.params, "name") {
        let name = name.trim();
        if name.is_empty() {
            return Err(HandlerErr::validation("name must not be empty"));
        }
        conn.execute(
            "UPDATE subjects SET name = ? WHERE id = ?",
            (name, subject_id),
        )
        .map_err(HandlerErr::db_update)?;
    }
    if let Some(description) = opt_str(&req.params, "description") {
        conn.execute(
            "UPDATE subjects SET description = ? WHERE id = ?",
            (description, subject_id),
        )
        .map_err(HandlerErr::db_update)?;
    }
    if let Some(course_id) = opt_str(&req.params, "courseId") {
        resolve_course(conn, course_id)?;
        conn.execute(
            "UPDATE subjects SET course_id = ? WHERE id = ?",
            (course_id, subject_id),
        )
        .map_err(HandlerErr::db_update)?;
    }
    if let Some(uid) = opt_str(&req.params, "teacherUserId") {
        let teacher_id = resolve_teacher(conn, uid)?;
        conn.execute(
            "UPDATE subjects SET teacher_id = ? WHERE id = ?",
            (teacher_id, subject_id),
        )
        .map_err(HandlerErr::db_update)?;
    }

    Ok(ok(&req.id, json!({ "updated": true })))
}

fn handle_delete(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_conn(state)?;
    let subject_id = require_str(&req.params, "subjectId")?;

    let enrollment_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM enrollments WHERE subject_id = ?",
            [subject_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;
    if enrollment_count > 0 {
        return Err(HandlerErr::with_details(
            "conflict",
            "subject still has enrollments",
            json!({ "enrollments": enrollment_count }),
        ));
    }

    let deleted = conn
        .execute("DELETE FROM subjects WHERE id = ?", [subject_id])
        .map_err(HandlerErr::db_update)?;
    if deleted == 0 {
        return Err(HandlerErr::not_found("subject not found"));
    }
    Ok(ok(&req.id, json!({ "deleted": true })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let out = match req.method.as_str() {
        "subjects.create" => handle_create(state, req),
        "subjects.list" => handle_list(state, req),
        "subjects.update" => handle_update(state, req),
        "subjects.delete" => handle_delete(state, req),
        _ => return None,
    };
    Some(out.unwrap_or_else(|e| e.response(&req.id)))
}
