use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    now_rfc3339, opt_i64, opt_str, random_digit_id, require_conn, require_str, today, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::validate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn generate_student_id(conn: &Connection, len: usize) -> Result<String, HandlerErr> {
    loop {
        let candidate = random_digit_id(len);
        let taken: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM students WHERE student_id = ?",
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

fn course_exists(conn: &Connection, course_id: &str) -> Result<bool, HandlerErr> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM courses WHERE id = ?", [course_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db_query)?;
    Ok(found.is_some())
}

fn year_level_from_params(params: &serde_json::Value) -> Result<i64, HandlerErr> {
    // Accept a number from portal callers or raw text from prompt loops.
    match params.get("yearLevel") {
        Some(serde_json::Value::String(s)) => {
            validate::validate_year_level(s).map_err(HandlerErr::validation)
        }
        _ => match opt_i64(params, "yearLevel")? {
            Some(y) if (1..=4).contains(&y) => Ok(y),
            Some(_) => Err(HandlerErr::validation("Year level must be between 1 and 4")),
            None => Err(HandlerErr::bad_params("missing params.yearLevel")),
        },
    }
}

fn handle_register(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_conn(state)?;
    let full_name = validate::validate_name(require_str(&req.params, "fullName")?)
        .map_err(HandlerErr::validation)?;
    let email = validate::validate_email(opt_str(&req.params, "email").unwrap_or(""))
        .map_err(HandlerErr::validation)?;
    let course_id = require_str(&req.params, "courseId")?;
    if !course_exists(conn, course_id)? {
        return Err(HandlerErr::not_found("course not found"));
    }
    let year_level = year_level_from_params(&req.params)?;

    let id_len = db::student_id_length(conn).map_err(HandlerErr::db_query)?;
    // Callers may assign a known id (imports, re-registration); otherwise
    // one is generated.
    let student_id = match opt_str(&req.params, "studentId") {
        Some(raw) => {
            let id = validate::validate_student_id(raw, id_len).map_err(HandlerErr::validation)?;
            let taken: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM students WHERE student_id = ?",
                    [&id],
                    |r| r.get(0),
                )
                .optional()
                .map_err(HandlerErr::db_query)?;
            if taken.is_some() {
                return Err(HandlerErr::with_details(
                    "conflict",
                    "student id already in use",
                    json!({ "studentId": id }),
                ));
            }
            id
        }
        None => generate_student_id(conn, id_len)?,
    };
    conn.execute(
        "INSERT INTO students(student_id, full_name, email, course_id, year_level, status, enrolled_on, updated_at)
         VALUES(?, ?, ?, ?, ?, 'active', ?, ?)",
        (
            &student_id,
            &full_name,
            if email.is_empty() { None } else { Some(&email) },
            course_id,
            year_level,
            today(),
            now_rfc3339(),
        ),
    )
    .map_err(HandlerErr::db_update)?;

    Ok(ok(
        &req.id,
        json!({ "studentId": student_id, "fullName": full_name }),
    ))
}

fn student_row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "studentId": r.get::<_, String>(0)?,
        "fullName": r.get::<_, String>(1)?,
        "email": r.get::<_, Option<String>>(2)?,
        "yearLevel": r.get::<_, i64>(3)?,
        "status": r.get::<_, String>(4)?,
        "enrolledOn": r.get::<_, Option<String>>(5)?,
        "courseId": r.get::<_, String>(6)?,
        "courseCode": r.get::<_, String>(7)?,
        "courseName": r.get::<_, String>(8)?,
    }))
}

const STUDENT_SELECT: &str = "SELECT s.student_id, s.full_name, s.email, s.year_level,
           s.status, s.enrolled_on, s.course_id, c.code, c.name
    FROM students s
    JOIN courses c ON s.course_id = c.id";

fn handle_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_conn(state)?;
    let course_id = opt_str(&req.params, "courseId");
    let include_inactive = req
        .params
        .get("includeInactive")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let status_clause = if include_inactive {
        ""
    } else {
        " AND s.status = 'active'"
    };
    let students = if let Some(cid) = course_id {
        let sql = format!(
            "{} WHERE s.course_id = ?{} ORDER BY s.full_name",
            STUDENT_SELECT, status_clause
        );
        let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
        stmt.query_map([cid], student_row_json)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db_query)?
    } else {
        let sql = format!(
            "{} WHERE 1=1{} ORDER BY s.full_name",
            STUDENT_SELECT, status_clause
        );
        let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
        stmt.query_map([], student_row_json)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db_query)?
    };

    Ok(ok(&req.id, json!({ "students": students })))
}

fn handle_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_conn(state)?;
    let student_id = require_str(&req.params, "studentId")?;
    let sql = format!("{} WHERE s.student_id = ?", STUDENT_SELECT);
    let student = conn
        .query_row(&sql, [student_id], student_row_json)
        .optional()
        .map_err(HandlerErr::db_query)?;
    match student {
        Some(s) => Ok(ok(&req.id, json!({ "student": s }))),
        None => Err(HandlerErr::not_found("student not found")),
    }
}

fn handle_update(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_conn(state)?;
    let student_id = require_str(&req.params, "studentId")?;

    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE student_id = ?",
            [student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    if exists.is_none() {
        return Err(HandlerErr::not_found("student not found"));
    }

    if let Some(raw) = opt_str(&req.params, "fullName") {
        let name = validate::validate_name(raw).map_err(HandlerErr::validation)?;
        conn.execute(
            "UPDATE students SET full_name = ? WHERE student_id = ?",
            (&name, student_id),
        )
        .map_err(HandlerErr::db_update)?;
    }
    if let Some(raw) = opt_str(&req.params, "email") {
        let email = validate::validate_email(raw).map_err(HandlerErr::validation)?;
        conn.execute(
            "UPDATE students SET email = ? WHERE student_id = ?",
            (
                if email.is_empty() { None } else { Some(&email) },
                student_id,
            ),
        )
        .map_err(HandlerErr::db_update)?;
    }
    if let Some(course_id) = opt_str(&req.params, "courseId") {
        if !course_exists(conn, course_id)? {
            return Err(HandlerErr::not_found("course not found"));
        }
        conn.execute(
            "UPDATE students SET course_id = ? WHERE student_id = ?",
            (course_id, student_id),
        )
        .map_err(HandlerErr::db_update)?;
    }
    if req.params.get("yearLevel").is_some() {
        let year_level = year_level_from_params(&req.params)?;
        conn.execute(
            "UPDATE students SET year_level = ? WHERE student_id = ?",
            (year_level, student_id),
        )
        .map_err(HandlerErr::db_update)?;
    }
    conn.execute(
        "UPDATE students SET updated_at = ? WHERE student_id = ?",
        (now_rfc3339(), student_id),
    )
    .map_err(HandlerErr::db_update)?;

    Ok(ok(&req.id, json!({ "updated": true })))
}

fn handle_set_status(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_conn(state)?;
    let student_id = require_str(&req.params, "studentId")?;
    let status = require_str(&req.params, "status")?;
    if status != "active" && status != "inactive" {
        return Err(HandlerErr::bad_params(
            "status must be one of: active, inactive",
        ));
    }
    let updated = conn
        .execute(
            "UPDATE students SET status = ?, updated_at = ? WHERE student_id = ?",
            (status, now_rfc3339(), student_id),
        )
        .map_err(HandlerErr::db_update)?;
    if updated == 0 {
        return Err(HandlerErr::not_found("student not found"));
    }
    Ok(ok(&req.id, json!({ "status": status })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let out = match req.method.as_str() {
        "students.register" => handle_register(state, req),
        "students.list" => handle_list(state, req),
        "students.get" => handle_get(state, req),
        "students.update" => handle_update(state, req),
        "students.setStatus" => handle_set_status(state, req),
        _ => return None,
    };
    Some(out.unwrap_or_else(|e| e.response(&req.id)))
}
