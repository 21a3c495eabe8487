use crate::ipc::error::ok;
use crate::ipc::helpers::{now_rfc3339, opt_str, require_conn, require_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_request_enrollment(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_conn(state)?;
    let student_id = require_str(&req.params, "studentId")?;
    let subject_id = require_str(&req.params, "subjectId")?;

    let student_status: Option<String> = conn
        .query_row(
            "SELECT status FROM students WHERE student_id = ?",
            [student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    match student_status.as_deref() {
        None => return Err(HandlerErr::not_found("student not found")),
        Some("active") => {}
        Some(_) => {
            return Err(HandlerErr::with_details(
                "conflict",
                "student is not active",
                json!({ "studentId": student_id }),
            ))
        }
    }
    let subject_exists: Option<i64> = conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [subject_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db_query)?;
    if subject_exists.is_none() {
        return Err(HandlerErr::not_found("subject not found"));
    }

    let enrollment_id = Uuid::new_v4().to_string();
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO enrollments(id, student_id, subject_id, status, requested_at)
             VALUES(?, ?, ?, 'pending', ?)",
            (&enrollment_id, student_id, subject_id, now_rfc3339()),
        )
        .map_err(HandlerErr::db_update)?;
    if inserted == 0 {
        return Err(HandlerErr::with_details(
            "conflict",
            "enrollment already requested",
            json!({ "studentId": student_id, "subjectId": subject_id }),
        ));
    }

    Ok(ok(
        &req.id,
        json!({ "enrollmentId": enrollment_id, "status": "pending" }),
    ))
}

fn enrollment_row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "enrollmentId": r.get::<_, String>(0)?,
        "studentId": r.get::<_, String>(1)?,
        "studentName": r.get::<_, String>(2)?,
        "subjectCode": r.get::<_, String>(3)?,
        "subjectName": r.get::<_, String>(4)?,
        "status": r.get::<_, String>(5)?,
        "requestedAt": r.get::<_, Option<String>>(6)?,
    }))
}

const ENROLLMENT_SELECT: &str = "SELECT e.id, e.student_id, s.full_name, sub.code, sub.name,
           e.status, e.requested_at
    FROM enrollments e
    JOIN students s ON e.student_id = s.student_id
    JOIN subjects sub ON e.subject_id = sub.id";

fn handle_list_pending(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_conn(state)?;

    let enrollments = if let Some(uid) = opt_str(&req.params, "teacherUserId") {
        let teacher_id: Option<String> = conn
            .query_row("SELECT id FROM users WHERE user_id = ?", [uid], |r| {
                r.get(0)
            })
            .optional()
            .map_err(HandlerErr::db_query)?;
        let Some(teacher_id) = teacher_id else {
            return Err(HandlerErr::not_found("teacher not found"));
        };
        let sql = format!(
            "{} WHERE e.status = 'pending' AND sub.teacher_id = ? ORDER BY e.requested_at",
            ENROLLMENT_SELECT
        );
        let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
        stmt.query_map([teacher_id], enrollment_row_json)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db_query)?
    } else if let Some(subject_id) = opt_str(&req.params, "subjectId") {
        let sql = format!(
            "{} WHERE e.status = 'pending' AND e.subject_id = ? ORDER BY e.requested_at",
            ENROLLMENT_SELECT
        );
        let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
        stmt.query_map([subject_id], enrollment_row_json)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db_query)?
    } else {
        let sql = format!(
            "{} WHERE e.status = 'pending' ORDER BY e.requested_at",
            ENROLLMENT_SELECT
        );
        let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
        stmt.query_map([], enrollment_row_json)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db_query)?
    };

    Ok(ok(&req.id, json!({ "enrollments": enrollments })))
}

fn handle_set_status(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_conn(state)?;
    let enrollment_id = require_str(&req.params, "enrollmentId")?;
    let status = require_str(&req.params, "status")?;
    if status != "approved" && status != "denied" {
        return Err(HandlerErr::bad_params(
            "status must be one of: approved, denied",
        ));
    }

    let updated = conn
        .execute(
            "UPDATE enrollments SET status = ? WHERE id = ?",
            (status, enrollment_id),
        )
        .map_err(HandlerErr::db_update)?;
    if updated == 0 {
        return Err(HandlerErr::not_found("enrollment not found"));
    }

    Ok(ok(&req.id, json!({ "status": status })))
}

fn handle_list_by_student(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_conn(state)?;
    let student_id = require_str(&req.params, "studentId")?;
    let sql = format!(
        "{} WHERE e.student_id = ? ORDER BY sub.code",
        ENROLLMENT_SELECT
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let enrollments = stmt
        .query_map([student_id], enrollment_row_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(ok(&req.id, json!({ "enrollments": enrollments })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let out = match req.method.as_str() {
        "enrollments.request" => handle_request_enrollment(state, req),
        "enrollments.listPending" => handle_list_pending(state, req),
        "enrollments.setStatus" => handle_set_status(state, req),
        "enrollments.listByStudent" => handle_list_by_student(state, req),
        _ => return None,
    };
    Some(out.unwrap_or_else(|e| e.response(&req.id)))
}
