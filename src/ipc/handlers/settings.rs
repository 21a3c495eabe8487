use crate::calc::GradeSettings;
use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{require_conn, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::validate;
use serde_json::{json, Value};

fn weight_from_param(v: &Value, key: &str) -> Result<f64, HandlerErr> {
    // Fractional weights, [0,1], 3-decimal rounding; strings go through the
    // text validator so prompt-driven callers get the same acceptance rule.
    match v {
        Value::String(s) => validate::validate_weight(s).map_err(HandlerErr::validation),
        _ => {
            let Some(n) = v.as_f64() else {
                return Err(HandlerErr::bad_params(format!(
                    "params.{} must be a number",
                    key
                )));
            };
            if !(0.0..=1.0).contains(&n) {
                return Err(HandlerErr::validation("Weight must be between 0 and 1"));
            }
            Ok(crate::calc::round_3(n))
        }
    }
}

fn handle_get(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_conn(state)?;
    let settings = db::load_grade_settings(conn).map_err(HandlerErr::db_query)?;
    Ok(ok(&req.id, json!({ "settings": settings })))
}

fn handle_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_conn(state)?;
    let mut settings = db::load_grade_settings(conn).map_err(HandlerErr::db_query)?;

    if let Some(v) = req.params.get("quizWeight") {
        settings.quiz_weight = weight_from_param(v, "quizWeight")?;
    }
    if let Some(v) = req.params.get("activityWeight") {
        settings.activity_weight = weight_from_param(v, "activityWeight")?;
    }
    if let Some(v) = req.params.get("examWeight") {
        settings.exam_weight = weight_from_param(v, "examWeight")?;
    }
    if let Some(v) = req.params.get("passingGrade") {
        let Some(n) = v.as_f64() else {
            return Err(HandlerErr::bad_params("params.passingGrade must be a number"));
        };
        settings.passing_grade = n;
    }

    // Validate before committing: a rejected update leaves the stored
    // settings untouched.
    settings
        .validate()
        .map_err(|e| HandlerErr::new("invariant_violation", e.message))?;
    db::save_grade_settings(conn, &settings).map_err(HandlerErr::db_update)?;

    Ok(ok(&req.id, json!({ "settings": settings })))
}

fn handle_registration_get(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_conn(state)?;
    let id_length = db::student_id_length(conn).map_err(HandlerErr::db_query)?;
    Ok(ok(&req.id, json!({ "idLength": id_length })))
}

fn handle_registration_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_conn(state)?;
    let Some(id_length) = req.params.get("idLength").and_then(|v| v.as_u64()) else {
        return Err(HandlerErr::bad_params("params.idLength must be an integer"));
    };
    if !(4..=12).contains(&id_length) {
        return Err(HandlerErr::validation("idLength must be between 4 and 12"));
    }
    db::settings_set_json(
        conn,
        db::REGISTRATION_SETTINGS_KEY,
        &json!({ "idLength": id_length }),
    )
    .map_err(HandlerErr::db_update)?;
    Ok(ok(&req.id, json!({ "idLength": id_length })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let out = match req.method.as_str() {
        "gradeSettings.get" => handle_get(state, req),
        "gradeSettings.update" => handle_update(state, req),
        "registrationSettings.get" => handle_registration_get(state, req),
        "registrationSettings.update" => handle_registration_update(state, req),
        _ => return None,
    };
    Some(out.unwrap_or_else(|e| e.response(&req.id)))
}
