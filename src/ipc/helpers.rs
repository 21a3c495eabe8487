use crate::calc::round_2;
use crate::ipc::error::err;
use crate::ipc::types::AppState;
use crate::validate;
use rusqlite::Connection;
use serde_json::{json, Value};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(code: &'static str, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_failed", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn db_query(e: impl std::fmt::Display) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    pub fn db_update(e: impl std::fmt::Display) -> Self {
        Self::new("db_update_failed", e.to_string())
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn require_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn require_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing params.{}", key)))
}

pub fn opt_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

pub fn opt_i64(params: &Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("params.{} must be an integer", key))),
    }
}

/// Score parameters arrive as JSON numbers from portal front ends and as
/// raw strings from text prompts; both go through the same acceptance rule:
/// [0,100], rounded to 2 decimals.
pub fn opt_score(params: &Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(Value::String(s)) => validate::validate_score(s)
            .map(Some)
            .map_err(|reason| HandlerErr::with_details("validation_failed", reason, json!({ "field": key }))),
        Some(v) => {
            let Some(n) = v.as_f64() else {
                return Err(HandlerErr::bad_params(format!(
                    "params.{} must be a number",
                    key
                )));
            };
            if !(0.0..=100.0).contains(&n) {
                return Err(HandlerErr::with_details(
                    "validation_failed",
                    "Grade must be between 0 and 100",
                    json!({ "field": key }),
                ));
            }
            Ok(Some(round_2(n)))
        }
    }
}

pub fn opt_f64(params: &Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("params.{} must be a number", key))),
    }
}

/// Random digit string of the given length, leading zeros allowed. Drawn
/// from UUIDv4 entropy; callers loop until the id is unused.
pub fn random_digit_id(len: usize) -> String {
    let n = u128::from_le_bytes(*uuid::Uuid::new_v4().as_bytes());
    let modulus = 10u128.pow(len as u32);
    format!("{:0width$}", n % modulus, width = len)
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

pub fn today() -> String {
    chrono::Utc::now().date_naive().to_string()
}
