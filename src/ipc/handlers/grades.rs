use crate::calc::{
    diff_components, letter_grade, pass_fail, ComponentScore, ComponentWeights, Components,
    FinalScore, GradeRecord, GradeSettings,
};
use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    now_rfc3339, opt_f64, opt_score, opt_str, require_conn, require_str, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct StoredGrade {
    mode: String,
    components: Components,
    legacy_grade: Option<f64>,
    weights: Option<ComponentWeights>,
}

impl StoredGrade {
    fn record(&self) -> GradeRecord {
        if self.mode == "legacy" {
            GradeRecord::Legacy {
                grade: self.legacy_grade.unwrap_or(0.0),
            }
        } else {
            GradeRecord::Component {
                activity: self.components.activity,
                quiz: self.components.quiz,
                exam: self.components.exam,
                weights: self.weights,
            }
        }
    }
}

/// Grade operations address an enrollment directly or by the
/// (studentId, subjectId) pair.
fn resolve_enrollment(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<String, HandlerErr> {
    if let Some(eid) = opt_str(params, "enrollmentId") {
        let found: Option<String> = conn
            .query_row("SELECT id FROM enrollments WHERE id = ?", [eid], |r| {
                r.get(0)
            })
            .optional()
            .map_err(HandlerErr::db_query)?;
        return found.ok_or_else(|| HandlerErr::not_found("enrollment not found"));
    }
    let (Some(student_id), Some(subject_id)) =
        (opt_str(params, "studentId"), opt_str(params, "subjectId"))
    else {
        return Err(HandlerErr::bad_params(
            "provide enrollmentId or studentId + subjectId",
        ));
    };
    let found: Option<String> = conn
        .query_row(
            "SELECT id FROM enrollments WHERE student_id = ? AND subject_id = ?",
            (student_id, subject_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    found.ok_or_else(|| HandlerErr::not_found("enrollment not found"))
}

fn load_stored_grade(
    conn: &Connection,
    enrollment_id: &str,
) -> Result<Option<StoredGrade>, HandlerErr> {
    conn.query_row(
        "SELECT mode, quiz, activity, exam, legacy_grade,
                quiz_weight, activity_weight, exam_weight
         FROM grades WHERE enrollment_id = ?",
        [enrollment_id],
        |r| {
            let weights = match (
                r.get::<_, Option<f64>>(5)?,
                r.get::<_, Option<f64>>(6)?,
                r.get::<_, Option<f64>>(7)?,
            ) {
                (Some(quiz), Some(activity), Some(exam)) => Some(ComponentWeights {
                    activity,
                    quiz,
                    exam,
                }),
                _ => None,
            };
            Ok(StoredGrade {
                mode: r.get(0)?,
                components: Components {
                    quiz: ComponentScore::from_opt(r.get(1)?),
                    activity: ComponentScore::from_opt(r.get(2)?),
                    exam: ComponentScore::from_opt(r.get(3)?),
                },
                legacy_grade: r.get(4)?,
                weights,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::db_query)
}

fn grade_view(stored: &StoredGrade, settings: &GradeSettings, threshold: f64) -> Result<serde_json::Value, HandlerErr> {
    let record = stored.record();
    let final_score = record
        .final_score(settings)
        .map_err(|e| HandlerErr::new("invariant_violation", e.message))?;
    let (final_value, status) = match final_score {
        FinalScore::Pending => (None, "pending"),
        FinalScore::Ready(v) => (Some(v), "final"),
    };
    Ok(json!({
        "mode": record.mode_label(),
        "quiz": stored.components.quiz.value(),
        "activity": stored.components.activity.value(),
        "exam": stored.components.exam.value(),
        "legacyGrade": stored.legacy_grade,
        "weights": stored.weights,
        "finalScore": final_value,
        "status": status,
        "letterGrade": final_value.map(letter_grade),
        "remarks": final_value.map(|v| pass_fail(v, threshold)),
    }))
}

fn effective_threshold(
    params: &serde_json::Value,
    settings: &GradeSettings,
) -> Result<f64, HandlerErr> {
    match opt_f64(params, "passingThreshold")? {
        Some(t) if (0.0..=100.0).contains(&t) => Ok(t),
        Some(_) => Err(HandlerErr::bad_params(
            "passingThreshold must be between 0 and 100",
        )),
        None => Ok(settings.passing_grade),
    }
}

fn handle_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_conn(state)?;
    let enrollment_id = resolve_enrollment(conn, &req.params)?;
    // No row yet means nothing has been entered: an all-pending component
    // record, not an error. The row itself is created on first update so
    // that initial values never generate audit entries.
    let stored = load_stored_grade(conn, &enrollment_id)?.unwrap_or(StoredGrade {
        mode: "component".to_string(),
        components: Components::default(),
        legacy_grade: None,
        weights: None,
    });
    let settings = db::load_grade_settings(conn).map_err(HandlerErr::db_query)?;
    let threshold = effective_threshold(&req.params, &settings)?;
    let view = grade_view(&stored, &settings, threshold)?;
    Ok(ok(
        &req.id,
        json!({ "enrollmentId": enrollment_id, "grade": view }),
    ))
}

fn parse_weights_param(params: &serde_json::Value) -> Result<Option<ComponentWeights>, HandlerErr> {
    let Some(raw) = params.get("weights") else {
        return Ok(None);
    };
    let Some(obj) = raw.as_object() else {
        return Err(HandlerErr::bad_params("weights must be an object"));
    };
    let mut out = [0.0f64; 3];
    for (i, key) in ["activity", "quiz", "exam"].iter().enumerate() {
        let Some(v) = obj.get(*key).and_then(|v| v.as_f64()) else {
            return Err(HandlerErr::bad_params(format!(
                "weights.{} must be a number",
                key
            )));
        };
        if v < 0.0 {
            return Err(HandlerErr::validation("weights must be non-negative"));
        }
        out[i] = v;
    }
    if out.iter().sum::<f64>() == 0.0 {
        return Err(HandlerErr::new(
            "invariant_violation",
            "weights must not all be zero",
        ));
    }
    Ok(Some(ComponentWeights {
        activity: out[0],
        quiz: out[1],
        exam: out[2],
    }))
}

fn require_approved(conn: &Connection, enrollment_id: &str) -> Result<(), HandlerErr> {
    let status: String = conn
        .query_row(
            "SELECT status FROM enrollments WHERE id = ?",
            [enrollment_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;
    if status != "approved" {
        return Err(HandlerErr::with_details(
            "conflict",
            "enrollment is not approved",
            json!({ "status": status }),
        ));
    }
    Ok(())
}

fn append_audit_entries(
    conn: &Connection,
    enrollment_id: &str,
    changes: &[crate::calc::GradeFieldChange],
    changed_by: &str,
) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let changed_at = now_rfc3339();
    let mut entries = Vec::with_capacity(changes.len());
    for change in changes {
        let audit_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO grade_audit(id, enrollment_id, field, old_value, new_value, changed_by, changed_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                &audit_id,
                enrollment_id,
                change.field,
                change.old_value,
                change.new_value,
                changed_by,
                &changed_at,
            ),
        )
        .map_err(HandlerErr::db_update)?;
        entries.push(json!({
            "auditId": audit_id,
            "field": change.field,
            "oldValue": change.old_value,
            "newValue": change.new_value,
            "changedBy": changed_by,
            "changedAt": changed_at,
        }));
    }
    Ok(entries)
}

fn handle_update(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_conn(state)?;
    let enrollment_id = resolve_enrollment(conn, &req.params)?;
    require_approved(conn, &enrollment_id)?;
    let changed_by = opt_str(&req.params, "changedBy").unwrap_or("system");

    let quiz = opt_score(&req.params, "quiz")?;
    let activity = opt_score(&req.params, "activity")?;
    let exam = opt_score(&req.params, "exam")?;
    let weights = parse_weights_param(&req.params)?;
    if quiz.is_none() && activity.is_none() && exam.is_none() && weights.is_none() {
        return Err(HandlerErr::bad_params(
            "nothing to update: provide quiz, activity, exam, or weights",
        ));
    }

    let existing = load_stored_grade(conn, &enrollment_id)?;
    // Updating components moves a legacy record to component mode; only a
    // pre-existing row yields audit entries.
    let old_components = existing.as_ref().map(|s| s.components);
    let prior_weights = existing.as_ref().and_then(|s| s.weights);

    let merged = Components {
        quiz: quiz
            .map(ComponentScore::Scored)
            .unwrap_or(old_components.map(|c| c.quiz).unwrap_or_default()),
        activity: activity
            .map(ComponentScore::Scored)
            .unwrap_or(old_components.map(|c| c.activity).unwrap_or_default()),
        exam: exam
            .map(ComponentScore::Scored)
            .unwrap_or(old_components.map(|c| c.exam).unwrap_or_default()),
    };
    let effective_weights = weights.or(prior_weights);

    conn.execute(
        "INSERT INTO grades(enrollment_id, mode, quiz, activity, exam, legacy_grade,
                            quiz_weight, activity_weight, exam_weight, updated_at)
         VALUES(?, 'component', ?, ?, ?, NULL, ?, ?, ?, ?)
         ON CONFLICT(enrollment_id) DO UPDATE SET
           mode = 'component',
           quiz = excluded.quiz,
           activity = excluded.activity,
           exam = excluded.exam,
           legacy_grade = NULL,
           quiz_weight = excluded.quiz_weight,
           activity_weight = excluded.activity_weight,
           exam_weight = excluded.exam_weight,
           updated_at = excluded.updated_at",
        (
            &enrollment_id,
            merged.quiz.value(),
            merged.activity.value(),
            merged.exam.value(),
            effective_weights.map(|w| w.quiz),
            effective_weights.map(|w| w.activity),
            effective_weights.map(|w| w.exam),
            now_rfc3339(),
        ),
    )
    .map_err(HandlerErr::db_update)?;

    let changes = diff_components(old_components, merged);
    let entries = append_audit_entries(conn, &enrollment_id, &changes, changed_by)?;

    let settings = db::load_grade_settings(conn).map_err(HandlerErr::db_query)?;
    let threshold = effective_threshold(&req.params, &settings)?;
    let stored = StoredGrade {
        mode: "component".to_string(),
        components: merged,
        legacy_grade: None,
        weights: effective_weights,
    };
    let view = grade_view(&stored, &settings, threshold)?;

    Ok(ok(
        &req.id,
        json!({
            "enrollmentId": enrollment_id,
            "grade": view,
            "auditEntries": entries,
        }),
    ))
}

fn handle_set_legacy(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_conn(state)?;
    let enrollment_id = resolve_enrollment(conn, &req.params)?;
    require_approved(conn, &enrollment_id)?;
    let changed_by = opt_str(&req.params, "changedBy").unwrap_or("system");
    let Some(grade) = opt_score(&req.params, "grade")? else {
        return Err(HandlerErr::bad_params("missing params.grade"));
    };

    let existing = load_stored_grade(conn, &enrollment_id)?;
    let old_components = existing.as_ref().map(|s| s.components);

    conn.execute(
        "INSERT INTO grades(enrollment_id, mode, quiz, activity, exam, legacy_grade,
                            quiz_weight, activity_weight, exam_weight, updated_at)
         VALUES(?, 'legacy', NULL, NULL, NULL, ?, NULL, NULL, NULL, ?)
         ON CONFLICT(enrollment_id) DO UPDATE SET
           mode = 'legacy',
           quiz = NULL,
           activity = NULL,
           exam = NULL,
           legacy_grade = excluded.legacy_grade,
           quiz_weight = NULL,
           activity_weight = NULL,
           exam_weight = NULL,
           updated_at = excluded.updated_at",
        (&enrollment_id, grade, now_rfc3339()),
    )
    .map_err(HandlerErr::db_update)?;

    // Component values cleared by the mode switch are audited as changes to
    // "no value"; the legacy scalar itself lives outside the audited fields.
    let changes = diff_components(old_components, Components::default());
    let entries = append_audit_entries(conn, &enrollment_id, &changes, changed_by)?;

    let settings = db::load_grade_settings(conn).map_err(HandlerErr::db_query)?;
    let threshold = effective_threshold(&req.params, &settings)?;
    let stored = StoredGrade {
        mode: "legacy".to_string(),
        components: Components::default(),
        legacy_grade: Some(grade),
        weights: None,
    };
    let view = grade_view(&stored, &settings, threshold)?;

    Ok(ok(
        &req.id,
        json!({
            "enrollmentId": enrollment_id,
            "grade": view,
            "auditEntries": entries,
        }),
    ))
}

fn handle_audit(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_conn(state)?;
    let enrollment_id = resolve_enrollment(conn, &req.params)?;
    let mut stmt = conn
        .prepare(
            "SELECT id, field, old_value, new_value, changed_by, changed_at
             FROM grade_audit
             WHERE enrollment_id = ?
             ORDER BY changed_at DESC, rowid DESC",
        )
        .map_err(HandlerErr::db_query)?;
    let entries = stmt
        .query_map([&enrollment_id], |r| {
            Ok(json!({
                "auditId": r.get::<_, String>(0)?,
                "field": r.get::<_, String>(1)?,
                "oldValue": r.get::<_, Option<f64>>(2)?,
                "newValue": r.get::<_, Option<f64>>(3)?,
                "changedBy": r.get::<_, String>(4)?,
                "changedAt": r.get::<_, String>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(ok(
        &req.id,
        json!({ "enrollmentId": enrollment_id, "entries": entries }),
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let out = match req.method.as_str() {
        "grades.get" => handle_get(state, req),
        "grades.update" => handle_update(state, req),
        "grades.setLegacy" => handle_set_legacy(state, req),
        "grades.audit" => handle_audit(state, req),
        _ => return None,
    };
    Some(out.unwrap_or_else(|e| e.response(&req.id)))
}
