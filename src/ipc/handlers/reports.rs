use crate::calc::{
    letter_grade, pass_fail, ComponentScore, ComponentWeights, Components, GradeRecord,
    GradeSettings,
};
use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{opt_f64, opt_i64, opt_str, require_conn, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::cmp::Ordering;

struct ReportRow {
    student_id: String,
    full_name: String,
    course_code: String,
    subject_code: String,
    quiz: Option<f64>,
    activity: Option<f64>,
    exam: Option<f64>,
    final_score: Option<f64>,
}

impl ReportRow {
    fn to_json(&self, threshold: f64) -> serde_json::Value {
        json!({
            "studentId": self.student_id,
            "fullName": self.full_name,
            "courseCode": self.course_code,
            "subjectCode": self.subject_code,
            "quiz": self.quiz,
            "activity": self.activity,
            "exam": self.exam,
            "finalScore": self.final_score,
            "letterGrade": self.final_score.map(letter_grade),
            "remarks": self.final_score.map(|v| pass_fail(v, threshold)),
        })
    }
}

/// Final scores are derived here with the settings active right now, never
/// read back from storage, so reports can't go stale across settings
/// changes.
fn collect_rows(
    conn: &Connection,
    settings: &GradeSettings,
    course_id: Option<&str>,
) -> Result<Vec<ReportRow>, HandlerErr> {
    let base = "SELECT s.student_id, s.full_name, c.code, sub.code,
                       g.mode, g.quiz, g.activity, g.exam, g.legacy_grade,
                       g.quiz_weight, g.activity_weight, g.exam_weight
                FROM enrollments e
                JOIN students s ON e.student_id = s.student_id
                JOIN subjects sub ON e.subject_id = sub.id
                JOIN courses c ON s.course_id = c.id
                JOIN grades g ON g.enrollment_id = e.id
                WHERE e.status = 'approved' AND s.status = 'active'";

    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<(ReportRow, GradeRecord)> {
        let mode: String = r.get(4)?;
        let quiz: Option<f64> = r.get(5)?;
        let activity: Option<f64> = r.get(6)?;
        let exam: Option<f64> = r.get(7)?;
        let legacy_grade: Option<f64> = r.get(8)?;
        let weights = match (
            r.get::<_, Option<f64>>(9)?,
            r.get::<_, Option<f64>>(10)?,
            r.get::<_, Option<f64>>(11)?,
        ) {
            (Some(q), Some(a), Some(e)) => Some(ComponentWeights {
                activity: a,
                quiz: q,
                exam: e,
            }),
            _ => None,
        };
        let record = if mode == "legacy" {
            GradeRecord::Legacy {
                grade: legacy_grade.unwrap_or(0.0),
            }
        } else {
            let c = Components {
                quiz: ComponentScore::from_opt(quiz),
                activity: ComponentScore::from_opt(activity),
                exam: ComponentScore::from_opt(exam),
            };
            GradeRecord::Component {
                activity: c.activity,
                quiz: c.quiz,
                exam: c.exam,
                weights,
            }
        };
        Ok((
            ReportRow {
                student_id: r.get(0)?,
                full_name: r.get(1)?,
                course_code: r.get(2)?,
                subject_code: r.get(3)?,
                quiz,
                activity,
                exam,
                final_score: None,
            },
            record,
        ))
    };

    let raw: Vec<(ReportRow, GradeRecord)> = if let Some(cid) = course_id {
        let sql = format!("{} AND s.course_id = ?", base);
        let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
        stmt.query_map([cid], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db_query)?
    } else {
        let mut stmt = conn.prepare(base).map_err(HandlerErr::db_query)?;
        stmt.query_map([], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db_query)?
    };

    let mut rows = Vec::with_capacity(raw.len());
    for (mut row, record) in raw {
        let final_score = record
            .final_score(settings)
            .map_err(|e| HandlerErr::new("invariant_violation", e.message))?;
        row.final_score = final_score.value();
        rows.push(row);
    }
    Ok(rows)
}

fn sort_final_desc(rows: &mut [ReportRow]) {
    // Highest first; pending grades sink to the bottom.
    rows.sort_by(|a, b| match (a.final_score, b.final_score) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.full_name.cmp(&b.full_name),
    });
}

fn handle_grade_report(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_conn(state)?;
    let settings = db::load_grade_settings(conn).map_err(HandlerErr::db_query)?;
    let mut rows = collect_rows(conn, &settings, opt_str(&req.params, "courseId"))?;
    sort_final_desc(&mut rows);
    let report: Vec<_> = rows
        .iter()
        .map(|r| r.to_json(settings.passing_grade))
        .collect();
    Ok(ok(&req.id, json!({ "report": report })))
}

fn handle_top_performers(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_conn(state)?;
    let limit = match opt_i64(&req.params, "limit")? {
        Some(n) if n > 0 => n as usize,
        Some(_) => return Err(HandlerErr::bad_params("limit must be positive")),
        None => 10,
    };
    let settings = db::load_grade_settings(conn).map_err(HandlerErr::db_query)?;
    let mut rows = collect_rows(conn, &settings, None)?;
    rows.retain(|r| r.final_score.is_some());
    sort_final_desc(&mut rows);
    rows.truncate(limit);
    let top: Vec<_> = rows
        .iter()
        .map(|r| r.to_json(settings.passing_grade))
        .collect();
    Ok(ok(&req.id, json!({ "topPerformers": top })))
}

fn handle_at_risk(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_conn(state)?;
    let settings = db::load_grade_settings(conn).map_err(HandlerErr::db_query)?;
    let threshold = match opt_f64(&req.params, "threshold")? {
        Some(t) if (0.0..=100.0).contains(&t) => t,
        Some(_) => {
            return Err(HandlerErr::bad_params(
                "threshold must be between 0 and 100",
            ))
        }
        None => settings.passing_grade,
    };
    let mut rows = collect_rows(conn, &settings, None)?;
    rows.retain(|r| r.final_score.map(|v| v < threshold).unwrap_or(false));
    // Lowest first: the students most at risk lead the list.
    rows.sort_by(|a, b| {
        a.final_score
            .partial_cmp(&b.final_score)
            .unwrap_or(Ordering::Equal)
    });
    let at_risk: Vec<_> = rows.iter().map(|r| r.to_json(threshold)).collect();
    Ok(ok(
        &req.id,
        json!({ "threshold": threshold, "atRisk": at_risk }),
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let out = match req.method.as_str() {
        "reports.gradeReport" => handle_grade_report(state, req),
        "reports.topPerformers" => handle_top_performers(state, req),
        "reports.atRisk" => handle_at_risk(state, req),
        _ => return None,
    };
    Some(out.unwrap_or_else(|e| e.response(&req.id)))
}
