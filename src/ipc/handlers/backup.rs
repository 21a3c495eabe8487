use crate::backup;
use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{require_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_export(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(workspace) = state.workspace.clone() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let out_path = PathBuf::from(require_str(&req.params, "outPath")?);

    let summary = backup::export_workspace_bundle(&workspace, &out_path)
        .map_err(|e| HandlerErr::new("export_failed", format!("{e:#}")))?;
    Ok(ok(
        &req.id,
        json!({
            "bundleFormat": summary.bundle_format,
            "dbSha256": summary.db_sha256,
            "outPath": out_path.to_string_lossy(),
        }),
    ))
}

/// Importing re-opens the database so the restored workspace is live
/// immediately.
fn handle_import(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let bundle_path = PathBuf::from(require_str(&req.params, "bundlePath")?);
    let workspace_path = PathBuf::from(require_str(&req.params, "workspacePath")?);

    let summary = backup::import_workspace_bundle(&bundle_path, &workspace_path)
        .map_err(|e| HandlerErr::new("import_failed", format!("{e:#}")))?;
    let conn = db::open_db(&workspace_path)
        .map_err(|e| HandlerErr::new("db_open_failed", format!("{e:?}")))?;
    state.workspace = Some(workspace_path.clone());
    state.db = Some(conn);

    Ok(ok(
        &req.id,
        json!({
            "bundleFormatDetected": summary.bundle_format_detected,
            "workspacePath": workspace_path.to_string_lossy(),
        }),
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let out = match req.method.as_str() {
        "backup.export" => handle_export(state, req),
        "backup.import" => handle_import(state, req),
        _ => return None,
    };
    Some(out.unwrap_or_else(|e| e.response(&req.id)))
}
