use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_registrard");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn registrard");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn export_then_import_into_fresh_workspace() {
    let workspace = temp_dir("registrar-backup-src");
    let restore_root = temp_dir("registrar-backup-dst");
    let restore_workspace = restore_root.join("restored");
    let bundle_path = restore_root.join("registrar-backup.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let course = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.create",
        json!({ "code": "BSME", "name": "Mechanical Engineering" }),
    );
    let course_id = course["courseId"].as_str().expect("courseId");
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.register",
        json!({ "fullName": "Faye Ramos", "courseId": course_id, "yearLevel": 2 }),
    );
    let student_id = student["studentId"].as_str().expect("studentId").to_string();

    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "gradeSettings.update",
        json!({ "passingGrade": 65.0 }),
    );

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "backup.export",
        json!({ "outPath": bundle_path.to_string_lossy() }),
    );
    assert_eq!(
        exported["bundleFormat"].as_str(),
        Some("registrar-workspace-v1")
    );
    assert_eq!(exported["dbSha256"].as_str().map(str::len), Some(64));
    assert!(bundle_path.is_file());

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "backup.import",
        json!({
            "bundlePath": bundle_path.to_string_lossy(),
            "workspacePath": restore_workspace.to_string_lossy()
        }),
    );
    assert_eq!(
        imported["bundleFormatDetected"].as_str(),
        Some("registrar-workspace-v1")
    );

    // The sidecar now serves the restored workspace.
    let health = request_ok(&mut stdin, &mut reader, "7", "health", json!({}));
    assert_eq!(
        health["workspacePath"].as_str(),
        Some(restore_workspace.to_string_lossy().as_ref())
    );

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "students.get",
        json!({ "studentId": student_id }),
    );
    assert_eq!(
        fetched["student"]["fullName"].as_str(),
        Some("Faye Ramos")
    );

    let settings = request_ok(&mut stdin, &mut reader, "9", "gradeSettings.get", json!({}));
    assert_eq!(settings["settings"]["passingGrade"].as_f64(), Some(65.0));

    let _ = child.kill();
}
