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

fn request(
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
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn account_creation_and_login() {
    let workspace = temp_dir("registrar-auth");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    // Every data method is refused until a workspace is selected.
    let early = request(
        &mut stdin,
        &mut reader,
        "1",
        "auth.login",
        json!({ "userId": "123456", "password": "pw" }),
    );
    assert_eq!(early["error"]["code"].as_str(), Some("no_workspace"));

    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "auth.createUser",
        json!({
            "name": "Nora Velasco",
            "email": "n.velasco@uni.edu",
            "password": "hunter2",
            "role": "teacher",
            "position": "Instructor I"
        }),
    );
    let user_id = created["userId"].as_str().expect("userId").to_string();
    assert_eq!(user_id.len(), 6);
    assert!(user_id.chars().all(|c| c.is_ascii_digit()));
    assert_eq!(created["role"].as_str(), Some("teacher"));

    let login = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "auth.login",
        json!({ "userId": user_id, "password": "hunter2" }),
    );
    assert_eq!(login["name"].as_str(), Some("Nora Velasco"));
    assert_eq!(login["role"].as_str(), Some("teacher"));

    let wrong = request(
        &mut stdin,
        &mut reader,
        "5",
        "auth.login",
        json!({ "userId": user_id, "password": "hunter3" }),
    );
    assert_eq!(wrong["error"]["code"].as_str(), Some("auth_failed"));

    let unknown = request(
        &mut stdin,
        &mut reader,
        "6",
        "auth.login",
        json!({ "userId": "000000", "password": "hunter2" }),
    );
    assert_eq!(unknown["error"]["code"].as_str(), Some("auth_failed"));

    let bad_role = request(
        &mut stdin,
        &mut reader,
        "7",
        "auth.createUser",
        json!({ "name": "Omar Reyes", "password": "hunter2", "role": "registrar" }),
    );
    assert_eq!(bad_role["error"]["code"].as_str(), Some("bad_params"));

    let short_password = request(
        &mut stdin,
        &mut reader,
        "8",
        "auth.createUser",
        json!({ "name": "Omar Reyes", "password": "abc", "role": "admin" }),
    );
    assert_eq!(
        short_password["error"]["code"].as_str(),
        Some("validation_failed")
    );

    let _ = child.kill();
}
