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

fn error_code(value: &serde_json::Value) -> &str {
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false));
    value["error"]["code"].as_str().expect("error code")
}

#[test]
fn request_approve_deny_and_grade_gating() {
    let workspace = temp_dir("registrar-enrollment");
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
        json!({ "code": "BSED", "name": "Education" }),
    );
    let course_id = course["courseId"].as_str().expect("courseId");

    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "auth.createUser",
        json!({ "name": "Dana Ortiz", "password": "s3cret", "role": "teacher" }),
    );
    let teacher_user_id = teacher["userId"].as_str().expect("userId");

    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "subjects.create",
        json!({
            "code": "ENG101",
            "name": "English 1",
            "courseId": course_id,
            "teacherUserId": teacher_user_id
        }),
    );
    let subject_id = subject["subjectId"].as_str().expect("subjectId");

    let student = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.register",
        json!({ "fullName": "Cara Lim", "courseId": course_id, "yearLevel": 1 }),
    );
    let student_id = student["studentId"].as_str().expect("studentId");

    let enrollment = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "enrollments.request",
        json!({ "studentId": student_id, "subjectId": subject_id }),
    );
    let enrollment_id = enrollment["enrollmentId"].as_str().expect("enrollmentId");
    assert_eq!(enrollment["status"].as_str(), Some("pending"));

    // A second request for the same pair is a conflict, not a second row.
    let dup = request(
        &mut stdin,
        &mut reader,
        "7",
        "enrollments.request",
        json!({ "studentId": student_id, "subjectId": subject_id }),
    );
    assert_eq!(error_code(&dup), "conflict");

    // Pending list reaches the request by subject and by assigned teacher.
    let by_subject = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "enrollments.listPending",
        json!({ "subjectId": subject_id }),
    );
    assert_eq!(by_subject["enrollments"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(
        by_subject["enrollments"][0]["studentName"].as_str(),
        Some("Cara Lim")
    );

    let by_teacher = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "enrollments.listPending",
        json!({ "teacherUserId": teacher_user_id }),
    );
    assert_eq!(by_teacher["enrollments"].as_array().map(|a| a.len()), Some(1));

    // Grades cannot be entered while the enrollment is pending.
    let early = request(
        &mut stdin,
        &mut reader,
        "10",
        "grades.update",
        json!({ "enrollmentId": enrollment_id, "quiz": 90 }),
    );
    assert_eq!(error_code(&early), "conflict");
    assert_eq!(
        early["error"]["message"].as_str(),
        Some("enrollment is not approved")
    );

    request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "enrollments.setStatus",
        json!({ "enrollmentId": enrollment_id, "status": "denied" }),
    );
    let denied = request(
        &mut stdin,
        &mut reader,
        "12",
        "grades.update",
        json!({ "enrollmentId": enrollment_id, "quiz": 90 }),
    );
    assert_eq!(error_code(&denied), "conflict");

    // A denied request no longer shows up in the pending queue.
    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "enrollments.listPending",
        json!({ "subjectId": subject_id }),
    );
    assert_eq!(empty["enrollments"].as_array().map(|a| a.len()), Some(0));

    // Re-approval reopens grade entry.
    request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "enrollments.setStatus",
        json!({ "enrollmentId": enrollment_id, "status": "approved" }),
    );
    let graded = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "grades.update",
        json!({ "enrollmentId": enrollment_id, "quiz": 90, "activity": 90, "exam": 90 }),
    );
    assert_eq!(graded["grade"]["finalScore"].as_f64(), Some(90.0));

    let history = request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "enrollments.listByStudent",
        json!({ "studentId": student_id }),
    );
    assert_eq!(
        history["enrollments"][0]["status"].as_str(),
        Some("approved")
    );

    let _ = child.kill();
}

#[test]
fn requests_are_rejected_for_inactive_students_and_unknown_subjects() {
    let workspace = temp_dir("registrar-enrollment-guard");
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
        json!({ "code": "BSCE", "name": "Civil Engineering" }),
    );
    let course_id = course["courseId"].as_str().expect("courseId");
    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "subjects.create",
        json!({ "code": "CE101", "name": "Statics", "courseId": course_id }),
    );
    let subject_id = subject["subjectId"].as_str().expect("subjectId");
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.register",
        json!({ "fullName": "Evan Sy", "courseId": course_id, "yearLevel": 3 }),
    );
    let student_id = student["studentId"].as_str().expect("studentId");

    let missing_subject = request(
        &mut stdin,
        &mut reader,
        "5",
        "enrollments.request",
        json!({ "studentId": student_id, "subjectId": "no-such-subject" }),
    );
    assert_eq!(error_code(&missing_subject), "not_found");

    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.setStatus",
        json!({ "studentId": student_id, "status": "inactive" }),
    );
    let inactive = request(
        &mut stdin,
        &mut reader,
        "7",
        "enrollments.request",
        json!({ "studentId": student_id, "subjectId": subject_id }),
    );
    assert_eq!(error_code(&inactive), "conflict");
    assert_eq!(
        inactive["error"]["message"].as_str(),
        Some("student is not active")
    );

    let missing_student = request(
        &mut stdin,
        &mut reader,
        "8",
        "enrollments.request",
        json!({ "studentId": "00000000", "subjectId": subject_id }),
    );
    assert_eq!(error_code(&missing_student), "not_found");

    let _ = child.kill();
}
