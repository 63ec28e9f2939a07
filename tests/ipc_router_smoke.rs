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
    let exe = env!("CARGO_BIN_EXE_noduesd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn noduesd");
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
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

#[test]
fn router_smoke_covers_handler_families() {
    let workspace = temp_dir("noduesd-smoke");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());

    // Everything store-backed refuses to run before a workspace is selected.
    let early = request(
        &mut stdin,
        &mut reader,
        "2",
        "auth.login",
        json!({ "email": "hod@college.edu", "password": "password123" }),
    );
    assert_eq!(error_code(&early), "no_workspace");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // Seeding twice must not duplicate anything.
    let _ = request_ok(&mut stdin, &mut reader, "4", "workspace.seedDemo", json!({}));
    let _ = request_ok(&mut stdin, &mut reader, "5", "workspace.seedDemo", json!({}));

    let login = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "auth.login",
        json!({ "email": "hod@college.edu", "password": "password123" }),
    );
    assert_eq!(login.get("role").and_then(|v| v.as_str()), Some("hod"));
    assert_eq!(
        login.get("redirect").and_then(|v| v.as_str()),
        Some("/hod/dashboard")
    );
    let token = login
        .get("session_token")
        .and_then(|v| v.as_str())
        .expect("session token")
        .to_string();

    let classes = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "hod.classes",
        json!({ "session_token": token.clone() }),
    );
    assert_eq!(
        classes
            .get("classes")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(4)
    );

    let subjects = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "hod.subjects",
        json!({ "session_token": token }),
    );
    assert_eq!(
        subjects
            .get("subjects")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(5)
    );

    // Role-gated methods without a session bounce to login.
    let anon = request(
        &mut stdin,
        &mut reader,
        "9",
        "hod.departmentStudents",
        json!({}),
    );
    assert_eq!(error_code(&anon), "unauthorized");
    assert_eq!(
        anon.get("error")
            .and_then(|e| e.get("details"))
            .and_then(|d| d.get("redirect"))
            .and_then(|v| v.as_str()),
        Some("/login")
    );

    let unknown = request(&mut stdin, &mut reader, "10", "grades.list", json!({}));
    assert_eq!(error_code(&unknown), "not_implemented");
}

#[test]
fn unparseable_frames_answer_bad_json_with_null_id() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    writeln!(stdin, "this is not json").expect("write garbage");
    stdin.flush().expect("flush");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert!(value["id"].is_null());
    assert_eq!(value["ok"], json!(false));
    assert_eq!(error_code(&value), "bad_json");
}
