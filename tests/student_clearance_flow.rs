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

fn login(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    email: &str,
    password: &str,
) -> String {
    request_ok(
        stdin,
        reader,
        id,
        "auth.login",
        json!({ "email": email, "password": password }),
    )
    .get("session_token")
    .and_then(|v| v.as_str())
    .expect("session token")
    .to_string()
}

#[test]
fn full_clearance_flow_from_registration_to_final_signoff() {
    let workspace = temp_dir("noduesd-flow");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    for (id, name, email, role) in [
        ("2", "Dr. Meena Pillai", "hod.ece@college.edu", "hod"),
        ("3", "Prof. Varun Nair", "varun@college.edu", "staff"),
    ] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            id,
            "auth.register",
            json!({
                "name": name,
                "email": email,
                "password": "pw",
                "role": role,
                "department": "ECE"
            }),
        );
    }
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "auth.register",
        json!({
            "name": "Kiran B",
            "email": "kiran@college.edu",
            "password": "pw",
            "role": "student",
            "department": "ECE",
            "class_section": "A",
            "year": 1,
            "semester": 1,
            "roll_number": "ECE042"
        }),
    );

    let hod = login(&mut stdin, &mut reader, "5", "hod.ece@college.edu", "pw");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "hod.createClass",
        json!({
            "session_token": hod.clone(),
            "name": "ECE 1st Year Section A",
            "year": 1,
            "semester": 1,
            "section": "A"
        }),
    );
    let class_id = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "hod.classes",
        json!({ "session_token": hod.clone() }),
    )["classes"][0]["id"]
        .as_str()
        .expect("class id")
        .to_string();

    for (id, name, code) in [
        ("8", "Circuit Theory", "ECE101"),
        ("9", "Signals", "ECE102"),
    ] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            id,
            "hod.createSubject",
            json!({
                "session_token": hod.clone(),
                "name": name,
                "code": code,
                "semester": 1,
                "credits": 4,
                "class_id": class_id.clone()
            }),
        );
    }
    let subjects = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "hod.subjects",
        json!({ "session_token": hod.clone() }),
    );
    let subject_ids: Vec<String> = subjects["subjects"]
        .as_array()
        .expect("subjects")
        .iter()
        .map(|s| s["id"].as_str().expect("id").to_string())
        .collect();
    assert_eq!(subject_ids.len(), 2);

    let staff_id = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "hod.staff",
        json!({ "session_token": hod.clone() }),
    )["staff"][0]["id"]
        .as_str()
        .expect("staff id")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "hod.assignSubject",
        json!({
            "session_token": hod.clone(),
            "staff_id": staff_id,
            "subject_id": subject_ids[0].clone(),
            "class_id": class_id
        }),
    );

    // Student sees both subjects pending and cannot yet request sign-off.
    let student = login(&mut stdin, &mut reader, "13", "kiran@college.edu", "pw");
    let view = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "student.subjects",
        json!({ "session_token": student.clone() }),
    );
    let rows = view["subjects"].as_array().expect("rows");
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r["status"] == "pending"));

    let elig = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "student.finalApprovalStatus",
        json!({ "session_token": student.clone() }),
    );
    assert_eq!(elig["can_request"], json!(false));
    assert_eq!(elig["status"], json!(null));

    let staff = login(&mut stdin, &mut reader, "16", "varun@college.edu", "pw");
    let assigned = request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "staff.assignedSubjects",
        json!({ "session_token": staff.clone() }),
    );
    assert_eq!(assigned["subjects"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(assigned["subjects"][0]["class_section"], json!("A"));

    let roster = request_ok(
        &mut stdin,
        &mut reader,
        "18",
        "staff.students",
        json!({
            "session_token": staff.clone(),
            "subject_id": subject_ids[0].clone(),
            "class_section": "A"
        }),
    );
    let student_id = roster["students"][0]["id"]
        .as_str()
        .expect("student id")
        .to_string();
    assert_eq!(roster["students"][0]["roll_number"], json!("ECE042"));
    assert_eq!(roster["students"][0]["status"], json!("pending"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "19",
        "staff.approveStudent",
        json!({
            "session_token": staff.clone(),
            "student_id": student_id.clone(),
            "subject_id": subject_ids[0].clone(),
            "action": "approve",
            "remarks": "Lab kit returned"
        }),
    );

    // One of two approved: still not eligible.
    let elig = request_ok(
        &mut stdin,
        &mut reader,
        "20",
        "student.finalApprovalStatus",
        json!({ "session_token": student.clone() }),
    );
    assert_eq!(elig["can_request"], json!(false));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "21",
        "staff.approveStudent",
        json!({
            "session_token": staff,
            "student_id": student_id.clone(),
            "subject_id": subject_ids[1].clone(),
            "action": "approve"
        }),
    );

    let view = request_ok(
        &mut stdin,
        &mut reader,
        "22",
        "student.subjects",
        json!({ "session_token": student.clone() }),
    );
    let rows = view["subjects"].as_array().expect("rows");
    assert!(rows.iter().all(|r| r["status"] == "approved"));
    assert_eq!(rows[0]["remarks"], json!("Lab kit returned"));
    assert!(rows[0]["updated_at"].as_str().is_some());

    let elig = request_ok(
        &mut stdin,
        &mut reader,
        "23",
        "student.finalApprovalStatus",
        json!({ "session_token": student.clone() }),
    );
    assert_eq!(elig["can_request"], json!(true));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "24",
        "student.requestFinalApproval",
        json!({ "session_token": student.clone() }),
    );
    let dup = request(
        &mut stdin,
        &mut reader,
        "25",
        "student.requestFinalApproval",
        json!({ "session_token": student.clone() }),
    );
    assert_eq!(
        dup["error"]["code"].as_str(),
        Some("conflict"),
        "second request must conflict"
    );

    // An open request flips eligibility off even though dues stay approved.
    let elig = request_ok(
        &mut stdin,
        &mut reader,
        "26",
        "student.finalApprovalStatus",
        json!({ "session_token": student.clone() }),
    );
    assert_eq!(elig["can_request"], json!(false));
    assert_eq!(elig["status"], json!("pending"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "27",
        "hod.finalApprove",
        json!({
            "session_token": hod.clone(),
            "student_id": student_id,
            "action": "approve",
            "remarks": "All clear"
        }),
    );

    let elig = request_ok(
        &mut stdin,
        &mut reader,
        "28",
        "student.finalApprovalStatus",
        json!({ "session_token": student }),
    );
    assert_eq!(elig["status"], json!("approved"));
    assert_eq!(elig["remarks"], json!("All clear"));

    let dept = request_ok(
        &mut stdin,
        &mut reader,
        "29",
        "hod.departmentStudents",
        json!({ "session_token": hod }),
    );
    let summary = &dept["students"][0];
    assert_eq!(summary["approved_subjects"], json!(2));
    assert_eq!(summary["total_subjects"], json!(2));
    assert_eq!(summary["final_status"], json!("approved"));
    assert!(
        summary["approved_subjects"].as_i64() <= summary["total_subjects"].as_i64(),
        "approved count can never exceed the subject count"
    );
}
