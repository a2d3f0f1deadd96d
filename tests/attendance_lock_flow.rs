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
    let exe = env!("CARGO_BIN_EXE_attendbookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn attendbookd");
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
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
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

fn roster_abc() -> serde_json::Value {
    json!([
        { "id": "A", "name": "Asha", "appNumber": "101" },
        { "id": "B", "name": "Bela", "appNumber": "102" },
        { "id": "C", "name": "Chitra", "appNumber": "103" }
    ])
}

fn open_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
    sheet: &std::path::Path,
) {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({
            "path": workspace.to_string_lossy(),
            "sheetPath": sheet.to_string_lossy(),
        }),
    );
}

#[test]
fn saved_batch_rejects_further_edits() {
    let workspace = temp_dir("attendbook-lock-flow");
    let sheet = workspace.join("sheet.sqlite3");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace, &sheet);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "sheet.setRoster",
        json!({ "students": roster_abc() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.open",
        json!({ "date": "2025-01-06", "batch": "batch_01" }),
    );
    for (id, (student, status)) in [("A", "present"), ("B", "absent")].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("set-{id}"),
            "attendance.setStatus",
            json!({ "date": "2025-01-06", "batch": "batch_01", "studentId": student, "status": status }),
        );
    }
    let view = request_ok(&mut stdin, &mut reader, "3", "attendance.view", json!({}));
    assert_eq!(view["counts"]["present"], json!(1));
    assert_eq!(view["counts"]["absent"], json!(1));
    assert_eq!(view["counts"]["leave"], json!(1));

    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.save",
        json!({ "date": "2025-01-06", "batch": "batch_01" }),
    );
    assert_eq!(saved["state"]["state"], "locked");
    assert_eq!(saved["push"]["savedCount"], json!(3));
    assert_eq!(saved["push"]["total"], json!(3));

    let rejected = request(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.setStatus",
        json!({ "date": "2025-01-06", "batch": "batch_01", "studentId": "C", "status": "present" }),
    );
    assert_eq!(error_code(&rejected), "locked");
    assert_eq!(rejected["error"]["details"]["batch"], "batch_01");

    let bulk = request(
        &mut stdin,
        &mut reader,
        "6",
        "attendance.bulkSetStatus",
        json!({ "date": "2025-01-06", "batch": "batch_01", "studentIds": ["C"], "status": "present" }),
    );
    assert_eq!(error_code(&bulk), "locked");

    let again = request(
        &mut stdin,
        &mut reader,
        "7",
        "attendance.save",
        json!({ "date": "2025-01-06", "batch": "batch_01" }),
    );
    assert_eq!(error_code(&again), "locked");

    let locked = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "attendance.isLocked",
        json!({ "date": "2025-01-06", "batch": "batch_01" }),
    );
    assert_eq!(locked["locked"], json!(true));

    // A was present in batch 1, so batch 2 only shows B and C.
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "attendance.open",
        json!({ "date": "2025-01-06", "batch": "batch_02" }),
    );
    assert_eq!(second["batchLabel"], "6:00 AM");
    let ids: Vec<&str> = second["students"]
        .as_array()
        .expect("students")
        .iter()
        .filter_map(|s| s["id"].as_str())
        .collect();
    assert_eq!(ids, vec!["B", "C"]);
    assert_eq!(second["locked"], json!(false));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn save_with_photo_records_proof_url() {
    let workspace = temp_dir("attendbook-lock-photo");
    let sheet = workspace.join("sheet.sqlite3");
    let photo = workspace.join("class.png");
    std::fs::write(&photo, b"png").expect("write photo");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace, &sheet);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "sheet.setRoster",
        json!({ "students": roster_abc() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.open",
        json!({ "date": "2025-01-07", "batch": "batch_02" }),
    );
    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.save",
        json!({ "date": "2025-01-07", "batch": "batch_02", "photoPath": photo.to_string_lossy() }),
    );
    let url = saved["photoUrl"].as_str().expect("photo url");
    assert!(url.ends_with("2025-01-07_batch_02.png"));
    assert!(workspace.join("proofs").join("2025-01-07_batch_02.png").exists());

    let drained = request_ok(&mut stdin, &mut reader, "4", "events.drain", json!({}));
    let locked_event = drained["events"]
        .as_array()
        .expect("events")
        .iter()
        .find(|e| e["type"] == "batch-locked")
        .cloned()
        .expect("batch-locked event");
    assert_eq!(locked_event["photoUrl"].as_str(), Some(url));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn save_with_empty_roster_is_a_validation_error() {
    let workspace = temp_dir("attendbook-lock-empty");
    let sheet = workspace.join("sheet.sqlite3");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace, &sheet);
    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "attendance.save",
        json!({ "date": "2025-01-06", "batch": "batch_01" }),
    );
    assert_eq!(error_code(&resp), "validation");
    let state = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.saveState",
        json!({ "date": "2025-01-06", "batch": "batch_01" }),
    );
    assert_eq!(state["state"], "idle");

    drop(stdin);
    let _ = child.wait();
}
