use rusqlite::Connection;
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
    let exe = env!("CARGO_BIN_EXE_gradecheckd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .env_remove("GRADECHECKD_WORKSPACE")
        .spawn()
        .expect("spawn gradecheckd");
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

fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

fn seed() -> serde_json::Value {
    json!({
        "persons": [{ "id": "p1", "code": "T-01", "firstName": "Laura", "lastName": "Gomez" }],
        "assignments": [{ "id": "as1", "personId": "p1", "subjects": ["Math"], "grades": ["5th"], "classrooms": ["1"] }],
        "activities": [
            { "id": "act1", "subject": "Math", "grade": "5th", "classroom": "1", "period": 1, "name": "Quiz", "weightPercent": 100 }
        ],
        "students": [
            { "id": "s1", "firstName": "Ana", "lastName": "Ruiz", "grade": "5th", "classroom": "1" }
        ]
    })
}

fn scope() -> serde_json::Value {
    json!({ "level": "grade", "period": 1, "grade": "5th" })
}

#[test]
fn snapshot_is_loaded_once_and_refreshed_only_by_reload() {
    let workspace = temp_dir("gradecheck-lifecycle");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "2", "data.import", seed());

    let before = request_ok(&mut stdin, &mut reader, "3", "completeness.status", json!({}));
    assert_eq!(before["loading"], json!(true));
    assert!(before["fingerprint"].is_null());

    let first = request_ok(&mut stdin, &mut reader, "4", "completeness.verify", scope());
    assert_eq!(first["details"].as_array().map(|a| a.len()), Some(1));

    let loaded = request_ok(&mut stdin, &mut reader, "5", "completeness.status", json!({}));
    assert_eq!(loaded["loading"], json!(false));
    assert_eq!(loaded["counts"]["students"], json!(1));
    assert_eq!(loaded["failed"], json!([]));

    // Grading happens upstream; the held snapshot does not see it.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "data.import",
        json!({
            "mode": "append",
            "grades": [
                { "studentId": "s1", "subject": "Math", "grade": "5th", "classroom": "1", "period": 1, "activityName": "Quiz", "score": 4.5 }
            ]
        }),
    );
    let stale = request_ok(&mut stdin, &mut reader, "7", "completeness.verify", scope());
    assert_eq!(stale, first, "repeated queries against one snapshot are identical");

    let reloaded = request_ok(&mut stdin, &mut reader, "8", "completeness.reload", json!({}));
    assert_eq!(reloaded["changed"], json!(true));
    assert_ne!(reloaded["fingerprint"], loaded["fingerprint"]);
    let fresh = request_ok(&mut stdin, &mut reader, "9", "completeness.verify", scope());
    assert_eq!(fresh["complete"], json!(true));

    let again = request_ok(&mut stdin, &mut reader, "10", "completeness.reload", json!({}));
    assert_eq!(again["changed"], json!(false));

    // Selecting a workspace discards the snapshot.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let reset = request_ok(&mut stdin, &mut reader, "12", "completeness.status", json!({}));
    assert_eq!(reset["loading"], json!(true));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn broken_collections_degrade_toward_complete() {
    let workspace = temp_dir("gradecheck-partial-load");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let mut payload = seed();
    payload["activities"][0]["weightPercent"] = json!(70);
    let _ = request_ok(&mut stdin, &mut reader, "2", "data.import", payload);

    let conn = Connection::open(workspace.join("gradecheck.sqlite3")).expect("open db");
    conn.execute("DROP TABLE grades", []).expect("drop grades");

    let res = request_ok(&mut stdin, &mut reader, "3", "completeness.verify", scope());
    let details = res["details"].as_array().expect("details");
    assert_eq!(details.len(), 1, "missing grades are not invented: {}", res);
    assert_eq!(details[0]["tipo"], json!("porcentaje_incompleto"));
    let status = request_ok(&mut stdin, &mut reader, "4", "completeness.status", json!({}));
    assert_eq!(status["failed"], json!(["grades"]));

    conn.execute(
        "UPDATE teacher_assignments SET subjects_json = 'not json' WHERE id = 'as1'",
        [],
    )
    .expect("corrupt assignment");
    let reloaded = request_ok(&mut stdin, &mut reader, "5", "completeness.reload", json!({}));
    assert_eq!(reloaded["failed"], json!(["assignments", "grades"]));
    let res = request_ok(&mut stdin, &mut reader, "6", "completeness.verify", scope());
    assert_eq!(res["complete"], json!(true));

    drop(conn);
    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn query_before_workspace_is_rejected() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let res = request(&mut stdin, &mut reader, "1", "completeness.verify", scope());
    assert_eq!(error_code(&res), Some("no_workspace"));
    let res = request(&mut stdin, &mut reader, "2", "completeness.status", json!({}));
    assert_eq!(error_code(&res), Some("no_workspace"));
    let res = request(&mut stdin, &mut reader, "3", "data.import", seed());
    assert_eq!(error_code(&res), Some("no_workspace"));

    drop(stdin);
    let _ = child.wait();
}
