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
    let exe = env!("CARGO_BIN_EXE_coursed");
    let mut child = Command::new(exe)
        .env_remove("COURSED_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn coursed");
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
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

fn result_str(v: &serde_json::Value, key: &str) -> String {
    v.get("result")
        .and_then(|r| r.get(key))
        .and_then(|x| x.as_str())
        .unwrap_or_else(|| panic!("missing result.{} in {}", key, v))
        .to_string()
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("coursed-router-smoke");
    let restored = temp_dir("coursed-router-smoke-restored");
    let bundle_out = workspace.join("smoke-backup.coursed.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health["result"]["workspacePath"].is_null());
    let _ = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request(&mut stdin, &mut reader, "3", "setup.get", json!({}));
    let course_id = result_str(
        &request(
            &mut stdin,
            &mut reader,
            "4",
            "courses.create",
            json!({ "name": "Smoke Course" }),
        ),
        "courseId",
    );
    let term_id = result_str(
        &request(
            &mut stdin,
            &mut reader,
            "5",
            "terms.create",
            json!({ "name": "Smoke Term", "startDate": "2024-09-02" }),
        ),
        "termId",
    );
    let _ = request(&mut stdin, &mut reader, "6", "terms.list", json!({}));
    let student_id = result_str(
        &request(
            &mut stdin,
            &mut reader,
            "7",
            "students.create",
            json!({ "displayName": "Smoke Student" }),
        ),
        "studentId",
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "8",
        "students.list",
        json!({ "role": "trainee" }),
    );
    let category_id = result_str(
        &request(
            &mut stdin,
            &mut reader,
            "9",
            "categories.create",
            json!({ "courseId": course_id, "name": "Smoke Category" }),
        ),
        "categoryId",
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "10",
        "categories.list",
        json!({ "courseId": course_id }),
    );
    let exercise_id = result_str(
        &request(
            &mut stdin,
            &mut reader,
            "11",
            "exercises.create",
            json!({ "courseId": course_id, "input": { "title": "Smoke", "categoryId": category_id } }),
        ),
        "exerciseId",
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "12",
        "exercises.list",
        json!({ "courseId": course_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "13",
        "exercises.reorder",
        json!({ "courseId": course_id, "layout": { "uncategorized": [exercise_id] } }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "14",
        "categories.reorder",
        json!({ "courseId": course_id, "categoryIds": [category_id] }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "15",
        "enrollments.create",
        json!({ "studentId": student_id, "courseId": course_id, "termId": term_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "16",
        "enrollments.list",
        json!({ "courseId": course_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "17",
        "submissions.submit",
        json!({ "studentId": student_id, "exerciseId": exercise_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "18",
        "submissions.grade",
        json!({ "studentId": student_id, "exerciseId": exercise_id, "score": 9.5 }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "19",
        "submissions.get",
        json!({ "studentId": student_id, "exerciseId": exercise_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "20",
        "progress.student",
        json!({ "studentId": student_id, "courseId": course_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "21",
        "progress.course",
        json!({ "courseId": course_id }),
    );
    let exported = request(
        &mut stdin,
        &mut reader,
        "22",
        "backup.exportWorkspace",
        json!({ "outPath": bundle_out.to_string_lossy() }),
    );
    assert_eq!(exported["ok"], true, "{}", exported);
    let imported = request(
        &mut stdin,
        &mut reader,
        "23",
        "backup.importWorkspace",
        json!({
            "inPath": bundle_out.to_string_lossy(),
            "workspacePath": restored.to_string_lossy()
        }),
    );
    assert_eq!(imported["result"]["checksumVerified"], true, "{}", imported);

    // The restored workspace is now the active one.
    let courses = request(&mut stdin, &mut reader, "24", "courses.list", json!({}));
    let list = courses["result"]["courses"].as_array().expect("courses");
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["name"], "Smoke Course");
    assert_eq!(list[0]["exerciseCount"], 1);
    assert_eq!(list[0]["enrollmentCount"], 1);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(restored);
}

#[test]
fn unknown_methods_and_malformed_lines_get_error_replies() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value["ok"], false);
    assert_eq!(value["error"]["code"], "bad_json");

    let payload = json!({ "id": "x1", "method": "grades.explode", "params": {} });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value["id"], "x1");
    assert_eq!(value["error"]["code"], "not_implemented");

    // Data methods need a workspace first.
    let res = request(&mut stdin, &mut reader, "x2", "courses.create", json!({ "name": "n" }));
    assert_eq!(res["error"]["code"], "no_workspace");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn failed_import_keeps_the_active_workspace_usable() {
    let workspace = temp_dir("coursed-import-fail");
    let bundle = workspace.join("tampered.coursed.zip");
    {
        let f = std::fs::File::create(&bundle).expect("create bundle");
        let mut zip = zip::ZipWriter::new(f);
        let opts = zip::write::FileOptions::default();
        zip.start_file("manifest.json", opts).expect("manifest entry");
        let manifest = json!({
            "format": "coursed-workspace-v1",
            "dbSha256": "0000000000000000000000000000000000000000000000000000000000000000",
        });
        zip.write_all(manifest.to_string().as_bytes())
            .expect("write manifest");
        zip.start_file("db/coursed.sqlite3", opts).expect("db entry");
        zip.write_all(b"not the database the manifest describes")
            .expect("write db");
        zip.finish().expect("finish bundle");
    }

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "2",
        "courses.create",
        json!({ "name": "Survivor" }),
    );

    let failed = request(
        &mut stdin,
        &mut reader,
        "3",
        "backup.importWorkspace",
        json!({ "inPath": bundle.to_string_lossy() }),
    );
    assert_eq!(failed["ok"], false);
    assert_eq!(failed["error"]["code"], "io_failed");

    let courses = request(&mut stdin, &mut reader, "4", "courses.list", json!({}));
    let list = courses["result"]["courses"].as_array().expect("courses");
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["name"], "Survivor");

    let created = request(
        &mut stdin,
        &mut reader,
        "5",
        "courses.create",
        json!({ "name": "After" }),
    );
    assert_eq!(created["ok"], true, "{}", created);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
