#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tempfile::TempDir;

pub fn temp_dir(prefix: &str) -> TempDir {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .expect("create temp dir")
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .env_remove("GRADEBOOKD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
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

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_default()
}

/// Error code of a response that is expected to fail.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value["error"]["code"].as_str().expect("error code").to_string()
}

/// One class (`C1`, school `SCH-1`), term `T1`, four students
/// `STU-001..STU-004`, and Math/English with grade-based and
/// competency-based assessments.
pub fn reference_bundle() -> serde_json::Value {
    json!({
        "academicYears": [{ "id": "AY-2026", "name": "2026" }],
        "terms": [{ "id": "T1", "name": "Term 1", "academicYearId": "AY-2026" }],
        "classes": [{ "id": "C1", "name": "Form 2 East", "schoolId": "SCH-1" }],
        "students": [
            { "id": "S1", "classId": "C1", "admissionNo": "STU-001", "lastName": "Otieno", "firstName": "Amina" },
            { "id": "S2", "classId": "C1", "admissionNo": "STU-002", "lastName": "Kamau", "firstName": "Brian" },
            { "id": "S3", "classId": "C1", "admissionNo": "STU-003", "lastName": "Wanjiru", "firstName": "Cate" },
            { "id": "S4", "classId": "C1", "admissionNo": "STU-004", "lastName": "Mutua", "firstName": "David" }
        ],
        "subjects": [
            { "id": "MATH", "code": "121", "name": "Mathematics" },
            { "id": "ENG", "code": "101", "name": "English" }
        ],
        "classSubjects": [
            { "id": "CS-MATH", "classId": "C1", "subjectId": "MATH" },
            { "id": "CS-ENG", "classId": "C1", "subjectId": "ENG" }
        ],
        "assessments": [
            { "id": "MATH-CAT", "name": "CAT 1", "kind": "grade", "maxMarks": 100,
              "classSubjectId": "CS-MATH", "termId": "T1" },
            { "id": "MATH-EXAM", "name": "End of term", "kind": "grade", "maxMarks": 50,
              "classSubjectId": "CS-MATH", "termId": "T1" },
            { "id": "ENG-CAT", "name": "CAT 1", "kind": "grade", "maxMarks": 100,
              "classSubjectId": "CS-ENG", "termId": "T1" },
            { "id": "ENG-ORAL", "name": "Oral", "kind": "competency",
              "classSubjectId": "CS-ENG", "termId": "T1" }
        ]
    })
}

/// Select a fresh workspace and import [`reference_bundle`].
pub fn seed_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &TempDir,
) {
    let _ = request_ok(
        stdin,
        reader,
        "seed-1",
        "workspace.select",
        json!({ "path": workspace.path().to_string_lossy() }),
    );
    let _ = request_ok(stdin, reader, "seed-2", "reference.import", reference_bundle());
}
