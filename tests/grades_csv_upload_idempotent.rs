mod test_support;

use serde_json::json;
use test_support::{request, request_ok, seed_workspace, spawn_sidecar, temp_dir};

const UPLOAD: &str = "Admission No,Marks,Comment\n\
STU-001,105,\n\
STU-002,64,Good effort\n\
STU-003,abc,\n\
STU-004,80,\n";

#[test]
fn csv_upload_is_partial_and_idempotent() {
    let workspace = temp_dir("gradebook-csv-upload");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    seed_workspace(&mut stdin, &mut reader, &workspace);

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grades.csvUpload",
        json!({ "assessmentDefId": "MATH-CAT", "csvText": UPLOAD }),
    );
    assert_eq!(first["successfulCount"], json!(2));
    assert_eq!(first["failedCount"], json!(2));
    let errors = first["errors"].as_array().expect("errors");
    assert_eq!(errors[0]["rowIndex"], json!(0));
    assert_eq!(errors[0]["line"], json!(2));
    assert!(errors[0]["reason"].as_str().unwrap_or_default().contains("out of range"));
    assert_eq!(errors[1]["rowIndex"], json!(2));

    let path = workspace.path().join("upload.csv");
    std::fs::write(&path, UPLOAD).expect("write csv");
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grades.csvUpload",
        json!({ "assessmentDefId": "MATH-CAT", "path": path.to_string_lossy() }),
    );
    assert_eq!(second["successfulCount"], first["successfulCount"]);
    assert_eq!(second["failedCount"], first["failedCount"]);
    assert_eq!(second["unchangedCount"], json!(2));
    assert_eq!(second["records"], first["records"]);

    let list = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.list",
        json!({ "assessmentDefId": "MATH-CAT" }),
    );
    assert_eq!(list["records"].as_array().map(|a| a.len()), Some(2));
}

#[test]
fn csv_header_errors_are_fatal() {
    let workspace = temp_dir("gradebook-csv-header");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    seed_workspace(&mut stdin, &mut reader, &workspace);

    let bad = request(
        &mut stdin,
        &mut reader,
        "1",
        "grades.csvUpload",
        json!({ "assessmentDefId": "MATH-CAT", "csvText": "student,score\nSTU-001,50\n" }),
    );
    assert_eq!(bad["ok"], json!(false));
    assert_eq!(bad["error"]["code"], json!("bad_input"));

    let missing = request(
        &mut stdin,
        &mut reader,
        "2",
        "grades.csvUpload",
        json!({ "assessmentDefId": "MATH-CAT" }),
    );
    assert_eq!(missing["error"]["code"], json!("bad_params"));
}
