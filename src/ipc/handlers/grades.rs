use crate::ingest::{self, MAX_BATCH_ROWS};
use crate::ipc::error::{engine_err, err, ok, ok_value};
use crate::ipc::helpers::{db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, GradeFilter};
use serde_json::json;

fn handle_grades_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let assessment_def_id = match required_str(req, "assessmentDefId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let expected_version = match req.params.get("expectedVersion") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => match v.as_i64() {
            Some(n) if n >= 0 => Some(n),
            _ => return err(&req.id, "bad_params", "expectedVersion must be a non-negative integer", None),
        },
    };

    let def = match store::load_assessment_def(conn, assessment_def_id) {
        Ok(d) => d,
        Err(e) => return engine_err(&req.id, &e),
    };
    let input = match ingest::input_from_json(&def.kind, &req.params) {
        Ok(i) => i,
        Err(e) => return engine_err(&req.id, &e),
    };
    match ingest::grade_single(conn, &def, student_id, &input, expected_version) {
        Ok((record, status)) => ok(&req.id, json!({ "record": record, "status": status })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_grades_bulk_entry(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let assessment_def_id = match required_str(req, "assessmentDefId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(entries) = req.params.get("entries").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing entries[]", None);
    };
    if entries.len() > MAX_BATCH_ROWS {
        return err(
            &req.id,
            "bad_input",
            format!("batch exceeds max rows: {} > {}", entries.len(), MAX_BATCH_ROWS),
            Some(json!({ "maxRows": MAX_BATCH_ROWS, "received": entries.len() })),
        );
    }
    let rows = ingest::rows_from_entries(entries);
    match ingest::ingest_batch(conn, assessment_def_id, &rows) {
        Ok(result) => ok_value(&req.id, &result),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_grades_csv_upload(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let assessment_def_id = match required_str(req, "assessmentDefId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let text = match (
        req.params.get("csvText").and_then(|v| v.as_str()),
        optional_str(req, "path"),
    ) {
        (Some(t), _) => t.to_string(),
        (None, Some(path)) => match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                return err(
                    &req.id,
                    "io_failed",
                    e.to_string(),
                    Some(json!({ "path": path })),
                )
            }
        },
        (None, None) => return err(&req.id, "bad_params", "missing csvText or path", None),
    };
    match ingest::ingest_csv(conn, assessment_def_id, &text) {
        Ok(result) => ok_value(&req.id, &result),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_grades_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let filter = GradeFilter {
        assessment_def_id: optional_str(req, "assessmentDefId").map(str::to_string),
        student_id: optional_str(req, "studentId").map(str::to_string),
        class_subject_id: optional_str(req, "classSubjectId").map(str::to_string),
        term_id: optional_str(req, "termId").map(str::to_string),
    };
    match store::query_grades(conn, &filter) {
        Ok(records) => ok(&req.id, json!({ "records": records })),
        Err(e) => engine_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.upsert" => Some(handle_grades_upsert(state, req)),
        "grades.bulkEntry" => Some(handle_grades_bulk_entry(state, req)),
        "grades.csvUpload" => Some(handle_grades_csv_upload(state, req)),
        "grades.list" => Some(handle_grades_list(state, req)),
        _ => None,
    }
}
