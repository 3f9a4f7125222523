use crate::ipc::error::{engine_err, ok_value};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use crate::{report, stats};

fn handle_stats_subject(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_subject_id = match required_str(req, "classSubjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term_id = match required_str(req, "termId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match stats::compute_subject_statistics(conn, class_subject_id, term_id) {
        Ok(s) => ok_value(&req.id, &s),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_reports_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term_id = match required_str(req, "termId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match report::generate_student_report(conn, student_id, term_id) {
        Ok(r) => ok_value(&req.id, &r),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_reports_class(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term_id = match required_str(req, "termId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match report::generate_class_report(conn, class_id, term_id) {
        Ok(r) => ok_value(&req.id, &r),
        Err(e) => engine_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "stats.subject" => Some(handle_stats_subject(state, req)),
        "reports.student" => Some(handle_reports_student(state, req)),
        "reports.class" => Some(handle_reports_class(state, req)),
        _ => None,
    }
}
