use crate::config::{self, GradingConfig};
use crate::error::EngineError;
use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::helpers::{db_conn, optional_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use tracing::warn;

fn handle_config_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let school_id = optional_str(req, "schoolId");
    match config::load(conn, school_id) {
        Ok(cfg) => ok(&req.id, json!({ "schoolId": school_id, "config": cfg })),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_config_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let school_id = optional_str(req, "schoolId");
    let Some(patch) = req.params.get("patch") else {
        return err(&req.id, "bad_params", "missing patch", None);
    };
    // A broken stored config is replaced by patching the defaults.
    let current = match config::load(conn, school_id) {
        Ok(c) => c,
        Err(EngineError::Configuration(reason)) => {
            warn!(reason = %reason, "stored grading config unusable; patching defaults");
            GradingConfig::default()
        }
        Err(e) => return engine_err(&req.id, &e),
    };
    let merged = match config::merge_patch(&current, patch) {
        Ok(c) => c,
        Err(e) => return engine_err(&req.id, &e),
    };
    match config::save(conn, school_id, &merged) {
        Ok(()) => ok(&req.id, json!({ "schoolId": school_id, "config": merged })),
        Err(e) => engine_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grading.config.get" => Some(handle_config_get(state, req)),
        "grading.config.update" => Some(handle_config_update(state, req)),
        _ => None,
    }
}
