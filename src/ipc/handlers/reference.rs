use crate::ipc::error::{engine_err, err, ok_value};
use crate::ipc::helpers::db_conn;
use crate::ipc::types::{AppState, Request};
use crate::reference::{import_reference, ReferenceBundle};

fn handle_reference_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let bundle: ReferenceBundle = match serde_json::from_value(req.params.clone()) {
        Ok(b) => b,
        Err(e) => return err(&req.id, "bad_params", format!("invalid reference bundle: {e}"), None),
    };
    match import_reference(conn, &bundle) {
        Ok(counts) => ok_value(&req.id, &counts),
        Err(e) => engine_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reference.import" => Some(handle_reference_import(state, req)),
        _ => None,
    }
}
