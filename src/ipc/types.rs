use rusqlite::Connection;
use serde::Deserialize;
use std::path::PathBuf;

/// One line of input on stdin.
#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Sidecar session: the selected workspace and its open database.
#[derive(Debug, Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}
