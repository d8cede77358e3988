use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::loader::Snapshot;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// Built on first completeness use; only `completeness.reload` or a new
    /// workspace replaces it.
    pub snapshot: Option<Snapshot>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            db: None,
            snapshot: None,
        }
    }
}
