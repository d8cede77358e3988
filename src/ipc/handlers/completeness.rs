use crate::completeness::{parse_query, verify_completeness};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::loader::{load_snapshot, Snapshot, SqliteSource};
use serde_json::json;

fn workspace_source(state: &AppState) -> Result<SqliteSource, HandlerErr> {
    state
        .workspace
        .as_deref()
        .map(SqliteSource::new)
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

fn ensure_snapshot(state: &mut AppState) -> Result<&Snapshot, HandlerErr> {
    if state.snapshot.is_none() {
        let source = workspace_source(state)?;
        state.snapshot = Some(load_snapshot(&source));
    }
    state
        .snapshot
        .as_ref()
        .ok_or_else(|| HandlerErr::new("internal", "snapshot unavailable"))
}

fn status_json(snapshot: Option<&Snapshot>) -> serde_json::Value {
    let Some(s) = snapshot else {
        return json!({
            "loading": true,
            "loadedAt": null,
            "fingerprint": null,
            "counts": null,
            "failed": [],
        });
    };
    json!({
        "loading": false,
        "loadedAt": s.loaded_at,
        "fingerprint": s.fingerprint,
        "counts": {
            "assignments": s.assignments.len(),
            "unstaffed": s.unstaffed.len(),
            "activities": s.activities.len(),
            "grades": s.grades.len(),
            "students": s.students.len(),
        },
        "failed": s.failed.iter().map(|c| c.as_str()).collect::<Vec<_>>(),
    })
}

fn status(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    if state.workspace.is_none() {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    }
    Ok(status_json(state.snapshot.as_ref()))
}

fn reload(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let source = workspace_source(state)?;
    let previous = state.snapshot.take().map(|s| s.fingerprint);
    let snapshot = load_snapshot(&source);
    let changed = previous
        .as_deref()
        .map(|fp| fp != snapshot.fingerprint)
        .unwrap_or(true);
    let mut result = status_json(Some(&snapshot));
    result["changed"] = json!(changed);
    state.snapshot = Some(snapshot);
    Ok(result)
}

fn verify(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let query = parse_query(&req.params).map_err(|e| HandlerErr {
        code: e.code,
        message: e.message,
        details: None,
    })?;
    let snapshot = ensure_snapshot(state)?;
    let report = verify_completeness(snapshot, &query);
    serde_json::to_value(report).map_err(|e| HandlerErr::new("internal", e.to_string()))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "completeness.status" => status(state, req),
        "completeness.reload" => reload(state, req),
        "completeness.verify" => verify(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
