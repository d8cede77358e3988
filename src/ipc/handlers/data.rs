use crate::db::{self, ImportBatch, ImportMode};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn parse_mode(params: &serde_json::Value) -> Result<ImportMode, HandlerErr> {
    match params.get("mode") {
        None => Ok(ImportMode::Append),
        Some(v) if v.is_null() => Ok(ImportMode::Append),
        Some(v) => v
            .as_str()
            .and_then(ImportMode::parse)
            .ok_or_else(|| HandlerErr::new("bad_params", "mode must be 'replace' or 'append'")),
    }
}

fn import(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let mode = parse_mode(&req.params)?;
    let batch: ImportBatch = if req.params.is_null() {
        ImportBatch::default()
    } else {
        serde_json::from_value(req.params.clone()).map_err(|e| HandlerErr {
            code: "bad_params",
            message: format!("invalid import payload: {}", e),
            details: None,
        })?
    };
    let Some(conn) = state.db.as_mut() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };

    let counts = db::import_batch(conn, &batch, mode)
        .map_err(|e| HandlerErr::new("db_insert_failed", format!("{e:?}")))?;
    tracing::info!(
        mode = ?mode,
        persons = counts.persons,
        assignments = counts.assignments,
        activities = counts.activities,
        grades = counts.grades,
        students = counts.students,
        "data imported"
    );
    Ok(json!({
        "persons": counts.persons,
        "assignments": counts.assignments,
        "activities": counts.activities,
        "grades": counts.grades,
        "students": counts.students,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "data.import" => import(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
