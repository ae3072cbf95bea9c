// Job intake: producers drop job files into the queue over HTTP

use std::collections::BTreeMap;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Map, Value};
use tokio::fs;
use tracing::{error, info, warn};

use crate::queue::Folder;
use crate::routes::AppState;
use crate::types::{AppError, AppResult};

const JOB_FILE_SUFFIX: &str = "_data.json";

type ApiResponse = (StatusCode, Json<Value>);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/upload-json", post(upload_json))
        .route("/count", get(count_jobs))
        .route("/invalidate/{hours}", post(invalidate_jobs))
        .with_state(state)
}

fn bad_request(message: impl Into<String>) -> ApiResponse {
    (StatusCode::BAD_REQUEST, Json(json!({"error": message.into()})))
}

fn internal_error(e: AppError) -> ApiResponse {
    error!(error = %e, "Intake request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": e.to_string()})),
    )
}

/// A name component that stays inside its folder.
fn safe_component(value: &str) -> bool {
    !value.contains(['/', '\\']) && !value.contains("..")
}

/// `{prefix}{id}_data.json` for an uploaded job record.
fn job_file_name(record: &Map<String, Value>) -> Result<String, String> {
    let id = match record.get("id") {
        Some(Value::String(id)) if !id.is_empty() => id,
        _ => return Err("Invalid JSON format".to_string()),
    };
    let prefix = record.get("prefix").and_then(Value::as_str).unwrap_or("");

    if !safe_component(id) || !safe_component(prefix) {
        return Err("id and prefix must not contain path separators".to_string());
    }
    Ok(format!("{}{}{}", prefix, id, JOB_FILE_SUFFIX))
}

fn wants_priority(record: &Map<String, Value>) -> bool {
    match record.get("priority") {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::Number(n)) => n.as_f64() != Some(0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

async fn upload_json(State(state): State<AppState>, body: Bytes) -> ApiResponse {
    let record = match serde_json::from_slice::<Value>(&body) {
        Ok(Value::Object(record)) => record,
        Ok(_) | Err(_) => return bad_request("Invalid JSON format"),
    };

    let file_name = match job_file_name(&record) {
        Ok(name) => name,
        Err(message) => {
            warn!(error = %message, "Rejected upload");
            return bad_request(message);
        }
    };

    let folder = if wants_priority(&record) {
        Folder::Priority
    } else {
        Folder::Pending
    };

    match write_job(&state, folder, &file_name, &record).await {
        Ok(()) => {
            info!(file = %file_name, folder = %folder, "JSON file saved");
            (
                StatusCode::OK,
                Json(json!({"message": "JSON file saved successfully", "file": file_name})),
            )
        }
        Err(e) => internal_error(e),
    }
}

/// Write under a name the scheduler ignores, then rename into place.
async fn write_job(
    state: &AppState,
    folder: Folder,
    file_name: &str,
    record: &Map<String, Value>,
) -> AppResult<()> {
    let dir = state.queue.path(folder);
    fs::create_dir_all(&dir).await?;

    let temp_path = dir.join(format!(".{}.tmp", file_name));
    fs::write(&temp_path, serde_json::to_vec_pretty(record)?).await?;

    if let Err(e) = fs::rename(&temp_path, dir.join(file_name)).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e.into());
    }
    Ok(())
}

async fn count_jobs(State(state): State<AppState>) -> ApiResponse {
    let mut counts = BTreeMap::new();
    for folder in Folder::ALL {
        match state.queue.count(folder).await {
            Ok(count) => {
                counts.insert(folder.dir_name(), count);
            }
            Err(e) => return internal_error(e),
        }
    }
    (StatusCode::OK, Json(json!(counts)))
}

async fn invalidate_jobs(State(state): State<AppState>, Path(hours): Path<u64>) -> ApiResponse {
    let max_age = Duration::from_secs(hours.saturating_mul(3600));
    let mut removed = 0;

    for folder in [Folder::Pending, Folder::Priority] {
        match state.queue.remove_older_than(folder, max_age).await {
            Ok(count) => removed += count,
            Err(e) => return internal_error(e),
        }
    }

    info!(hours, removed, "Invalidated queued jobs");
    (StatusCode::OK, Json(json!({"removed": removed})))
}
