//! Task API handlers: the submission/control façade over the core.
//!
//! All validation the core relies on happens here: at least one
//! identifier or search term, identifier syntax, clamped counts, and a
//! creatable output folder. Everything past this layer is recorded in the
//! status ledger instead of being thrown.

use axum::{
    extract::{Path as AxumPath, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use archivedl_core::{
    is_valid_identifier, new_task_id, Credentials, FetchOptions, Job, StopError, TaskState,
    TaskStatus,
};

use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for creating a task
#[derive(Debug, Deserialize)]
pub struct CreateTaskBody {
    /// Explicit item identifiers.
    #[serde(default)]
    pub identifiers: Vec<String>,
    /// Search terms to expand into identifiers.
    #[serde(default)]
    pub search_terms: Vec<String>,
    /// Subfolder of the configured download dir; the download dir itself
    /// when omitted.
    #[serde(default)]
    pub output_folder: Option<String>,
    #[serde(default)]
    pub options: TaskOptionsBody,
    #[serde(default)]
    pub credentials: Option<CredentialsBody>,
}

/// Per-task options in the request body
#[derive(Debug, Default, Deserialize)]
pub struct TaskOptionsBody {
    pub thread_count: Option<usize>,
    pub split_count: Option<usize>,
    pub verify: Option<bool>,
    pub resume: Option<bool>,
    #[serde(default)]
    pub file_filters: Vec<String>,
    #[serde(default)]
    pub invert_file_filtering: bool,
    #[serde(default)]
    pub refresh_cache: bool,
}

/// Credentials in the request body
#[derive(Debug, Deserialize)]
pub struct CredentialsBody {
    pub principal: String,
    pub secret: String,
}

/// Response for a successful submission
#[derive(Debug, Serialize)]
pub struct CreateTaskResponse {
    pub task_id: String,
}

/// Response for task queries
#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub id: String,
    #[serde(flatten)]
    pub status: TaskStatus,
}

/// Response for listing tasks
#[derive(Debug, Serialize)]
pub struct ListTasksResponse {
    pub tasks: Vec<TaskResponse>,
    pub total: usize,
}

/// Response for a stop request
#[derive(Debug, Serialize)]
pub struct StopTaskResponse {
    pub task_id: String,
    pub previous_state: TaskState,
    pub state: TaskState,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct TaskErrorResponse {
    pub error: String,
}

type TaskError = (StatusCode, Json<TaskErrorResponse>);

fn bad_request(message: impl Into<String>) -> TaskError {
    (
        StatusCode::BAD_REQUEST,
        Json(TaskErrorResponse {
            error: message.into(),
        }),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// Submit a new task
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateTaskBody>,
) -> Result<(StatusCode, Json<CreateTaskResponse>), TaskError> {
    let identifiers: Vec<String> = body
        .identifiers
        .iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect();
    let search_terms: Vec<String> = body
        .search_terms
        .iter()
        .map(|term| term.trim().to_string())
        .filter(|term| !term.is_empty())
        .collect();

    if identifiers.is_empty() && search_terms.is_empty() {
        return Err(bad_request(
            "provide at least one identifier or search term",
        ));
    }

    for identifier in &identifiers {
        if !is_valid_identifier(identifier) {
            return Err(bad_request(format!("invalid identifier: '{}'", identifier)));
        }
    }

    let max_count = state.config().engine.max_thread_count.max(1);
    let options = FetchOptions {
        thread_count: body.options.thread_count.unwrap_or(3).clamp(1, max_count),
        split_count: body.options.split_count.unwrap_or(1).clamp(1, max_count),
        verify: body.options.verify.unwrap_or(true),
        resume: body.options.resume.unwrap_or(true),
        file_filters: body.options.file_filters,
        invert_file_filtering: body.options.invert_file_filtering,
        refresh_cache: body.options.refresh_cache,
    };

    let output_folder =
        resolve_output_folder(&state, body.output_folder.as_deref()).map_err(bad_request)?;
    if let Err(e) = tokio::fs::create_dir_all(&output_folder).await {
        return Err(bad_request(format!(
            "output folder '{}' cannot be created: {}",
            output_folder.display(),
            e
        )));
    }

    let task_id = new_task_id(Utc::now());
    let job = Job {
        id: task_id.clone(),
        identifiers,
        search_terms,
        output_folder,
        hash_file_path: state.hash_manifest_path(&task_id),
        options,
        credentials: body.credentials.map(|c| Credentials {
            principal: c.principal,
            secret: c.secret,
        }),
    };

    match state.orchestrator().submit(job) {
        Ok(()) => Ok((StatusCode::CREATED, Json(CreateTaskResponse { task_id }))),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(TaskErrorResponse {
                error: e.to_string(),
            }),
        )),
    }
}

/// Get one task's status
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<TaskResponse>, TaskError> {
    match state.orchestrator().status(&id) {
        Some(status) => Ok(Json(TaskResponse { id, status })),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(TaskErrorResponse {
                error: format!("Task not found: {}", id),
            }),
        )),
    }
}

/// List every task, most recently submitted first
pub async fn list_tasks(State(state): State<Arc<AppState>>) -> Json<ListTasksResponse> {
    let tasks: Vec<TaskResponse> = state
        .orchestrator()
        .list()
        .into_iter()
        .map(|(id, status)| TaskResponse { id, status })
        .collect();
    let total = tasks.len();
    Json(ListTasksResponse { tasks, total })
}

/// Request a cooperative stop
pub async fn stop_task(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<StopTaskResponse>, TaskError> {
    match state.orchestrator().stop(&id) {
        Ok(previous_state) => Ok(Json(StopTaskResponse {
            task_id: id,
            previous_state,
            state: TaskState::Stopped,
        })),
        Err(StopError::NotFound(_)) => Err((
            StatusCode::NOT_FOUND,
            Json(TaskErrorResponse {
                error: format!("Task not found: {}", id),
            }),
        )),
        Err(e @ StopError::InvalidState { .. }) => Err((
            StatusCode::CONFLICT,
            Json(TaskErrorResponse {
                error: e.to_string(),
            }),
        )),
    }
}

/// Resolve the requested output folder under the configured download dir,
/// rejecting anything that would escape it.
fn resolve_output_folder(state: &AppState, requested: Option<&str>) -> Result<PathBuf, String> {
    let base = state.config().storage.download_dir.clone();
    let Some(requested) = requested.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(base);
    };

    let relative = Path::new(requested);
    if relative.is_absolute() {
        return Err("output_folder must be relative to the download dir".to_string());
    }
    for component in relative.components() {
        match component {
            Component::Normal(_) => {}
            _ => return Err(format!("invalid output_folder: '{}'", requested)),
        }
    }
    Ok(base.join(relative))
}
