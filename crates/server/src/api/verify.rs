//! Offline verification endpoint.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use archivedl_core::{load_manifest, verify_folder, VerifyError, VerifyOptions, VerifyReport};

use crate::state::AppState;

/// Request body for a verification run
#[derive(Debug, Deserialize)]
pub struct VerifyBody {
    /// Task whose manifest should be checked. Mutually exclusive with
    /// `manifest_path`.
    #[serde(default)]
    pub task_id: Option<String>,
    /// Explicit manifest path.
    #[serde(default)]
    pub manifest_path: Option<PathBuf>,
    /// Folder holding the previously-downloaded items.
    pub data_folder: PathBuf,
    #[serde(default)]
    pub no_paths: bool,
    #[serde(default)]
    pub identifiers: Option<Vec<String>>,
    #[serde(default)]
    pub file_filters: Vec<String>,
    #[serde(default)]
    pub invert_file_filtering: bool,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct VerifyErrorResponse {
    pub error: String,
}

type VerifyFailure = (StatusCode, Json<VerifyErrorResponse>);

fn failure(status: StatusCode, message: String) -> VerifyFailure {
    (status, Json(VerifyErrorResponse { error: message }))
}

/// Run an offline verification. Hashing happens off the async runtime.
pub async fn run_verify(
    State(state): State<Arc<AppState>>,
    Json(body): Json<VerifyBody>,
) -> Result<Json<VerifyReport>, VerifyFailure> {
    let manifest_path = match (&body.manifest_path, &body.task_id) {
        (Some(path), _) => path.clone(),
        (None, Some(task_id)) => state.hash_manifest_path(task_id),
        (None, None) => {
            return Err(failure(
                StatusCode::BAD_REQUEST,
                "provide either task_id or manifest_path".to_string(),
            ));
        }
    };

    let options = VerifyOptions {
        no_paths: body.no_paths,
        identifiers: body.identifiers,
        file_filters: body.file_filters,
        invert_file_filtering: body.invert_file_filtering,
    };
    let data_folder = body.data_folder;

    let report = tokio::task::spawn_blocking(move || -> Result<VerifyReport, VerifyError> {
        let manifest = load_manifest(&manifest_path)?;
        verify_folder(&manifest, &data_folder, &options)
    })
    .await
    .map_err(|e| {
        failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("verification task failed: {}", e),
        )
    })?;

    match report {
        Ok(report) => Ok(Json(report)),
        Err(e @ (VerifyError::ManifestNotFound(_) | VerifyError::FolderNotFound(_))) => {
            Err(failure(StatusCode::NOT_FOUND, e.to_string()))
        }
        Err(e @ VerifyError::MalformedLine { .. }) => {
            Err(failure(StatusCode::BAD_REQUEST, e.to_string()))
        }
        Err(e) => Err(failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}
