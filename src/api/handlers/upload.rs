use crate::AppState;
use crate::api::error::AppError;
use crate::models::{UploadEvent, UploadOutcome};
use crate::services::upload_store::SavedFile;
use crate::utils::validation::{sanitize_filename, validate_file_size, verify_not_executable};
use axum::{
    Json,
    extract::{
        Multipart, Query, State,
        multipart::{Field, MultipartError},
    },
    http::StatusCode,
};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UploadQuery {
    /// Session id announced on the `/ws` connection
    pub session_id: String,
}

/// Multipart body accepted by `/upload`
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct UploadForm {
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    pub file_name: String,
    pub file_path: String,
    pub size: u64,
}

#[utoipa::path(
    post,
    path = "/upload",
    params(UploadQuery),
    request_body(content = UploadForm, content_type = "multipart/form-data", description = "Image to OCR"),
    responses(
        (status = 200, description = "File saved and queued for OCR", body = UploadResponse),
        (status = 400, description = "Missing session or rejected file"),
        (status = 413, description = "File too large")
    ),
    tag = "upload"
)]
pub async fn upload_file(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let session_id = query.session_id.trim().to_string();
    if session_id.is_empty() {
        return Err(AppError::BadRequest("session_id is required".to_string()));
    }

    let mut saved: Option<(String, SavedFile)> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                let err = multipart_error(e);
                report_failure(&state, "unnamed", &session_id, &err);
                return Err(err);
            }
        };
        if field.name() != Some("file") {
            continue;
        }

        let original_filename = field.file_name().unwrap_or("unnamed").to_string();
        match store_field(&state, &original_filename, field).await {
            Ok(file) => {
                saved = Some((original_filename, file));
                break;
            }
            Err(err) => {
                report_failure(&state, &original_filename, &session_id, &err);
                return Err(err);
            }
        }
    }

    let Some((file_name, file)) = saved else {
        let err = AppError::BadRequest("No file provided".to_string());
        report_failure(&state, "unnamed", &session_id, &err);
        return Err(err);
    };

    info!(
        file = %file_name,
        size = file.size,
        session_id = %session_id,
        "💾 Upload saved to {}",
        file.path.display()
    );

    let response = UploadResponse {
        file_name: file_name.clone(),
        file_path: file.path.display().to_string(),
        size: file.size,
    };

    state
        .uploads
        .send(UploadOutcome::Saved(UploadEvent {
            file_name,
            file_path: file.path,
            file_size_bytes: file.size,
            session_id,
        }))
        .map_err(|_| AppError::Unavailable("Relay is not running".to_string()))?;

    Ok(Json(response))
}

async fn store_field(
    state: &AppState,
    original_filename: &str,
    field: Field<'_>,
) -> Result<SavedFile, AppError> {
    // 1. Sanitize filename
    let filename =
        sanitize_filename(original_filename).map_err(|e| AppError::BadRequest(e.to_string()))?;

    // 2. Peek into stream for magic bytes
    let body_with_io_error = field.map_err(std::io::Error::other);
    let mut reader = StreamReader::new(body_with_io_error);

    let mut header_buffer = [0u8; 1024];
    let n = reader
        .read(&mut header_buffer)
        .await
        .map_err(|e| stream_error(&e))?;
    let header = &header_buffer[..n];

    verify_not_executable(header).map_err(|e| AppError::BadRequest(e.to_string()))?;

    // 3. Write header + rest of the stream to the upload dir
    let header_cursor = std::io::Cursor::new(header.to_vec());
    let chained_reader = AsyncReadExt::chain(header_cursor, reader);
    let file = match state.store.save(&filename, chained_reader).await {
        Ok(file) => file,
        Err(e) => {
            let _ = state.store.remove(&filename).await;
            return Err(match e.downcast_ref::<std::io::Error>() {
                Some(io) => stream_error(io),
                None => AppError::Anyhow(e),
            });
        }
    };

    // 4. Post-upload size validation
    if let Err(e) = validate_file_size(file.size, state.config.max_file_size) {
        let _ = state.store.remove(&filename).await;
        return Err(AppError::PayloadTooLarge(e.to_string()));
    }

    Ok(file)
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(e.body_text())
    } else {
        AppError::BadRequest(e.body_text())
    }
}

/// Field bodies reach the store as `io::Error`s wrapping the multipart error,
/// so an exceeded body limit is recovered from inside it.
fn stream_error(e: &std::io::Error) -> AppError {
    let limited = e
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<MultipartError>())
        .is_some_and(|m| m.status() == StatusCode::PAYLOAD_TOO_LARGE);

    if limited {
        AppError::PayloadTooLarge(e.to_string())
    } else {
        AppError::Internal(format!("Read error: {}", e))
    }
}

fn report_failure(state: &AppState, file_name: &str, session_id: &str, err: &AppError) {
    warn!(file = %file_name, "Upload rejected: {}", err);
    let _ = state.uploads.send(UploadOutcome::Failed {
        file_name: file_name.to_string(),
        session_id: session_id.to_string(),
        reason: err.to_string(),
    });
}
