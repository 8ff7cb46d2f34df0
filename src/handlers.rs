use anyhow::{Context, anyhow};
use axum::{
    Router,
    extract::{
        DefaultBodyLimit, Multipart, State,
        multipart::{Field, MultipartRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use metrics::counter;
use serde_json::json;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::engine::Engine;
use crate::label::clean_label;
use crate::mapper::map_label_to_harvesting;
use crate::types::{ClassificationResponse, ErrorResponse};
use crate::upload::ScratchDir;

const FILE_FIELD: &str = "file";

#[derive(Clone)]
pub struct AppState {
    engine: Arc<dyn Engine + Send + Sync>,
    scratch: ScratchDir,
    legacy_error_status: bool,
}

impl AppState {
    pub fn new(
        engine: Arc<dyn Engine + Send + Sync>,
        scratch: ScratchDir,
        legacy_error_status: bool,
    ) -> Self {
        Self {
            engine,
            scratch,
            legacy_error_status,
        }
    }
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/classify/", post(classify_handler))
        .route("/classify", post(classify_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug)]
enum HandlerError {
    BadUpload(anyhow::Error),
    Scratch(anyhow::Error),
    Classification(anyhow::Error),
}

impl HandlerError {
    fn status(&self) -> StatusCode {
        match self {
            HandlerError::BadUpload(_) => StatusCode::BAD_REQUEST,
            HandlerError::Scratch(_) => StatusCode::INTERNAL_SERVER_ERROR,
            HandlerError::Classification(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    fn message(&self) -> String {
        match self {
            HandlerError::BadUpload(e)
            | HandlerError::Scratch(e)
            | HandlerError::Classification(e) => format!("{e:#}"),
        }
    }

    fn render(self, legacy_error_status: bool) -> Response {
        let status = if legacy_error_status {
            StatusCode::OK
        } else {
            self.status()
        };
        let body = ErrorResponse {
            error: self.message(),
        };
        (status, Json(body)).into_response()
    }
}

#[tracing::instrument(skip_all, fields(request_id = tracing::field::Empty, filename = tracing::field::Empty))]
async fn classify_handler(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    counter!("classification_requests_total").increment(1);

    let request_id = Uuid::new_v4();
    tracing::Span::current().record("request_id", tracing::field::display(request_id));

    let outcome = match multipart {
        Ok(multipart) => process_upload(&state, request_id, multipart).await,
        Err(rejection) => Err(HandlerError::BadUpload(
            anyhow!(rejection.body_text()).context("invalid multipart request"),
        )),
    };

    match outcome {
        Ok(response) => {
            tracing::info!(
                prediction = %response.prediction,
                mapped = response.harvesting_suggestion.is_mapped(),
                "Classification completed successfully"
            );
            Json(response).into_response()
        }
        Err(e) => {
            counter!("classification_failures_total").increment(1);
            tracing::error!(status = %e.status(), error = %e.message(), "Classification failed");
            e.render(state.legacy_error_status)
        }
    }
}

async fn process_upload(
    state: &AppState,
    request_id: Uuid,
    mut multipart: Multipart,
) -> Result<ClassificationResponse, HandlerError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .context("malformed multipart body")
        .map_err(HandlerError::BadUpload)?
    {
        if field.name() == Some(FILE_FIELD) {
            return classify_field(state, request_id, field).await;
        }
    }
    Err(HandlerError::BadUpload(anyhow!("no `{FILE_FIELD}` field in upload")))
}

async fn classify_field(
    state: &AppState,
    request_id: Uuid,
    mut field: Field<'_>,
) -> Result<ClassificationResponse, HandlerError> {
    let filename = field.file_name().unwrap_or_default().to_string();
    tracing::Span::current().record("filename", filename.as_str());

    // Removed on drop, so every early return below cleans up.
    let scratch = state
        .scratch
        .create_file(request_id, &filename)
        .context("could not create scratch file")
        .map_err(HandlerError::Scratch)?;

    let mut writer = scratch
        .writer()
        .context("could not open scratch file")
        .map_err(HandlerError::Scratch)?;
    while let Some(chunk) = field
        .chunk()
        .await
        .context("upload interrupted")
        .map_err(HandlerError::BadUpload)?
    {
        writer
            .write_all(&chunk)
            .await
            .context("could not write scratch file")
            .map_err(HandlerError::Scratch)?;
    }
    writer
        .flush()
        .await
        .context("could not write scratch file")
        .map_err(HandlerError::Scratch)?;
    drop(writer);

    tracing::debug!(path = %scratch.path().display(), "Upload stored");
    let result = state.engine.classify(scratch.path()).await;

    let scratch_path = scratch.path().to_path_buf();
    if let Err(e) = scratch.remove() {
        tracing::warn!(path = %scratch_path.display(), error = %e, "Failed to remove scratch file");
    }

    let raw_label = result.map_err(HandlerError::Classification)?;
    let prediction = clean_label(&raw_label);
    let harvesting_suggestion = map_label_to_harvesting(&prediction);

    Ok(ClassificationResponse {
        filename,
        prediction,
        harvesting_suggestion,
    })
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
