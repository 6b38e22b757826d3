//! HTTP front end: upload a PDF, get its text back as a download.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartError},
    http::{HeaderName, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use indicatif::ProgressBar;
use serde::Serialize;
use tempfile::TempDir;

use crate::{
    errors::ExtractError,
    ocr::OcrEngine,
    pipeline::{ExtractOptions, extract_to_file, output::output_file_name},
    prelude::*,
};

/// Header carrying the processing time, in seconds.
const ELAPSED_HEADER: HeaderName = HeaderName::from_static("x-elapsed-seconds");

/// The upload form.
const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Text Extraction from PDF</title></head>
<body>
<h1>Text Extraction from PDF</h1>
<form action="/extract" method="post" enctype="multipart/form-data">
  <label>Choose a PDF file <input type="file" name="file" accept="application/pdf,.pdf" required></label>
  <button type="submit">Extract text</button>
</form>
<p>Extraction can take a while for long documents. The text file downloads when it's ready.</p>
</body>
</html>
"#;

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<dyn OcrEngine>,
    pub opts: Arc<ExtractOptions>,
}

/// Build our router.
pub fn create_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/extract", post(extract))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

/// Run the web server until Ctrl-C.
pub async fn serve(listen: SocketAddr, state: AppState, max_upload_bytes: usize) -> Result<()> {
    let app = create_router(state, max_upload_bytes);
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("cannot listen on {}", listen))?;
    info!("Starting server at http://{}", listen);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
            info!("Shutting down");
        })
        .await
        .context("server failed")?;
    Ok(())
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    jobs: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        jobs: state.opts.jobs,
    })
}

/// Run an uploaded PDF through the pipeline and return its text as an
/// attachment.
#[instrument(level = "info", skip_all)]
async fn extract(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("file") {
            let file_name = field.file_name().unwrap_or("upload.pdf").to_owned();
            let data = field.bytes().await?;
            upload = Some((file_name, data));
        }
    }
    let (file_name, data) =
        upload.ok_or_else(|| AppError::BadRequest("missing `file` field".to_owned()))?;
    debug!(file_name = %file_name, len = data.len(), "Received upload");

    let output_name = output_file_name(&file_name)
        .map_err(|err| AppError::BadRequest(format!("{:#}", err)))?;
    // Each request gets its own directory, so concurrent uploads of files
    // with the same name can't collide.
    let tmpdir = TempDir::with_prefix("pdf-image-ocr")?;
    let output_path = tmpdir.path().join(&output_name);

    let report = extract_to_file(
        data.to_vec(),
        &output_path,
        state.engine.clone(),
        &state.opts,
        &ProgressBar::hidden(),
        std::future::pending(),
    )
    .await?;
    let text = tokio::fs::read(&report.output_path).await?;

    let headers = [
        (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_owned()),
        (
            header::CONTENT_DISPOSITION,
            format!(
                "attachment; filename=\"{}\"",
                header_safe_file_name(&output_name)
            ),
        ),
        (
            ELAPSED_HEADER,
            format!("{:.2}", report.elapsed.as_secs_f64()),
        ),
    ];
    Ok((headers, text).into_response())
}

/// Make a file name safe to quote in a header.
fn header_safe_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_graphic() && c != '"' && c != '\\' || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Errors returned by our handlers.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Upload(MultipartError),
    Extract(ExtractError),
    Internal(anyhow::Error),
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::Upload(err)
    }
}

impl From<ExtractError> for AppError {
    fn from(err: ExtractError) -> Self {
        AppError::Extract(err)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Upload(err) => (err.status(), err.body_text()),
            AppError::Extract(err) if err.is_bad_input() => {
                (StatusCode::BAD_REQUEST, err.to_string())
            }
            AppError::Extract(err) => {
                error!("Extraction failed: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            AppError::Internal(err) => {
                error!("Internal error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Internal server error: {}", err),
                )
            }
        };
        let body = Json(serde_json::json!({ "error": message }));
        (status, body).into_response()
    }
}
