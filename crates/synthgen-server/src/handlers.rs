use axum::{
    Json,
    body::{Body, Bytes},
    extract::{FromRequest, Path, Request, State},
    http::{
        HeaderValue, StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{Html, IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use tokio_util::io::ReaderStream;

use synthgen_core::catalog::ARCHIVE_NAME;
use synthgen_core::{CatalogError, GenerationRequest, OutputFile, materialize};

use crate::error::ApiError;
use crate::server::AppState;

const INDEX_HTML: &str = include_str!("../ui/index.html");
const OUTPUT_DIR_PLACEHOLDER: &str = "{{OUTPUT_DIR}}";

#[derive(Serialize)]
pub struct HealthResponse<'a> {
    status: &'a str,
}

pub async fn root(State(state): State<AppState>) -> Html<String> {
    let output_dir = state.catalog.root().display().to_string();
    Html(INDEX_HTML.replace(OUTPUT_DIR_PLACEHOLDER, &escape_html(&output_dir)))
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// Generation request body, JSON or form encoded.
pub struct GenerationPayload(pub GenerationRequest);

impl<S> FromRequest<S> for GenerationPayload
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
        let bytes = Bytes::from_request(req, state).await?;

        let request = if is_form {
            GenerationRequest::from_form_pairs(url::form_urlencoded::parse(&bytes))?
        } else {
            serde_json::from_slice(&bytes).map_err(|e| ApiError::MalformedBody(e.to_string()))?
        };
        Ok(Self(request))
    }
}

/// POST /generate
///
/// Answers 202 once the generator is running; output follows on `/stream`.
pub async fn generate(
    State(state): State<AppState>,
    GenerationPayload(request): GenerationPayload,
) -> Result<Response, ApiError> {
    let request = request.validated()?;

    // Held until the new job is installed.
    let mut slot = state.jobs.lock().await;
    slot.ensure_idle()?;

    let exporter = materialize(&request, state.catalog.root());
    let dropped: Vec<&str> = exporter
        .dropped_fhir_variants()
        .iter()
        .map(|f| f.as_str())
        .collect();
    if !dropped.is_empty() {
        tracing::warn!(dropped = ?dropped, "only one FHIR version can be exported per run");
    }
    state.config_writer.write(&exporter).await?;

    let command = state.launch.command_for(&request);
    let handle = state.runner.run(command, state.catalog.root())?;
    let job = handle.snapshot();
    slot.install(handle);

    let mut body = json!({
        "status": "accepted",
        "job": job,
    });
    if !dropped.is_empty() {
        body["dropped_formats"] = json!(dropped);
    }
    Ok((StatusCode::ACCEPTED, Json(body)).into_response())
}

/// GET /status
pub async fn status(State(state): State<AppState>) -> Response {
    match state.jobs.current().await {
        Some(handle) => Json(handle.snapshot()).into_response(),
        None => Json(json!({ "status": "idle" })).into_response(),
    }
}

/// GET /list_files
pub async fn list_files(State(state): State<AppState>) -> Result<Json<Vec<OutputFile>>, ApiError> {
    let catalog = state.catalog.clone();
    let files = tokio::task::spawn_blocking(move || match catalog.list() {
        Err(CatalogError::DirectoryMissing) => {
            tracing::warn!("output directory missing; recreating it");
            catalog.ensure_layout()?;
            Ok(Vec::new())
        }
        other => other,
    })
    .await??;
    Ok(Json(files))
}

/// GET /download/{*path}
pub async fn download(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, ApiError> {
    let catalog = state.catalog.clone();
    let fetched = tokio::task::spawn_blocking(move || catalog.fetch(&path)).await??;
    let mime = mime_guess::from_path(&fetched.path).first_or_octet_stream();
    tracing::info!(file = %fetched.file_name, size = fetched.size_bytes, "serving file");
    Ok(attachment(
        tokio::fs::File::from_std(fetched.file),
        &fetched.file_name,
        mime.as_ref(),
        fetched.size_bytes,
    ))
}

/// GET /download_all
pub async fn download_all(State(state): State<AppState>) -> Result<Response, ApiError> {
    let catalog = state.catalog.clone();
    let archive = tokio::task::spawn_blocking(move || catalog.archive()).await??;
    Ok(attachment(
        tokio::fs::File::from_std(archive.file),
        ARCHIVE_NAME,
        "application/zip",
        archive.size_bytes,
    ))
}

/// POST /cleanup
pub async fn cleanup(State(state): State<AppState>) -> Result<Response, ApiError> {
    // Keeps new jobs out while the tree is being removed.
    let slot = state.jobs.lock().await;
    slot.ensure_idle()?;

    let catalog = state.catalog.clone();
    let report = tokio::task::spawn_blocking(move || catalog.clear()).await??;
    drop(slot);

    Ok(Json(json!({
        "status": "success",
        "removed_files": report.removed_files,
        "failures": report.failures,
    }))
    .into_response())
}

fn attachment(file: tokio::fs::File, file_name: &str, content_type: &str, len: u64) -> Response {
    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(content_type) {
        headers.insert(CONTENT_TYPE, value);
    }
    let disposition = format!("attachment; filename=\"{}\"", header_safe_name(file_name));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(CONTENT_DISPOSITION, value);
    }
    headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
    response
}

/// Printable ASCII only, without quotes or backslashes.
fn header_safe_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect()
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_names_are_sanitized() {
        assert_eq!(header_safe_name("patients.csv"), "patients.csv");
        assert_eq!(header_safe_name("a\"b\\c.json"), "a_b_c.json");
        assert_eq!(header_safe_name("zoë.txt"), "zo_.txt");
    }

    #[test]
    fn html_escaping() {
        assert_eq!(escape_html("/app/<out>&\""), "/app/&lt;out&gt;&amp;&quot;");
    }

    #[test]
    fn index_page_has_output_dir_placeholder() {
        assert!(INDEX_HTML.contains(OUTPUT_DIR_PLACEHOLDER));
    }
}
