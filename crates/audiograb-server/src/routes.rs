//! `/convert` and `/health` handlers.

use audiograb_core::{Artifact, ConversionResult, Handoff, RawConversionRequest};
use axum::extract::{Form, FromRequest, Multipart, Request, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::ServerError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/convert", post(convert))
        .route("/health", get(health))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// Fields of the url-encoded conversion form
#[derive(Debug, Deserialize)]
struct ConvertForm {
    video_url: Option<String>,
    format: Option<String>,
    bitrate: Option<String>,
}

/// Convert a video URL or an uploaded file (`POST /convert`).
///
/// Accepts `application/x-www-form-urlencoded` (`video_url`, `format`,
/// `bitrate`) or `multipart/form-data` (`file`, `video_url`, `format`,
/// `bitrate`) and answers with the audio as an attachment.
async fn convert(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response, ServerError> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    let raw = if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(request, &())
            .await
            .map_err(|rejection| ServerError::Request {
                status: rejection.status(),
                message: rejection.body_text(),
            })?;
        read_multipart(multipart).await?
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        let Form(form) = Form::<ConvertForm>::from_request(request, &())
            .await
            .map_err(|rejection| ServerError::Request {
                status: rejection.status(),
                message: rejection.body_text(),
            })?;
        RawConversionRequest {
            video_url: form.video_url,
            upload: None,
            format: form.format,
            bitrate_kbps: parse_bitrate(form.bitrate.as_deref())?,
        }
    } else {
        return Err(ServerError::Request {
            status: StatusCode::UNSUPPORTED_MEDIA_TYPE,
            message: "expected a url-encoded or multipart form".to_string(),
        });
    };

    let request = raw.into_request(state.pipeline.settings().default_format)?;
    // Dropped with the handler future if the client goes away
    let cancel = state.shutdown.child_token();
    let result = state
        .pipeline
        .convert(request, Handoff::InMemory, &cancel)
        .await?;

    info!(filename = %result.filename, size_bytes = result.size_bytes, "sending audio");
    audio_response(result)
}

async fn read_multipart(mut multipart: Multipart) -> Result<RawConversionRequest, ServerError> {
    let mut raw = RawConversionRequest::default();
    let mut bitrate = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(multipart_error)?;
                debug!(file_name = %file_name, size_bytes = bytes.len(), "received file upload");
                // Browsers send an empty part when no file was chosen
                if !(file_name.is_empty() && bytes.is_empty()) {
                    raw.upload = Some((bytes.to_vec(), file_name));
                }
            }
            "video_url" => raw.video_url = Some(field.text().await.map_err(multipart_error)?),
            "format" => raw.format = Some(field.text().await.map_err(multipart_error)?),
            "bitrate" => bitrate = Some(field.text().await.map_err(multipart_error)?),
            other => debug!(field = %other, "ignoring unknown form field"),
        }
    }

    raw.bitrate_kbps = parse_bitrate(bitrate.as_deref())?;
    Ok(raw)
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> ServerError {
    ServerError::Request {
        status: e.status(),
        message: e.body_text(),
    }
}

fn parse_bitrate(raw: Option<&str>) -> Result<Option<u32>, ServerError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value
            .trim_end_matches('k')
            .parse()
            .map(Some)
            .map_err(|_| ServerError::bad_request(format!("invalid bitrate: {}", value))),
    }
}

fn audio_response(result: ConversionResult) -> Result<Response, ServerError> {
    let Artifact::Bytes(bytes) = result.artifact else {
        return Err(ServerError::Internal(
            "pipeline returned a file artifact for an in-memory handoff".to_string(),
        ));
    };
    let headers = [
        (CONTENT_TYPE, result.format.mime_type().to_string()),
        (CONTENT_DISPOSITION, content_disposition(&result.filename)),
    ];
    Ok((headers, bytes).into_response())
}

/// `attachment` with an ASCII fallback name plus the RFC 5987 UTF-8 form
fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| match c {
            ' '..='~' if c != '"' && c != '\\' => c,
            _ => '_',
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(filename)
    )
}
