//! Route handlers.

use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use prism_core::output::to_ndjson_line;
use prism_core::{
    BatchError, BatchJob, BatchRequest, BatchTicket, ClearReport, MetricsReport, SourceImage,
    TransformRequest, WriteFormat,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::error::{ApiError, ApiResult};
use super::AppState;

/// Header carrying the caller's identity, set by the auth layer in front.
pub const OWNER_HEADER: &str = "x-prism-owner";

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/batches", post(create_batch).get(list_batches))
        .route("/api/batches/{id}", get(get_batch))
        .route("/api/batches/{id}/events", get(batch_events))
        .route("/api/batches/{id}/cancel", post(cancel_batch))
        .route("/api/batches/{id}/archive", get(batch_archive))
        .route("/api/cache/metrics", get(cache_metrics))
        .route("/api/cache", axum::routing::delete(clear_cache))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: prism_core::VERSION,
    })
}

fn owner(headers: &HeaderMap) -> ApiResult<String> {
    headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::unauthorized(format!("Missing {OWNER_HEADER} header")))
}

/// The job, if it exists and belongs to the caller. Other owners' batches
/// are reported as missing.
fn owned_job(state: &AppState, id: Uuid, owner: &str) -> ApiResult<BatchJob> {
    let job = state.prism.coordinator().job(id)?;
    if job.owner != owner {
        return Err(BatchError::NotFound(id.to_string()).into());
    }
    Ok(job)
}

/// `POST /api/batches`
///
/// Multipart fields: `files` (one part per image), optional `watermark`
/// (overlay image), optional `concurrency`, and either `preset` or
/// transform options by name. Anything else is treated as an option and
/// rejected by the resolver if unknown.
async fn create_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<BatchTicket>)> {
    let owner = owner(&headers)?;
    let coordinator = state.prism.coordinator();
    let max_items = state.prism.config().processing.max_batch_items;

    let mut sources = Vec::new();
    let mut fields = BTreeMap::new();
    let mut concurrency = None;
    let mut overlay = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "files" | "files[]" => {
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("image-{}", sources.len() + 1));
                let bytes = field.bytes().await?;
                sources.push(SourceImage::inline(file_name, bytes.to_vec()));
                if sources.len() > max_items {
                    return Err(BatchError::TooManyItems {
                        count: sources.len(),
                        max: max_items,
                    }
                    .into());
                }
            }
            "watermark" => overlay = Some(field.bytes().await?.to_vec()),
            "concurrency" => {
                let text = field.text().await?;
                let value = text.trim().parse::<usize>().map_err(|_| {
                    BatchError::invalid("concurrency", format!("`{}` is not a count", text.trim()))
                })?;
                concurrency = Some(value);
            }
            "" => return Err(ApiError::bad_request("Multipart field without a name")),
            _ => {
                fields.insert(name, field.text().await?);
            }
        }
    }

    if let Some(bytes) = overlay {
        let uri = coordinator.upload_overlay(bytes).await?;
        fields.insert("watermark_image".to_string(), uri);
    }

    let ticket = coordinator
        .submit(BatchRequest {
            owner,
            sources,
            transform: TransformRequest::from_fields(fields),
            concurrency,
        })
        .await?;
    Ok((StatusCode::ACCEPTED, Json(ticket)))
}

async fn list_batches(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<BatchJob>>> {
    let owner = owner(&headers)?;
    Ok(Json(state.prism.coordinator().list(Some(&owner))))
}

async fn get_batch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Json<BatchJob>> {
    let owner = owner(&headers)?;
    Ok(Json(owned_job(&state, id, &owner)?))
}

/// `GET /api/batches/{id}/events`: NDJSON, one event per line, ending
/// with the `complete` summary.
async fn batch_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let owner = owner(&headers)?;
    owned_job(&state, id, &owner)?;
    let subscription = state.prism.coordinator().subscribe(id)?;

    let lines = subscription
        .into_stream()
        .map(|event| to_ndjson_line(&event));
    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(WriteFormat::Ndjson.content_type()),
    );
    response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    Ok((response_headers, Body::from_stream(lines)))
}

async fn cancel_batch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<(StatusCode, Json<BatchJob>)> {
    let owner = owner(&headers)?;
    owned_job(&state, id, &owner)?;
    let coordinator = state.prism.coordinator();
    coordinator.cancel(id)?;
    Ok((StatusCode::ACCEPTED, Json(coordinator.job(id)?)))
}

async fn batch_archive(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let owner = owner(&headers)?;
    owned_job(&state, id, &owner)?;
    let bytes = state.prism.coordinator().archive(id).await?;

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/zip"),
    );
    response_headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename=\"prism-{id}.zip\""))
            .map_err(|e| ApiError::internal(format!("Invalid header value: {e}")))?,
    );
    Ok((response_headers, bytes))
}

async fn cache_metrics(State(state): State<AppState>) -> Json<MetricsReport> {
    Json(state.prism.metrics_report().await)
}

#[derive(Debug, Deserialize)]
struct ClearQuery {
    scope: Option<String>,
}

async fn clear_cache(
    State(state): State<AppState>,
    Query(query): Query<ClearQuery>,
) -> Json<ClearReport> {
    let scope = query.scope.as_deref().filter(|s| !s.is_empty());
    Json(state.prism.coordinator().cache().clear(scope).await)
}
