//! HTTP request handlers

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::constants::CLIENT_ID_HEADER;
use crate::error::IngestError;
use crate::protocol::{AudioSourceInfo, HealthResponse, IngestMessage, StatsResponse};
use crate::relay::source::{anonymous_display_name, GENERATED_ID_PREFIX};
use crate::relay::SourceUpdate;
use crate::server::http::AppState;

const SAMPLE_RATE_HEADER: &str = "x-sample-rate";
const CHANNELS_HEADER: &str = "x-channels";
const BITS_PER_SAMPLE_HEADER: &str = "x-bits-per-sample";

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, self.to_string()).into_response()
    }
}

/// Parse and validate an `/audio` request body
pub fn decode_ingest(body: &[u8]) -> Result<IngestMessage, IngestError> {
    let message: IngestMessage =
        serde_json::from_slice(body).map_err(|e| IngestError::Decode(e.to_string()))?;

    let format = message.audio_format();
    if !format.is_valid() {
        return Err(IngestError::InvalidFormat(format));
    }
    Ok(message)
}

/// Source identity of an upload: machine id, then `X-Client-ID`, then a
/// freshly generated id. The flag is set when the id was generated.
fn resolve_source_id(machine_id: Option<&str>, headers: &HeaderMap) -> (String, bool) {
    if let Some(id) = machine_id.filter(|id| !id.is_empty()) {
        return (id.to_string(), false);
    }

    let header_id = headers
        .get(CLIENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|id| !id.is_empty());
    match header_id {
        Some(id) => (id.to_string(), false),
        None => (format!("{}{}", GENERATED_ID_PREFIX, Uuid::new_v4().simple()), true),
    }
}

/// `POST /audio`
pub async fn ingest_audio(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let message = match decode_ingest(&body) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!("Rejected audio upload: {}", e);
            return e.into_response();
        }
    };

    let (source_id, generated) = resolve_source_id(message.machine_id.as_deref(), &headers);
    let mut name = message.client_name.clone();
    if message.machine_id.as_deref().map_or(true, str::is_empty) {
        tracing::debug!("Audio received without machine id, using fallback id {}", source_id);
        name = name.or_else(|| Some(anonymous_display_name(&source_id)));
    }

    let update = SourceUpdate::new(source_id.clone(), message.audio_format(), message.audio_data)
        .with_name(name)
        .with_format_label(message.format);
    state.dispatcher.ingest(update);

    let mut response = StatusCode::OK.into_response();
    if generated {
        if let Ok(value) = HeaderValue::from_str(&source_id) {
            response.headers_mut().insert(CLIENT_ID_HEADER, value);
        }
    }
    response
}

/// `GET /api/clients`
pub async fn list_clients(State(state): State<Arc<AppState>>) -> Json<Vec<AudioSourceInfo>> {
    Json(state.registry().snapshot())
}

/// `GET /api/clients/:id/chunk`
pub async fn latest_chunk(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let Some((format, chunk)) = state.registry().latest_chunk(&id) else {
        return (StatusCode::NOT_FOUND, "Unknown audio client").into_response();
    };

    let headers = [
        (header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream")),
        (HeaderName::from_static(SAMPLE_RATE_HEADER), HeaderValue::from(format.sample_rate)),
        (HeaderName::from_static(CHANNELS_HEADER), HeaderValue::from(format.channels)),
        (
            HeaderName::from_static(BITS_PER_SAMPLE_HEADER),
            HeaderValue::from(format.bits_per_sample),
        ),
    ];
    (headers, chunk).into_response()
}

/// `GET /api/stats`
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let registry = state.registry();
    let audio_clients = registry.snapshot();
    let browser_clients = registry.viewers();

    Json(StatsResponse {
        total_audio_clients: audio_clients.len(),
        total_browser_clients: browser_clients.len(),
        audio_clients,
        browser_clients,
        counters: state.dispatcher.counters(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let (audio_clients, browser_clients) = state.registry().counts();
    Json(HealthResponse {
        status: "running".to_string(),
        port: state.config.port,
        audio_clients,
        browser_clients,
        timestamp: Utc::now().to_rfc3339(),
    })
}
