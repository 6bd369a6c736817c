use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::{
    chart::{ChartSource, HttpChartSource},
    config::AppConfig,
    error::AppError,
    payload::{decode_data_param, PayloadError, ReportPayload},
    report,
    report_layout::ReportLayout,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub charts: Arc<dyn ChartSource>,
    pub layout: Arc<ReportLayout>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            charts: Arc::new(HttpChartSource::new(config.chart_timeout)),
            layout: Arc::new(ReportLayout::default()),
            config: Arc::new(config),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct FillQuery {
    pub data: Option<String>,
    pub debug: Option<String>,
}

impl FillQuery {
    /// `?debug`, `?debug=1` and `?debug=true` all ask for diagnostics.
    fn debug_requested(&self) -> bool {
        matches!(self.debug.as_deref().map(str::trim), Some("" | "1" | "true" | "yes"))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/fill-template",
            get(fill_template_get).post(fill_template_post),
        )
        .route("/health", get(health))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "ok": true,
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn fill_template_get(
    State(state): State<AppState>,
    query: Result<Query<FillQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let Query(query) = query?;
    let raw = query.data.as_deref().ok_or(PayloadError::Missing)?;
    let value = decode_data_param(raw)?;
    respond(&state, value, query.debug_requested()).await
}

/// Accepts the payload object itself, or `{ "data": "<base64>" }`.
pub async fn fill_template_post(
    State(state): State<AppState>,
    query: Result<Query<FillQuery>, QueryRejection>,
    body: Bytes,
) -> Result<Response, AppError> {
    let Query(query) = query?;
    let value = if body.iter().all(u8::is_ascii_whitespace) {
        let raw = query.data.as_deref().ok_or(PayloadError::Missing)?;
        decode_data_param(raw)?
    } else {
        let value: Value = serde_json::from_slice(&body).map_err(PayloadError::from)?;
        match value.get("data").and_then(Value::as_str) {
            Some(encoded) => decode_data_param(encoded)?,
            None if value.is_object() => value,
            None => return Err(PayloadError::NotAnObject.into()),
        }
    };
    respond(&state, value, query.debug_requested()).await
}

async fn respond(state: &AppState, value: Value, debug: bool) -> Result<Response, AppError> {
    let request_id = Uuid::new_v4();
    let span = info_span!("fill_template", %request_id);
    async move {
        let payload = ReportPayload::from_value(&value);
        if debug || payload.debug {
            info!("🔎 Debug request, returning diagnostics");
            let diagnostics = report::diagnostics(&state.config, &payload);
            return Ok(Json(diagnostics).into_response());
        }

        info!(
            dom = ?payload.dom_key,
            second = ?payload.second_key,
            fields = payload.texts.len(),
            "📥 Rendering report"
        );
        let bytes = report::generate(
            &state.config,
            &state.layout,
            state.charts.as_ref(),
            &payload,
        )
        .await?;
        let file_name = report::attachment_file_name(payload.full_name(), payload.date_label());
        info!("📤 Sending {} ({} bytes)", file_name, bytes.len());
        Ok(pdf_response(bytes, &file_name, request_id))
    }
    .instrument(span)
    .await
}

fn pdf_response(bytes: Vec<u8>, file_name: &str, request_id: Uuid) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
            (header::CACHE_CONTROL, "no-store".to_string()),
            (header::HeaderName::from_static("x-request-id"), request_id.to_string()),
        ],
        bytes,
    )
        .into_response()
}
