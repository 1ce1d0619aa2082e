use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Request, State},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE, ORIGIN},
        request::Parts,
        HeaderValue, Method, StatusCode,
    },
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    services::ServeFile,
    trace::TraceLayer,
};

use crate::config::CorsConfig;
use crate::extract::{self, ExtractionError};
use crate::gemini::{GenerativeModel, UpstreamError};
use crate::models::{ErrorBody, ExtractRequest, ExtractResponse, InlineImage};

const BODY_LIMIT: usize = 20 * 1024 * 1024;

// ── State ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    /// `None` when no API key was configured.
    pub model: Option<Arc<dyn GenerativeModel>>,
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Not allowed by CORS")]
    ForbiddenOrigin,
    #[error("Gemini API key is not configured on the backend.")]
    MissingApiKey,
    #[error("Invalid content format received from frontend")]
    InvalidInput(String),
    #[error("Internal error while processing the image.")]
    Upstream(#[from] UpstreamError),
    #[error("No text or data extracted by the Gemini API.")]
    NoData(#[from] ExtractionError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, details) = match &self {
            ApiError::ForbiddenOrigin => (StatusCode::FORBIDDEN, None),
            ApiError::MissingApiKey => (StatusCode::INTERNAL_SERVER_ERROR, None),
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, Some(msg.clone())),
            ApiError::Upstream(e) => (StatusCode::BAD_GATEWAY, Some(e.to_string())),
            ApiError::NoData(_) => (StatusCode::BAD_REQUEST, None),
        };
        let body = ErrorBody {
            error: self.to_string(),
            details,
        };
        (status, Json(body)).into_response()
    }
}

// ── Router ───────────────────────────────────────────────────────────────────

pub fn router(state: AppState, cors: CorsConfig, index_html: PathBuf) -> Router {
    let cors = Arc::new(cors);

    Router::new()
        .route_service("/", ServeFile::new(index_html))
        .route("/health", get(health))
        .route("/api/extrair-dados", post(extract_endpoint))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(middleware::from_fn_with_state(cors.clone(), reject_foreign_origin))
        .layer(cors_layer(cors))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(cors: Arc<CorsConfig>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _parts: &Parts| {
                origin.to_str().map(|o| cors.allows(o)).unwrap_or(false)
            },
        ))
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::PUT,
            Method::PATCH,
            Method::POST,
            Method::DELETE,
        ])
        .allow_credentials(true)
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
}

/// Requests without an `Origin` pass; a foreign origin is refused outright
/// instead of only losing the CORS headers.
async fn reject_foreign_origin(
    State(cors): State<Arc<CorsConfig>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(origin) = request.headers().get(ORIGIN) {
        let allowed = origin.to_str().map(|o| cors.allows(o)).unwrap_or(false);
        if !allowed {
            tracing::warn!(origin = ?origin, "request from disallowed origin");
            return ApiError::ForbiddenOrigin.into_response();
        }
    }
    next.run(request).await
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn extract_endpoint(
    State(state): State<AppState>,
    payload: Result<Json<ExtractRequest>, JsonRejection>,
) -> Result<Json<ExtractResponse>, ApiError> {
    let result = match payload {
        Ok(Json(req)) => run_extraction(&state, req).await,
        Err(rejection) => Err(ApiError::InvalidInput(rejection.body_text())),
    };
    if let Err(e) = &result {
        match e {
            ApiError::Upstream(inner) => tracing::error!(error = %inner, "Gemini call failed"),
            other => tracing::warn!(error = %other, "extraction request rejected"),
        }
    }
    result.map(Json)
}

async fn run_extraction(state: &AppState, req: ExtractRequest) -> Result<ExtractResponse, ApiError> {
    let model = state.model.as_ref().ok_or(ApiError::MissingApiKey)?;
    let (prompt, images) = split_request(req)?;

    tracing::info!(images = images.len(), "forwarding images to Gemini");
    let text = model.generate(&prompt, &images).await?;
    let records = extract::extract(&text)?;

    Ok(ExtractResponse { records })
}

// ── Request validation ───────────────────────────────────────────────────────

/// Prompt from the first part of the first content, one image from the second
/// part of every content.
fn split_request(req: ExtractRequest) -> Result<(String, Vec<InlineImage>), ApiError> {
    if req.contents.is_empty() {
        return Err(ApiError::InvalidInput("contents must not be empty".to_string()));
    }

    let mut prompt = None;
    let mut images = Vec::with_capacity(req.contents.len());

    for (i, content) in req.contents.into_iter().enumerate() {
        let mut parts = content.parts.into_iter();
        let first = parts.next();
        let image = parts.next().and_then(|p| p.inline_data).ok_or_else(|| {
            ApiError::InvalidInput(format!("contents[{}].parts[1].inlineData is missing", i))
        })?;

        if i == 0 {
            prompt = first.and_then(|p| p.text);
        }
        images.push(image);
    }

    let prompt = prompt.ok_or_else(|| {
        ApiError::InvalidInput("contents[0].parts[0].text is missing".to_string())
    })?;

    Ok((prompt, images))
}
