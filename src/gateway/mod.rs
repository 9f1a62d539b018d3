//! HTTP edge in front of the shortener RPC.
//!
//! Translates gRPC status codes to HTTP by a fixed table and never retries:
//! each HTTP request maps to exactly one RPC. Successful shortens answer 201
//! with the public short URL; resolves answer 302 with `Location`.

use crate::proto::shortener::v1::url_shortener_client::UrlShortenerClient;
use crate::proto::shortener::v1::{
    GetUrlRequest, ShortenUrlBatchRequest, ShortenUrlRequest, ShortenedUrlEntry,
};
use crate::telemetry::http_observability_middleware;
use crate::{Error, Result};

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tonic::transport::Channel;
use tonic::{Code, Status};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Client seam over the shortener RPC; the gateway's handlers do not see
/// tonic types beyond `Status`.
#[async_trait]
pub trait ShortenerClient: Send + Sync {
    async fn shorten(&self, url: String)
        -> std::result::Result<(String, String), Status>;
    async fn shorten_batch(
        &self,
        urls: Vec<String>,
    ) -> std::result::Result<Vec<ShortenedUrlEntry>, Status>;
    async fn get_url(&self, code: String) -> std::result::Result<String, Status>;
}

/// tonic-backed client. The channel multiplexes, so per-call clones are
/// cheap.
pub struct GrpcShortenerClient {
    client: UrlShortenerClient<Channel>,
}

impl GrpcShortenerClient {
    pub async fn connect(addr: &str) -> Result<Self> {
        let endpoint = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.to_string()
        } else {
            format!("http://{addr}")
        };
        let client = UrlShortenerClient::connect(endpoint)
            .await
            .map_err(|e| Error::Config(format!("failed to connect to shortener: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ShortenerClient for GrpcShortenerClient {
    async fn shorten(
        &self,
        url: String,
    ) -> std::result::Result<(String, String), Status> {
        let response = self
            .client
            .clone()
            .shorten_url(ShortenUrlRequest { url })
            .await?
            .into_inner();
        Ok((response.code, response.original_url))
    }

    async fn shorten_batch(
        &self,
        urls: Vec<String>,
    ) -> std::result::Result<Vec<ShortenedUrlEntry>, Status> {
        let request = ShortenUrlBatchRequest {
            urls: urls
                .into_iter()
                .map(|url| ShortenUrlRequest { url })
                .collect(),
        };
        Ok(self
            .client
            .clone()
            .shorten_url_batch(request)
            .await?
            .into_inner()
            .urls)
    }

    async fn get_url(&self, code: String) -> std::result::Result<String, Status> {
        Ok(self
            .client
            .clone()
            .get_url(GetUrlRequest { code })
            .await?
            .into_inner()
            .url)
    }
}

pub struct GatewayState {
    pub client: Arc<dyn ShortenerClient>,
    pub public_host: String,
}

#[derive(Debug, Deserialize)]
struct ShortenRequest {
    url: String,
}

#[derive(Debug, Serialize)]
struct ShortenResponse {
    short_url: String,
    original_url: String,
}

#[derive(Debug, Deserialize)]
struct ShortenBatchRequest {
    urls: Vec<ShortenRequest>,
}

#[derive(Debug, Serialize)]
struct ShortenBatchEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    short_url: Option<String>,
    original_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ShortenBatchResponse {
    urls: Vec<ShortenBatchEntry>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

/// Build the edge router. `cors_origin` of `None` allows any origin.
pub fn build_router(state: Arc<GatewayState>, cors_origin: Option<&str>) -> Result<Router> {
    let cors = match cors_origin {
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
        Some(origin) => {
            let origin = origin
                .parse::<HeaderValue>()
                .map_err(|e| Error::Config(format!("invalid CORS_ORIGIN: {e}")))?;
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    };

    Ok(Router::new()
        .route("/health", get(health))
        .route("/shorten", post(shorten))
        .route("/shorten/batch", post(shorten_batch))
        .route("/:code", get(redirect))
        .with_state(state)
        .layer(middleware::from_fn(http_observability_middleware))
        .layer(cors))
}

async fn health() -> &'static str {
    "OK"
}

async fn shorten(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<ShortenRequest>,
) -> Response {
    match state.client.shorten(request.url).await {
        Ok((code, original_url)) => {
            info!(%code, "Shortened via edge");
            (
                StatusCode::CREATED,
                Json(ShortenResponse {
                    short_url: format!("{}{}", state.public_host, code),
                    original_url,
                }),
            )
                .into_response()
        }
        Err(status) => error_response(status),
    }
}

async fn shorten_batch(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<ShortenBatchRequest>,
) -> Response {
    let urls: Vec<String> = request.urls.into_iter().map(|entry| entry.url).collect();
    let requested = urls.len();

    match state.client.shorten_batch(urls).await {
        Ok(entries) if entries.len() == requested => {
            let urls = entries
                .into_iter()
                .map(|entry| {
                    if entry.error.is_empty() {
                        ShortenBatchEntry {
                            short_url: Some(format!("{}{}", state.public_host, entry.code)),
                            original_url: entry.original_url,
                            error: None,
                        }
                    } else {
                        ShortenBatchEntry {
                            short_url: None,
                            original_url: entry.original_url,
                            error: Some(entry.error),
                        }
                    }
                })
                .collect();
            (StatusCode::CREATED, Json(ShortenBatchResponse { urls })).into_response()
        }
        Ok(entries) => {
            // The contract requires one response entry per request entry.
            tracing::error!(
                requested,
                returned = entries.len(),
                "Batch response length mismatch"
            );
            error_response(Status::internal("Internal Server Error"))
        }
        Err(status) => error_response(status),
    }
}

async fn redirect(
    State(state): State<Arc<GatewayState>>,
    Path(code): Path<String>,
) -> Response {
    match state.client.get_url(code).await {
        Ok(url) => (
            StatusCode::FOUND,
            [(header::LOCATION, url)],
        )
            .into_response(),
        Err(status) => error_response(status),
    }
}

/// Fixed gRPC-to-HTTP mapping; unknown codes collapse to 500.
fn error_response(status: Status) -> Response {
    let (http_status, message) = match status.code() {
        Code::InvalidArgument => (StatusCode::BAD_REQUEST, status.message().to_string()),
        Code::NotFound => (StatusCode::NOT_FOUND, status.message().to_string()),
        Code::Internal => (
            StatusCode::INTERNAL_SERVER_ERROR,
            status.message().to_string(),
        ),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal Server Error".to_string(),
        ),
    };
    (http_status, Json(ErrorBody { message })).into_response()
}
