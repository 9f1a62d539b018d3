//! gRPC transport for the shortener service.

use crate::proto::shortener::v1::url_shortener_server::{UrlShortener, UrlShortenerServer};
use crate::proto::shortener::v1::{
    GetUrlRequest, GetUrlResponse, ShortenUrlBatchRequest, ShortenUrlBatchResponse,
    ShortenUrlRequest, ShortenUrlResponse, ShortenedUrlEntry,
};
use crate::shortener::ShortenerService;
use crate::telemetry::record_grpc_request;
use crate::{Error, Result};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic::{Code, Request, Response, Status};
use tracing::info;

pub struct UrlShortenerGrpc {
    service: Arc<ShortenerService>,
}

impl UrlShortenerGrpc {
    pub fn new(service: Arc<ShortenerService>) -> Self {
        Self { service }
    }
}

#[tonic::async_trait]
impl UrlShortener for UrlShortenerGrpc {
    async fn shorten_url(
        &self,
        request: Request<ShortenUrlRequest>,
    ) -> std::result::Result<Response<ShortenUrlResponse>, Status> {
        let start = Instant::now();
        let result = self.service.shorten(&request.into_inner().url).await;
        let response = result.map(|shortened| {
            Response::new(ShortenUrlResponse {
                code: shortened.code,
                original_url: shortened.original_url,
            })
        });
        finish("ShortenUrl", start, response)
    }

    async fn shorten_url_batch(
        &self,
        request: Request<ShortenUrlBatchRequest>,
    ) -> std::result::Result<Response<ShortenUrlBatchResponse>, Status> {
        let start = Instant::now();
        let urls = request
            .into_inner()
            .urls
            .into_iter()
            .map(|entry| entry.url)
            .collect();

        let entries = self.service.shorten_batch(urls).await;
        let urls = entries
            .into_iter()
            .map(|entry| ShortenedUrlEntry {
                code: entry.code.unwrap_or_default(),
                original_url: entry.original_url,
                error: entry.error.unwrap_or_default(),
            })
            .collect();

        finish(
            "ShortenUrlBatch",
            start,
            Ok(Response::new(ShortenUrlBatchResponse { urls })),
        )
    }

    async fn get_url(
        &self,
        request: Request<GetUrlRequest>,
    ) -> std::result::Result<Response<GetUrlResponse>, Status> {
        let start = Instant::now();
        let result = self.service.resolve(&request.into_inner().code).await;
        let response = result.map(|url| Response::new(GetUrlResponse { url }));
        finish("GetUrl", start, response)
    }
}

fn finish<T>(
    method: &str,
    start: Instant,
    result: Result<Response<T>>,
) -> std::result::Result<Response<T>, Status> {
    let result = result.map_err(Error::into_status);
    let code = match &result {
        Ok(_) => Code::Ok,
        Err(status) => status.code(),
    };
    record_grpc_request(method, code, start.elapsed().as_secs_f64());
    result
}

/// Serve the shortener RPC until shutdown fires.
pub async fn run_grpc_server(
    addr: SocketAddr,
    service: Arc<ShortenerService>,
    shutdown: CancellationToken,
) -> Result<()> {
    info!(%addr, "Serving shortener gRPC");
    Server::builder()
        .add_service(UrlShortenerServer::new(UrlShortenerGrpc::new(service)))
        .serve_with_shutdown(addr, shutdown.cancelled_owned())
        .await
        .map_err(|e| Error::Internal(format!("gRPC server error: {e}")))
}
