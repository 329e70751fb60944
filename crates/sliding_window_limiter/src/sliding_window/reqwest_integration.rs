// src/sliding_window/reqwest_integration.rs
use crate::sliding_window::http::HttpError as GenericHttpError;
use bytes::Bytes;
use futures::future::BoxFuture;

use http::{Request as HttpRequest, Response as HttpResponse, StatusCode};
use reqwest;
use std::task::{Context, Poll};
use tower::Service;

/// A `tower::Service` wrapper for `reqwest::Client`.
/// Accepts `http::Request<Bytes>` and answers with the fully read `http::Response<Bytes>`.
///
/// Any status code is a successful response at this level; only failures to obtain a
/// response are errors.
#[derive(Clone, Debug)]
pub struct ReqwestService {
    client: reqwest::Client,
}

impl ReqwestService {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn new_with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestService {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<HttpRequest<Bytes>> for ReqwestService {
    type Response = HttpResponse<Bytes>;
    type Error = GenericHttpError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, http_request: HttpRequest<Bytes>) -> Self::Future {
        let (parts, body) = http_request.into_parts();

        let url_str = parts.uri.to_string();
        let url = match reqwest::Url::parse(&url_str) {
            Ok(u) => u,
            Err(parse_err) => {
                let ge = GenericHttpError::InvalidRequest {
                    details: format!("Invalid URL '{}': {}", url_str, parse_err),
                };
                return Box::pin(async move { Err(ge) });
            }
        };

        let request_future = self
            .client
            .request(parts.method, url)
            .headers(parts.headers)
            .body(body)
            .send();

        Box::pin(async move {
            let response = match request_future.await {
                Ok(response) => response,
                Err(e) => {
                    return Err(if e.is_timeout() {
                        warn!(error = %e, "Request timed out");
                        GenericHttpError::Timeout
                    } else if e.is_connect() || e.is_request() {
                        error!(error = %e, "Connection error");
                        GenericHttpError::Transport {
                            source: Box::new(e),
                        }
                    } else {
                        error!(error = %e, "Other reqwest error");
                        GenericHttpError::ClientError {
                            source: Box::new(e),
                        }
                    });
                }
            };

            let status = response.status();
            let version = response.version();
            let headers = response.headers().clone();
            let body = response.bytes().await.map_err(|e| {
                if e.is_timeout() {
                    warn!(error = %e, "Timed out reading response body");
                    GenericHttpError::Timeout
                } else {
                    GenericHttpError::ClientError {
                        source: Box::new(e),
                    }
                }
            })?;

            // Log with a level matching the status class
            if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                warn!(
                    status = %status,
                    error_body = %String::from_utf8_lossy(&body),
                    "Server error or rate limited"
                );
            } else if status.is_client_error() {
                error!(
                    status = %status,
                    error_body = %String::from_utf8_lossy(&body),
                    "Client error"
                );
            } else {
                trace!(status = %status, body_len = body.len(), "Response received");
            }

            let mut http_response = HttpResponse::new(body);
            *http_response.status_mut() = status;
            *http_response.version_mut() = version;
            *http_response.headers_mut() = headers;
            Ok(http_response)
        })
    }
}
