use std::net::SocketAddr;

use anyhow::Context;
use axum::{
    http::{header, Method, StatusCode, Uri},
    middleware::map_response,
    response::{IntoResponse, Response},
    Router,
};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::HttpConfig;
use crate::errors::ApiError;
use crate::state::AppState;
use crate::{health, users};

pub fn build_app(state: AppState) -> Router {
    let request_timeout = state.config.http.request_timeout;

    Router::new()
        .merge(health::health_routes())
        .nest("/api/v1", users::router())
        .fallback(route_not_found)
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(map_response(json_error_bodies))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        let latency_ms = latency.as_millis() as u64;
                        if status.is_server_error() {
                            tracing::error!(%status, latency_ms, "response");
                        } else if status.is_client_error() {
                            tracing::warn!(%status, latency_ms, "response");
                        } else {
                            tracing::info!(%status, latency_ms, "response");
                        }
                    },
                ),
        )
}

async fn route_not_found(method: Method, uri: Uri) -> ApiError {
    ApiError::new(
        StatusCode::NOT_FOUND,
        "Not found",
        format!("no route for {method} {}", uri.path()),
    )
}

/// Gives bodyless error responses from the router and middleware
/// (405, 408, ...) the `{error, message}` JSON shape.
async fn json_error_bodies(response: Response) -> Response {
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error())
        || response.headers().contains_key(header::CONTENT_TYPE)
    {
        return response;
    }

    let error = match status {
        StatusCode::NOT_FOUND => "Not found",
        StatusCode::METHOD_NOT_ALLOWED => "Method not allowed",
        StatusCode::REQUEST_TIMEOUT => "Request timeout",
        s if s.is_server_error() => "Internal server error",
        _ => "Invalid request",
    };
    let message = match status {
        StatusCode::REQUEST_TIMEOUT => "request took too long to complete".to_string(),
        s => s.canonical_reason().unwrap_or("request failed").to_lowercase(),
    };

    let allow = response.headers().get(header::ALLOW).cloned();
    let mut json = ApiError::new(status, error, message).into_response();
    if let Some(allow) = allow {
        json.headers_mut().insert(header::ALLOW, allow);
    }
    json
}

pub async fn serve(app: Router, http: &HttpConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", http.host, http.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", http.host, http.port))?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}
