//! HTTP transport over axum: every request goes to the dispatcher.

use crate::web::{App, Body, Request};
use axum::body::Body as AxumBody;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response as AxumResponse};
use tower_http::limit::RequestBodyLimitLayer;

/// Axum router that hands every request to `app`. Bodies over `max_body_bytes` get 413.
pub fn into_router(app: App, max_body_bytes: usize) -> axum::Router {
    axum::Router::new()
        .fallback(move |req: axum::extract::Request| {
            let app = app.clone();
            async move { serve(app, req).await }
        })
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
}

async fn serve(app: App, req: axum::extract::Request) -> AxumResponse {
    let (parts, body) = req.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, path = %parts.uri.path(), "request body rejected");
            return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
        }
    };
    let request = Request::new(parts.method, &parts.uri, parts.headers, bytes);
    let response = app.handle(request).await;

    let body = match response.body {
        Body::Empty => AxumBody::empty(),
        Body::Full(bytes) => AxumBody::from(bytes),
        Body::Stream(stream) => AxumBody::from_stream(stream),
    };
    let mut out = AxumResponse::new(body);
    *out.status_mut() = response.head.status();
    *out.headers_mut() = response.head.headers().clone();
    out
}
