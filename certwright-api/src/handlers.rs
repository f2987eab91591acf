//! Request handlers

use bytes::Bytes;
use certwright_tls::ChallengeTokenStore;
use http::header::{CONTENT_TYPE, HeaderValue};
use http_body_util::Full;
use hyper::{Method, Response, StatusCode};

/// Route one request against the challenge store
pub fn route(method: &Method, path: &str, store: &ChallengeTokenStore) -> Response<Full<Bytes>> {
    if method == Method::GET || method == Method::HEAD {
        if let Some(token) = store.lookup(path) {
            tracing::debug!("🎯 Served challenge {}", path);
            return response(StatusCode::OK, "text/plain", token);
        }
    }

    match (method, path) {
        (&Method::GET, "/health") => {
            let body = serde_json::json!({
                "status": "healthy",
                "pending_challenges": store.len(),
            });
            response(StatusCode::OK, "application/json", body.to_string())
        }
        _ => response(StatusCode::NOT_FOUND, "text/plain", "Not Found".to_string()),
    }
}

fn response(status: StatusCode, content_type: &'static str, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}
