//! Injects the live-reload client into served HTML pages.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::CLIENT_PATH;

fn script_tag() -> String {
    format!("<script src=\"{}\"></script>", CLIENT_PATH)
}

/// Insert the client script before `</body>`, or append it when the page has
/// no body tag.
pub fn inject_script(html: &str) -> String {
    let tag = script_tag();
    match html.to_ascii_lowercase().rfind("</body>") {
        Some(idx) => {
            let mut out = String::with_capacity(html.len() + tag.len());
            out.push_str(&html[..idx]);
            out.push_str(&tag);
            out.push_str(&html[idx..]);
            out
        }
        None => format!("{}{}", html, tag),
    }
}

fn is_html(response: &Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/html"))
}

pub async fn inject_reload_script(request: Request<Body>, next: Next) -> Response {
    let response = next.run(request).await;
    if response.status() != StatusCode::OK || !is_html(&response) {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("Failed to read HTML body: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    // Pages in other encodings are served as they are.
    let html = match String::from_utf8(bytes.to_vec()) {
        Ok(html) => inject_script(&html),
        Err(_) => {
            tracing::debug!("Not injecting the reload client into a non-UTF-8 page");
            return Response::from_parts(parts, Body::from(bytes));
        }
    };
    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(html))
}
