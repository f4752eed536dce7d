//! HTTP server for MCP over HTTP/SSE transport.
//!
//! `POST /` carries one JSON-RPC message, `GET /` opens the session's push
//! stream and `DELETE /` ends the session. The session token travels in the
//! `mcp-session-id` header and is echoed on every response.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use std::convert::Infallible;
use std::net::IpAddr;
use tokio_stream::StreamExt;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Result, TransportError};
use crate::mcp::protocol::PROTOCOL_VERSION;
use crate::mcp::server::{McpServer, Outcome};

pub const SESSION_HEADER: &str = "mcp-session-id";
pub const PROTOCOL_HEADER: &str = "mcp-protocol-version";

const JSON_MEDIA: &str = "application/json";
const SSE_MEDIA: &str = "text/event-stream";

/// HTTP server state.
#[derive(Clone)]
pub struct HttpState {
    server: McpServer,
    metrics_enabled: bool,
}

/// Build the MCP router for `server`.
pub fn router(server: McpServer, config: &Config) -> Router {
    let state = HttpState {
        server,
        metrics_enabled: config.metrics,
    };

    let app = Router::new()
        .route("/", post(handle_post).get(handle_get).delete(handle_delete))
        .route("/metrics", get(metrics))
        .fallback(not_found)
        .method_not_allowed_fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if config.cors {
        app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                .allow_headers(Any)
                .expose_headers([HeaderName::from_static(SESSION_HEADER)]),
        )
    } else {
        app
    }
}

/// Start the HTTP server.
pub async fn start_server(server: McpServer, config: &Config) -> Result<()> {
    let app = router(server, config);

    let addr = config.bind_address();
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn handle_post(State(state): State<HttpState>, headers: HeaderMap, body: Bytes) -> Response {
    if let Err(reason) = check_post_headers(&headers) {
        return bad_request(reason, header_str(&headers, SESSION_HEADER));
    }

    let session_id = header_str(&headers, SESSION_HEADER)
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let response = match state.server.handle_message(Some(&session_id), &body).await {
        Outcome::Reply(reply) => (StatusCode::OK, Json(reply)).into_response(),
        Outcome::Accepted => StatusCode::ACCEPTED.into_response(),
        Outcome::Rejected(reason) => return bad_request(reason, Some(&session_id)),
    };
    with_session(response, &session_id)
}

async fn handle_get(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    let session_id = header_str(&headers, SESSION_HEADER);
    if let Err(reason) = check_origin(&headers).and_then(|()| check_sse_accept(&headers)) {
        return bad_request(reason, session_id);
    }
    let Some(session_id) = session_id else {
        return bad_request(TransportError::MissingSession, None);
    };
    let Some(stream) = state.server.subscribe(session_id) else {
        return bad_request(TransportError::UnknownSession, Some(session_id));
    };

    debug!(session = session_id, subscriber = stream.id(), "SSE stream opened");
    let events = stream.map(|payload| Ok::<_, Infallible>(Event::default().data(payload)));
    let response = Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response();
    with_session(response, session_id)
}

async fn handle_delete(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    let Some(session_id) = header_str(&headers, SESSION_HEADER) else {
        return bad_request(TransportError::MissingSession, None);
    };
    if !state.server.remove_session(session_id) {
        return bad_request(TransportError::UnknownSession, Some(session_id));
    }
    with_session(StatusCode::NO_CONTENT.into_response(), session_id)
}

async fn metrics(State(state): State<HttpState>) -> Response {
    if !state.metrics_enabled {
        return not_found().await;
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.server.metrics().to_prometheus(),
    )
        .into_response()
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not found").into_response()
}

fn bad_request(reason: TransportError, session_id: Option<&str>) -> Response {
    warn!(%reason, "Rejecting HTTP request");
    let response = (StatusCode::BAD_REQUEST, reason.to_string()).into_response();
    match session_id {
        Some(id) => with_session(response, id),
        None => response,
    }
}

fn with_session(mut response: Response, session_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(SESSION_HEADER), value);
    }
    response
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn check_post_headers(headers: &HeaderMap) -> std::result::Result<(), TransportError> {
    check_origin(headers)?;

    let media = accepted_media(headers)?;
    if !(media.iter().any(|m| m == JSON_MEDIA) && media.iter().any(|m| m == SSE_MEDIA)) {
        return Err(TransportError::InvalidAccept);
    }

    match header_str(headers, PROTOCOL_HEADER) {
        Some(version) if version != PROTOCOL_VERSION => {
            Err(TransportError::UnsupportedProtocolVersion)
        }
        _ => Ok(()),
    }
}

fn check_sse_accept(headers: &HeaderMap) -> std::result::Result<(), TransportError> {
    if accepted_media(headers)?.iter().any(|m| m == SSE_MEDIA) {
        Ok(())
    } else {
        Err(TransportError::InvalidAccept)
    }
}

/// Media types named by `Accept`, lowercased and stripped of parameters.
fn accepted_media(headers: &HeaderMap) -> std::result::Result<Vec<String>, TransportError> {
    let accept = header_str(headers, header::ACCEPT.as_str()).ok_or(TransportError::MissingAccept)?;
    Ok(accept
        .split(',')
        .filter_map(|part| part.split(';').next())
        .map(|media| media.trim().to_ascii_lowercase())
        .filter(|media| !media.is_empty())
        .collect())
}

fn check_origin(headers: &HeaderMap) -> std::result::Result<(), TransportError> {
    match headers.get(header::ORIGIN) {
        None => Ok(()),
        Some(value) => match value.to_str() {
            Ok(origin) if is_loopback_origin(origin) => Ok(()),
            _ => Err(TransportError::OriginNotAllowed),
        },
    }
}

fn is_loopback_origin(origin: &str) -> bool {
    let Some((_, rest)) = origin.split_once("://") else {
        return false;
    };
    let authority = rest.split('/').next().unwrap_or_default();
    let host = match authority.strip_prefix('[') {
        Some(bracketed) => bracketed.split(']').next().unwrap_or_default(),
        None => authority.split(':').next().unwrap_or_default(),
    };

    host.eq_ignore_ascii_case("localhost")
        || host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_loopback_origins() {
        assert!(is_loopback_origin("http://localhost:3000"));
        assert!(is_loopback_origin("http://127.0.0.1"));
        assert!(is_loopback_origin("https://[::1]:8249/path"));
        assert!(is_loopback_origin("http://LOCALHOST"));

        assert!(!is_loopback_origin("http://example.com"));
        assert!(!is_loopback_origin("http://localhost.example.com"));
        assert!(!is_loopback_origin("null"));
    }

    #[test]
    fn test_post_accept_requires_both_media_types() {
        let ok = headers(&[("accept", "application/json, text/event-stream;q=0.9")]);
        assert_eq!(check_post_headers(&ok), Ok(()));

        let json_only = headers(&[("accept", "application/json")]);
        assert_eq!(
            check_post_headers(&json_only),
            Err(TransportError::InvalidAccept)
        );

        assert_eq!(
            check_post_headers(&HeaderMap::new()),
            Err(TransportError::MissingAccept)
        );
    }

    #[test]
    fn test_post_checks_origin_and_version() {
        let foreign = headers(&[
            ("accept", "application/json, text/event-stream"),
            ("origin", "https://evil.example"),
        ]);
        assert_eq!(
            check_post_headers(&foreign),
            Err(TransportError::OriginNotAllowed)
        );

        let old = headers(&[
            ("accept", "application/json, text/event-stream"),
            ("mcp-protocol-version", "2024-11-05"),
        ]);
        assert_eq!(
            check_post_headers(&old),
            Err(TransportError::UnsupportedProtocolVersion)
        );
    }

    #[test]
    fn test_sse_accept() {
        assert!(check_sse_accept(&headers(&[("accept", "text/event-stream")])).is_ok());
        assert_eq!(
            check_sse_accept(&headers(&[("accept", "application/json")])),
            Err(TransportError::InvalidAccept)
        );
    }
}
