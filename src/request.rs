//! Per-request context and body parsing.

use std::sync::Arc;

use axum::http::header::{CONTENT_TYPE, USER_AGENT};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Method, Uri};
use serde_json::{Map, Value, json};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::middleware::ip::extract_client_ip;
use crate::middleware::request_id::RequestId;
use crate::models::User;

/// Longest text body echoed into log metadata.
const MAX_LOGGED_TEXT: usize = 1024;

/// Read-only view of an inbound request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub client_ip: String,
    pub user_agent: Option<String>,
    pub env: Arc<Config>,
}

impl RequestContext {
    /// Build a context from request parts. The request id comes from the
    /// [`RequestId`] extension.
    pub fn from_parts(parts: &Parts, env: Arc<Config>) -> Self {
        Self {
            request_id: RequestId::from_extensions(&parts.extensions).0,
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            headers: parts.headers.clone(),
            client_ip: extract_client_ip(&parts.headers, &parts.extensions).into_owned(),
            user_agent: user_agent(&parts.headers),
            env,
        }
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Path plus query, as received.
    pub fn url(&self) -> String {
        self.uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| self.uri.path().to_string())
    }

    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// First value of a query parameter, percent-decoded. Empty values count as absent.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.uri.query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE.as_str())
    }
}

/// `User-Agent` header, if present and readable.
pub fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Rate-limit partition key: `user:<id>` for a known caller, else `ip:<addr>`.
pub fn rate_limit_key(ctx: &RequestContext, user: Option<&User>) -> String {
    match user {
        Some(user) => format!("user:{}", user.id),
        None => format!("ip:{}", ctx.client_ip),
    }
}

/// Request body decoded by content type.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedBody {
    Empty,
    Json(Value),
    Form(Map<String, Value>),
    Text(String),
    /// Opaque payload; only its length is kept
    Binary(usize),
}

impl ParsedBody {
    pub fn kind(&self) -> &'static str {
        match self {
            ParsedBody::Empty => "empty",
            ParsedBody::Json(_) => "json",
            ParsedBody::Form(_) => "form",
            ParsedBody::Text(_) => "text",
            ParsedBody::Binary(_) => "binary",
        }
    }

    /// Summary attached to the "Request started" log entry.
    pub fn to_log_value(&self) -> Value {
        match self {
            ParsedBody::Empty => json!({"kind": "empty"}),
            ParsedBody::Json(value) => json!({"kind": "json", "body": value}),
            ParsedBody::Form(fields) => json!({"kind": "form", "body": fields}),
            ParsedBody::Text(text) => {
                let truncated: String = text.chars().take(MAX_LOGGED_TEXT).collect();
                json!({"kind": "text", "body": truncated, "length": text.len()})
            }
            ParsedBody::Binary(length) => json!({"kind": "binary", "length": length}),
        }
    }
}

/// Parse a body by its media type.
///
/// - `application/json` and `*+json`: JSON, malformed input is `INVALID_BODY`
/// - `application/x-www-form-urlencoded`: flat string map
/// - `text/*`: UTF-8 text, invalid UTF-8 is `INVALID_BODY`
/// - anything else: binary
pub fn parse_body(content_type: Option<&str>, bytes: &[u8]) -> AppResult<ParsedBody> {
    if bytes.is_empty() {
        return Ok(ParsedBody::Empty);
    }

    let media_type = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase())
        .unwrap_or_default();

    if media_type == "application/json" || media_type.ends_with("+json") {
        return Ok(ParsedBody::Json(serde_json::from_slice(bytes)?));
    }

    if media_type == "application/x-www-form-urlencoded" {
        let fields = url::form_urlencoded::parse(bytes)
            .map(|(key, value)| (key.into_owned(), Value::String(value.into_owned())))
            .collect();
        return Ok(ParsedBody::Form(fields));
    }

    if media_type.starts_with("text/") {
        return String::from_utf8(bytes.to_vec())
            .map(ParsedBody::Text)
            .map_err(|_| AppError::InvalidBody("Request body is not valid UTF-8".to_string()));
    }

    Ok(ParsedBody::Binary(bytes.len()))
}
