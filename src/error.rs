use std::collections::BTreeMap;
use std::fmt::Display;

use axum::{
    body::Body,
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;

pub type AppResult<T> = Result<T, AppError>;

/// Application error surfaced to callers as a structured JSON envelope.
///
/// `category` is the short machine-readable class (`validation`,
/// `access_denied`, ...); only `storage` is considered transient.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    category: &'static str,
    message: String,
    fields: Option<BTreeMap<String, String>>,
}

impl AppError {
    pub fn new(status: StatusCode, category: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            category,
            message: message.into(),
            fields: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation", message)
    }

    pub fn validation_fields(
        message: impl Into<String>,
        fields: BTreeMap<String, String>,
    ) -> Self {
        let mut err = Self::validation(message);
        err.fields = Some(fields);
        err
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", "unauthorized")
    }

    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "access_denied", message)
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", "resource not found")
    }

    pub fn invalid_context(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_context", message)
    }

    pub fn invalid_transition(from: &str, to: &str) -> Self {
        Self::new(
            StatusCode::CONFLICT,
            "invalid_transition",
            format!("illegal workflow transition from {from} to {to}"),
        )
    }

    pub fn storage<E: Display>(error: E) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "storage",
            format!("storage backend unavailable: {error}"),
        )
    }

    pub fn internal<E: Display>(error: E) -> Self {
        tracing::error!(error = %error, "internal error");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "internal server error",
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn category(&self) -> &'static str {
        self.category
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    timestamp: String,
    status: u16,
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<BTreeMap<String, String>>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorEnvelope {
            timestamp: Utc::now().to_rfc3339(),
            status: status.as_u16(),
            error: self.category,
            message: self.message,
            path: None,
            fields: self.fields,
        });
        (status, body).into_response()
    }
}

/// Injects the request path into JSON error envelopes produced downstream.
pub async fn attach_request_path(request: Request, next: Next) -> Response {
    let path = request.uri().path().to_owned();
    let response = next.run(request).await;

    if !(response.status().is_client_error() || response.status().is_server_error()) {
        return response;
    }

    let is_json = response
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("application/json"))
        .unwrap_or(false);
    if !is_json {
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return Response::from_parts(parts, Body::empty()),
    };

    let rewritten = match serde_json::from_slice::<serde_json::Value>(&bytes) {
        Ok(serde_json::Value::Object(mut map)) if map.contains_key("error") => {
            map.insert("path".to_string(), serde_json::Value::String(path));
            serde_json::to_vec(&serde_json::Value::Object(map)).unwrap_or_else(|_| bytes.to_vec())
        }
        _ => bytes.to_vec(),
    };

    let mut parts = parts;
    parts.headers.remove(axum::http::header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(rewritten))
}

impl From<diesel::result::Error> for AppError {
    fn from(value: diesel::result::Error) -> Self {
        match value {
            diesel::result::Error::NotFound => AppError::not_found(),
            _ => AppError::internal(value),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(value: jsonwebtoken::errors::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        AppError::internal(value)
    }
}
