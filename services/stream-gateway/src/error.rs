use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use types::category::Category;
use types::ids::ConnectionId;

/// Scope of a connection-count limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitScope {
    Ip,
    Account,
}

impl std::fmt::Display for LimitScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitScope::Ip => f.write_str("ip"),
            LimitScope::Account => f.write_str("account"),
        }
    }
}

/// Client-facing errors of the subscription hub.
///
/// Every variant is reported to the client as a normal reply with
/// `category: "error"`; none of them closes the connection by itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("invalid op: {0}")]
    InvalidOp(String),

    #[error("invalid pair: {0}")]
    InvalidPair(String),

    #[error("invalid category: {0}")]
    InvalidCategory(String),

    #[error("invalid api key")]
    InvalidApiKey,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("subscription limit of {limit} exceeded")]
    SubscriptionLimitExceeded { limit: usize },

    #[error("{scope} connection limit of {limit} exceeded")]
    ConnectionLimitExceeded { scope: LimitScope, limit: usize },

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("connection {0} is closed")]
    UnknownConnection(ConnectionId),
}

impl HubError {
    /// Numeric status carried in the reply envelope.
    pub fn code(&self) -> u16 {
        match self {
            HubError::MalformedMessage(_)
            | HubError::InvalidOp(_)
            | HubError::InvalidPair(_)
            | HubError::InvalidCategory(_) => 400,
            HubError::InvalidApiKey => 401,
            HubError::SubscriptionLimitExceeded { .. } => 403,
            HubError::UnknownConnection(_) => 410,
            HubError::RateLimited | HubError::ConnectionLimitExceeded { .. } => 429,
            HubError::ServiceUnavailable(_) => 503,
        }
    }
}

/// Failures talking to the account oracle. Never shown to clients verbatim.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("account service unreachable: {0}")]
    Unreachable(String),

    #[error("account service returned status {0}")]
    UnexpectedStatus(u16),

    #[error("invalid response from account service: {0}")]
    InvalidResponse(String),
}

/// Domain events whose addressing does not match their category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("private category {0} requires account_id")]
    MissingAccount(Category),

    #[error("public category {0} must not carry account_id")]
    UnexpectedAccount(Category),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// HTTP-facing error type for the gateway's REST surface
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl From<HubError> for AppError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::ConnectionLimitExceeded { .. } | HubError::RateLimited => {
                AppError::RateLimitExceeded(err.to_string())
            }
            HubError::ServiceUnavailable(msg) => AppError::ServiceUnavailable(msg),
            other => AppError::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, code) = match self {
            AppError::RateLimitExceeded(msg) => {
                (StatusCode::TOO_MANY_REQUESTS, msg, "RATE_LIMIT_EXCEEDED")
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, "BAD_REQUEST"),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg, "UNAUTHORIZED"),
            AppError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, msg, "SERVICE_UNAVAILABLE")
            }
            AppError::InternalError(err) => {
                tracing::error!(error = %err, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    "INTERNAL_ERROR",
                )
            }
        };

        let body = Json(json!({
            "error": code,
            "message": error_message
        }));

        (status, body).into_response()
    }
}
