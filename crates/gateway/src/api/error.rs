//! Mapping from domain errors to HTTP responses.
//!
//! Every error body carries `"success": false`.  Caller mistakes keep their
//! message; downstream failures get a generic one plus `"retryable": true`
//! so provider details never reach the browser.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use hd_domain::error::Error;

const UNAVAILABLE: &str = "The service is temporarily unavailable. Please try again.";

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    retryable: bool,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// A downstream failure shown to the customer as `message`.
    pub fn downstream(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        match e {
            Error::Validation(msg) => Self::bad_request(msg),
            Error::SessionNotFound(id) => {
                Self::new(StatusCode::NOT_FOUND, format!("session not found: {id}"))
            }
            Error::InvalidState(msg) => Self::new(StatusCode::CONFLICT, msg),
            Error::Auth(_) => Self::new(StatusCode::UNAUTHORIZED, "unauthorized"),
            e if e.is_downstream() => {
                tracing::warn!(error = %e, "downstream failure");
                Self::downstream(UNAVAILABLE)
            }
            e => {
                tracing::error!(error = %e, "internal error");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = serde_json::json!({
            "success": false,
            "error": self.message,
        });
        if self.retryable {
            body["retryable"] = true.into();
        }
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_errors_map_to_4xx() {
        let cases = [
            (Error::Validation("empty".into()), StatusCode::BAD_REQUEST),
            (Error::SessionNotFound("s1".into()), StatusCode::NOT_FOUND),
            (Error::InvalidState("ended".into()), StatusCode::CONFLICT),
            (Error::Auth("stale".into()), StatusCode::UNAUTHORIZED),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn downstream_errors_hide_details_and_are_retryable() {
        let err = ApiError::from(Error::Provider {
            provider: "slack".into(),
            message: "invalid_auth xoxb-secret".into(),
        });
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert!(err.retryable);
        assert!(!err.message.contains("xoxb"));
    }
}
