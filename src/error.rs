// Copyright 2022-2023 Debox Network
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

//! Failure taxonomy of the gateway and its translation into HTTP responses.

use http::header::{CONTENT_TYPE, WWW_AUTHENTICATE};
use http::StatusCode;
use hyper::{Body, Response};
use serde::Deserialize;
use thiserror::Error;

use crate::permission::PermissionLevel;

/// Realm announced to clients that must (re)authenticate.
pub const AUTH_REALM: &str = "Basic realm=\"WebDAV Server\"";

/// Failure reported by, or while talking to, one of the remote services.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The service answered with a non-success status.
    #[error("{status} {code}: {message}")]
    Response {
        status: StatusCode,
        code: String,
        message: String,
        user_message: String,
    },

    /// The request never produced a response.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// The response body could not be understood.
    #[error("malformed response: {0}")]
    Decode(String),
}

/// Error body returned by the File API and the token issuer.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub user_message: String,
}

impl ApiError {
    /// Shorthand for a status-only failure carrying a user facing message.
    pub fn status(status: StatusCode, user_message: &str) -> Self {
        ApiError::Response {
            status,
            code: status.as_str().to_string(),
            message: user_message.to_string(),
            user_message: user_message.to_string(),
        }
    }

    pub(crate) fn from_body(status: StatusCode, body: &[u8]) -> Self {
        match serde_json::from_slice::<ApiErrorBody>(body) {
            Ok(e) => ApiError::Response {
                status,
                code: e.code,
                message: e.message,
                user_message: e.user_message,
            },
            Err(_) => ApiError::Response {
                status,
                code: status.as_str().to_string(),
                message: String::from_utf8_lossy(body).into_owned(),
                user_message: status.canonical_reason().unwrap_or_default().to_string(),
            },
        }
    }

    /// Whether the failure happened below the application protocol and may be retried
    /// for idempotent lookups.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Transport(_) | ApiError::Timeout)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::Response { status, .. } if *status == StatusCode::NOT_FOUND)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout
        } else if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

/// Every way a WebDAV request can fail inside the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The request itself is unusable (bad path, missing or malformed `Destination`).
    #[error("bad request: {0}")]
    ClientInput(String),

    /// No valid credentials were presented.
    #[error("authentication required: {0}")]
    Unauthenticated(String),

    /// The caller's permission on the resource is below the operation's threshold.
    #[error("permission {actual:?} on {file_id} is below required {required:?}")]
    Permission {
        file_id: String,
        required: PermissionLevel,
        actual: PermissionLevel,
    },

    /// Source and destination parent live in different workspaces.
    #[error("workspace {source_workspace} cannot reach workspace {target_workspace}")]
    CrossBoundary {
        source_workspace: String,
        target_workspace: String,
    },

    #[error("file api: {0}")]
    Api(#[from] ApiError),

    /// A backend call exceeded its time budget.
    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("method {0} is not implemented")]
    NotImplemented(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl From<http::Error> for GatewayError {
    fn from(e: http::Error) -> Self {
        GatewayError::Internal(e.to_string())
    }
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::ClientInput(_) | GatewayError::CrossBoundary { .. } => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::Unauthenticated(_) | GatewayError::Permission { .. } => {
                StatusCode::UNAUTHORIZED
            }
            GatewayError::Api(ApiError::Response { status, .. }) => *status,
            GatewayError::Api(ApiError::Timeout) | GatewayError::Timeout(_) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            GatewayError::Api(_) | GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
        }
    }

    /// Message safe to show to the client. Only backend `userMessage`s are passed through.
    fn public_message(&self, status: StatusCode) -> String {
        match self {
            GatewayError::Api(ApiError::Response { user_message, .. })
                if !user_message.is_empty() =>
            {
                user_message.clone()
            }
            _ => status.canonical_reason().unwrap_or("Error").to_string(),
        }
    }

    /// Converts the error into a finished response. The caller is expected to have
    /// logged the error already.
    pub fn into_response(self) -> Response<Body> {
        let status = self.status_code();
        let mut response = Response::new(Body::from(self.public_message(status)));
        *response.status_mut() = status;
        let headers = response.headers_mut();
        headers.insert(
            CONTENT_TYPE,
            http::HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        if let GatewayError::Unauthenticated(_) = self {
            headers.insert(WWW_AUTHENTICATE, http::HeaderValue::from_static(AUTH_REALM));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_text(response: Response<Body>) -> String {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_taxonomy_status_codes() {
        let cases = vec![
            (GatewayError::ClientInput("x".into()), 400),
            (
                GatewayError::CrossBoundary {
                    source_workspace: "a".into(),
                    target_workspace: "b".into(),
                },
                400,
            ),
            (
                GatewayError::Permission {
                    file_id: "f".into(),
                    required: PermissionLevel::Owner,
                    actual: PermissionLevel::Editor,
                },
                401,
            ),
            (
                GatewayError::Api(ApiError::status(StatusCode::NOT_FOUND, "missing")),
                404,
            ),
            (GatewayError::Api(ApiError::Transport("reset".into())), 500),
            (GatewayError::Api(ApiError::Decode("junk".into())), 500),
            (GatewayError::Timeout("getByPath"), 504),
            (GatewayError::Internal("boom".into()), 500),
            (GatewayError::NotImplemented("PROPFIND".into()), 501),
        ];
        for (err, status) in cases {
            assert_eq!(err.status_code().as_u16(), status, "{}", err);
        }
    }

    #[tokio::test]
    async fn test_internal_detail_is_not_exposed() {
        let response = GatewayError::Internal("secret stack detail".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "Internal Server Error");
    }

    #[tokio::test]
    async fn test_user_message_is_passed_through() {
        let body = br#"{"code":"file_not_found","status":404,"message":"no row","userMessage":"File not found.","moreInfo":""}"#;
        let err = GatewayError::from(ApiError::from_body(StatusCode::NOT_FOUND, body));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(response).await, "File not found.");
    }

    #[test]
    fn test_unparseable_error_body() {
        let err = ApiError::from_body(StatusCode::BAD_GATEWAY, b"<html>oops</html>");
        match err {
            ApiError::Response { status, message, user_message, .. } => {
                assert_eq!(status, StatusCode::BAD_GATEWAY);
                assert_eq!(message, "<html>oops</html>");
                assert_eq!(user_message, "Bad Gateway");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unauthenticated_challenges_client() {
        let response = GatewayError::Unauthenticated("no credentials".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[WWW_AUTHENTICATE], AUTH_REALM);
    }

    #[test]
    fn test_transient_classification() {
        assert!(ApiError::Timeout.is_transient());
        assert!(ApiError::Transport("reset".into()).is_transient());
        assert!(!ApiError::status(StatusCode::NOT_FOUND, "x").is_transient());
        assert!(ApiError::status(StatusCode::NOT_FOUND, "x").is_not_found());
    }
}
