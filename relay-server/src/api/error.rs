use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use gym_bridge_protocol::BridgeError;

const ERROR_TYPE_BASE: &str = "https://gym-bridge.example.com/errors";

/// Problem Details per RFC 9457
/// https://www.rfc-editor.org/rfc/rfc9457.html
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemDetails {
    /// URI reference identifying the problem type
    #[serde(rename = "type")]
    pub type_uri: String,

    /// Short human-readable summary of the problem type
    pub title: String,

    /// HTTP status code of this occurrence
    pub status: u16,

    /// Explanation specific to this occurrence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// URI reference identifying this occurrence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

impl ProblemDetails {
    pub fn new(type_uri: impl Into<String>, title: impl Into<String>, status: StatusCode) -> Self {
        Self {
            type_uri: type_uri.into(),
            title: title.into(),
            status: status.as_u16(),
            detail: None,
            instance: None,
        }
    }

    fn of_kind(kind: &str, status: StatusCode) -> Self {
        Self::new(
            format!("{}/{}", ERROR_TYPE_BASE, kind),
            status.canonical_reason().unwrap_or("Error"),
            status,
        )
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// 404 Not Found
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::of_kind("not-found", StatusCode::NOT_FOUND)
            .with_detail(format!("{} not found", resource.into()))
    }

    /// 409 Conflict
    pub fn conflict(detail: impl Into<String>) -> Self {
        Self::of_kind("conflict", StatusCode::CONFLICT).with_detail(detail)
    }

    /// 400 Bad Request
    pub fn validation_error(detail: impl Into<String>) -> Self {
        Self::of_kind("validation", StatusCode::BAD_REQUEST).with_detail(detail)
    }

    /// 401 Unauthorized
    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::of_kind("unauthorized", StatusCode::UNAUTHORIZED).with_detail(detail)
    }

    /// 502 Bad Gateway: the agent or the device reported a failure
    pub fn bad_gateway(detail: impl Into<String>) -> Self {
        Self::of_kind("device", StatusCode::BAD_GATEWAY).with_detail(detail)
    }

    /// 503 Service Unavailable: the agent is not connected
    pub fn service_unavailable(detail: impl Into<String>) -> Self {
        Self::of_kind("agent-offline", StatusCode::SERVICE_UNAVAILABLE).with_detail(detail)
    }

    /// 504 Gateway Timeout
    pub fn gateway_timeout(detail: impl Into<String>) -> Self {
        Self::of_kind("timeout", StatusCode::GATEWAY_TIMEOUT).with_detail(detail)
    }

    /// 500 Internal Server Error
    pub fn internal_error(detail: impl Into<String>) -> Self {
        Self::of_kind("internal", StatusCode::INTERNAL_SERVER_ERROR).with_detail(detail)
    }
}

impl From<BridgeError> for ProblemDetails {
    fn from(err: BridgeError) -> Self {
        let detail = err.to_string();
        match err {
            BridgeError::AgentNotConnected(_) | BridgeError::AgentDisconnected(_) => {
                Self::service_unavailable(detail)
            }
            BridgeError::CommandInFlight { .. } => Self::conflict(detail),
            BridgeError::UnknownNotification { .. } => Self::not_found(detail),
            BridgeError::Timeout { .. } => Self::gateway_timeout(detail),
            BridgeError::Agent(_) | BridgeError::Cancelled { .. } => Self::bad_gateway(detail),
            BridgeError::Serialization(_) | BridgeError::ChannelClosed => {
                Self::internal_error(detail)
            }
        }
    }
}

impl From<anyhow::Error> for ProblemDetails {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:#}", err);
        Self::internal_error(err.to_string())
    }
}

impl IntoResponse for ProblemDetails {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut response = (status, Json(self)).into_response();

        // Content-Type mandated by RFC 9457
        response.headers_mut().insert(
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("application/problem+json"),
        );

        response
    }
}

pub type ApiResult<T> = Result<T, ProblemDetails>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found() {
        let problem = ProblemDetails::not_found("Device 9");
        assert_eq!(problem.status, 404);
        assert_eq!(problem.title, "Not Found");
        assert_eq!(problem.detail.as_deref(), Some("Device 9 not found"));
    }

    #[test]
    fn test_bridge_error_mapping() {
        let cases = [
            (BridgeError::AgentNotConnected("a".into()), 503),
            (BridgeError::AgentDisconnected("a".into()), 503),
            (
                BridgeError::CommandInFlight {
                    device_ip: "ip".into(),
                    command: "loadUsers".into(),
                },
                409,
            ),
            (
                BridgeError::Timeout {
                    device_ip: "ip".into(),
                    command: "loadUsers".into(),
                    timeout_ms: 10,
                },
                504,
            ),
            (BridgeError::Agent("Falha no login".into()), 502),
            (BridgeError::ChannelClosed, 500),
        ];

        for (err, status) in cases {
            assert_eq!(ProblemDetails::from(err).status, status);
        }
    }

    #[test]
    fn test_into_response_sets_problem_content_type() {
        let response = ProblemDetails::unauthorized("Missing token").into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(axum::http::header::CONTENT_TYPE).unwrap(),
            "application/problem+json"
        );
    }
}
