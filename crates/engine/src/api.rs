//! HTTP client for the chat service
//!
//! Typed wrapper over the REST endpoints. Chat sends distinguish an expired
//! session from transient failure so the engine can restart the lifecycle
//! instead of retrying; feedback and error reports are best-effort.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use yuume_protocol::{
    ChatRequest, ChatResponse, CustomerProfile, ErrorReport, FeedbackRequest, SessionSnapshot,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The server marks a dead session with this error code in the body when
/// the status alone is ambiguous (proxies sometimes rewrite 410s).
const SESSION_EXPIRED_SENTINEL: &str = "session_expired";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("session expired server-side")]
    SessionExpired,
    #[error("unexpected status {code}")]
    Status { code: StatusCode },
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

impl ApiError {
    /// Collapse to what the transition machine distinguishes
    pub fn kind(&self) -> ChatFailKind {
        match self {
            ApiError::SessionExpired => ChatFailKind::SessionExpired,
            ApiError::Status { .. } | ApiError::Transport(_) => ChatFailKind::Transient,
        }
    }
}

/// Why a chat send failed, as far as session logic cares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatFailKind {
    SessionExpired,
    Transient,
}

/// Error body shape used across the service endpoints
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

fn body_signals_expiry(body: &str) -> bool {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if parsed.error.as_deref() == Some(SESSION_EXPIRED_SENTINEL) {
            return true;
        }
    }
    body.contains(SESSION_EXPIRED_SENTINEL)
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
}

impl ApiClient {
    pub fn new(api_base: &str) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(ApiClient {
            http,
            base: api_base.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Send a chat message. HTTP 410, or an error body carrying the expiry
    /// sentinel, maps to [`ApiError::SessionExpired`].
    pub async fn post_chat(&self, request: &ChatRequest) -> Result<ChatResponse, ApiError> {
        let resp = self
            .http
            .post(self.url("/api/chat"))
            .json(request)
            .send()
            .await?;

        let code = resp.status();
        if code == StatusCode::GONE {
            return Err(ApiError::SessionExpired);
        }
        if !code.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if body_signals_expiry(&body) {
                return Err(ApiError::SessionExpired);
            }
            return Err(ApiError::Status { code });
        }
        Ok(resp.json().await?)
    }

    /// Fetch the server-side session snapshot. A 404 means the session does
    /// not exist server-side yet, which is normal for a fresh session.
    pub async fn fetch_snapshot(
        &self,
        shop_domain: &str,
        session_id: &str,
    ) -> Result<Option<SessionSnapshot>, ApiError> {
        let resp = self
            .http
            .get(self.url("/api/session-status"))
            .query(&[("shopDomain", shop_domain), ("sessionId", session_id)])
            .send()
            .await?;

        let code = resp.status();
        if code == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !code.is_success() {
            return Err(ApiError::Status { code });
        }
        Ok(Some(resp.json().await?))
    }

    pub async fn submit_feedback(&self, request: &FeedbackRequest) -> Result<(), ApiError> {
        let resp = self
            .http
            .post(self.url("/api/feedback"))
            .json(request)
            .send()
            .await?;
        let code = resp.status();
        if !code.is_success() {
            return Err(ApiError::Status { code });
        }
        Ok(())
    }

    /// Report a client-side fault for operator visibility
    pub async fn report_error(&self, report: &ErrorReport) -> Result<(), ApiError> {
        let resp = self
            .http
            .post(self.url("/api/log-client-error"))
            .json(report)
            .send()
            .await?;
        let code = resp.status();
        if !code.is_success() {
            return Err(ApiError::Status { code });
        }
        Ok(())
    }

    pub async fn get_profile(
        &self,
        shop_domain: &str,
        session_id: &str,
    ) -> Result<Option<CustomerProfile>, ApiError> {
        let resp = self
            .http
            .get(self.url("/api/profile"))
            .query(&[("shopDomain", shop_domain), ("sessionId", session_id)])
            .send()
            .await?;

        let code = resp.status();
        if code == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !code.is_success() {
            return Err(ApiError::Status { code });
        }
        Ok(Some(resp.json().await?))
    }

    pub async fn update_profile(
        &self,
        shop_domain: &str,
        session_id: &str,
        profile: &CustomerProfile,
    ) -> Result<(), ApiError> {
        let resp = self
            .http
            .post(self.url("/api/profile"))
            .query(&[("shopDomain", shop_domain), ("sessionId", session_id)])
            .json(profile)
            .send()
            .await?;
        let code = resp.status();
        if !code.is_success() {
            return Err(ApiError::Status { code });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use yuume_protocol::CustomerProfile;

    /// Serve exactly one canned HTTP response, then close.
    async fn one_shot_http(status_line: &'static str, body: &'static str) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut request = [0u8; 8192];
            let _ = stream.read(&mut request).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn get_profile_maps_404_to_none() {
        let base = one_shot_http("404 Not Found", "{}").await;
        let client = ApiClient::new(&base).expect("client");

        let profile = client
            .get_profile("shop.example.com", "sess-1")
            .await
            .expect("profile request");
        assert!(profile.is_none());
    }

    #[tokio::test]
    async fn get_profile_parses_the_stored_identity() {
        let base = one_shot_http(
            "200 OK",
            r#"{"email":"anna@example.com","firstName":"Anna"}"#,
        )
        .await;
        let client = ApiClient::new(&base).expect("client");

        let profile = client
            .get_profile("shop.example.com", "sess-1")
            .await
            .expect("profile request")
            .expect("stored profile");
        assert_eq!(profile.email.as_deref(), Some("anna@example.com"));
        assert_eq!(profile.first_name.as_deref(), Some("Anna"));
        assert!(profile.last_name.is_none());
    }

    #[tokio::test]
    async fn update_profile_surfaces_server_errors_as_status() {
        let base = one_shot_http("500 Internal Server Error", "{}").await;
        let client = ApiClient::new(&base).expect("client");

        let profile = CustomerProfile {
            email: Some("anna@example.com".to_string()),
            ..CustomerProfile::default()
        };
        let result = client
            .update_profile("shop.example.com", "sess-1", &profile)
            .await;
        match result {
            Err(ApiError::Status { code }) => {
                assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR)
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn update_profile_accepts_a_bare_success() {
        let base = one_shot_http("204 No Content", "").await;
        let client = ApiClient::new(&base).expect("client");

        client
            .update_profile("shop.example.com", "sess-1", &CustomerProfile::default())
            .await
            .expect("update accepted");
    }

    #[test]
    fn expiry_sentinel_is_detected_in_json_and_raw_bodies() {
        assert!(body_signals_expiry(r#"{"error":"session_expired"}"#));
        assert!(body_signals_expiry(
            r#"{"error":"session_expired","detail":"gone"}"#
        ));
        assert!(body_signals_expiry("session_expired"));
        assert!(!body_signals_expiry(r#"{"error":"rate_limited"}"#));
        assert!(!body_signals_expiry(""));
        assert!(!body_signals_expiry(r#"{"error":null}"#));
    }

    #[test]
    fn fail_kind_collapses_to_expired_or_transient() {
        assert_eq!(ApiError::SessionExpired.kind(), ChatFailKind::SessionExpired);
        assert_eq!(
            ApiError::Status {
                code: StatusCode::INTERNAL_SERVER_ERROR
            }
            .kind(),
            ChatFailKind::Transient
        );
        assert_eq!(
            ApiError::Status {
                code: StatusCode::TOO_MANY_REQUESTS
            }
            .kind(),
            ChatFailKind::Transient
        );
    }

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let client = match ApiClient::new("https://api.example.com/") {
            Ok(client) => client,
            Err(err) => panic!("client build failed: {err}"),
        };
        assert_eq!(client.url("/api/chat"), "https://api.example.com/api/chat");
    }
}
