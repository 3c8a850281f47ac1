//! Command source client.
//!
//! Talks to the payment backend over HTTP: registers this host + device
//! pairing, polls for pending work, and reports outcomes.
//!
//! Failure policy follows the loop's needs, not symmetry:
//!
//! - [`BackendClient::register`] is strict; every failure shape collapses to
//!   [`Error::Registration`], distinguished only in logs.
//! - [`BackendClient::poll`] is forgiving; timeouts and connection failures
//!   are expected under intermittent connectivity and are indistinguishable
//!   from "no work available".
//! - [`BackendClient::report_status`] is advisory; a lost report is logged
//!   and forgotten, never retried.

// ============================================================================
// Modules
// ============================================================================

mod commands;

pub use commands::{
    HealthResponse, Outcome, PollResponse, RawCommand, RegisterRequest, RegisterResponse,
    StatusReport, StatusResponse, WorkItem, WorkKind,
};

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Timeout for registration requests; slightly longer than the poll path
/// since registration happens once per session.
const REGISTER_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for poll requests.
const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for status reports.
const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for health checks.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Header carrying the API key on every request.
const API_KEY_HEADER: &str = "X-API-Key";

// ============================================================================
// SessionHandle
// ============================================================================

/// The logical identity registered with the backend.
///
/// An opaque string bound to one physical device + host pairing. Owned by
/// the session controller and replaced wholesale on re-registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle(String);

impl SessionHandle {
    /// Wraps a registered device identity.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identity string as sent on the wire.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// BackendClient
// ============================================================================

/// HTTP client for the command backend.
pub struct BackendClient {
    /// Shared HTTP client with the API key pre-installed.
    http: reqwest::Client,
    /// Backend base URL without a trailing slash.
    base_url: String,
}

impl BackendClient {
    /// Creates a client for the configured backend.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the API key is not a valid header value
    /// or the HTTP client cannot be constructed.
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            API_KEY_HEADER,
            HeaderValue::from_str(&config.api_key)
                .map_err(|_| Error::config("API key contains invalid header characters"))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Error::config(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.backend_url.trim_end_matches('/').to_string(),
        })
    }

    /// Registers this device with the backend.
    ///
    /// The device identity is derived deterministically from the host name
    /// and a hardware identifier; see [`derive_device_id`]. A handle is
    /// returned only when the backend explicitly signals success.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Registration`] for connection failures, timeouts,
    /// HTTP errors, and non-success payloads alike.
    pub async fn register(
        &self,
        host_name: &str,
        link_id: Option<&str>,
    ) -> Result<SessionHandle> {
        let device_id = derive_device_id(host_name);
        info!(device_id = %device_id, "Registering device");

        let request = RegisterRequest {
            device_id: device_id.clone(),
            computer_name: host_name.to_string(),
            com_port: link_id.map(str::to_string),
        };

        let response = self
            .http
            .post(format!("{}/api/device/register", self.base_url))
            .timeout(REGISTER_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    error!(error = %e, "Backend timeout during registration");
                } else {
                    error!(error = %e, "Cannot connect to backend");
                }
                Error::registration(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, body = %body, "Registration HTTP error");
            return Err(Error::registration(format!("HTTP {status}")));
        }

        let body: RegisterResponse = response
            .json()
            .await
            .map_err(|e| Error::registration(format!("malformed response: {e}")))?;

        if !body.success {
            error!(device_id = %device_id, "Backend rejected registration");
            return Err(Error::registration("backend did not signal success"));
        }

        info!(device_id = %device_id, "Registration successful");
        Ok(SessionHandle::new(device_id))
    }

    /// Polls for pending work.
    ///
    /// A rejected or malformed response is indistinguishable from "no work
    /// available" and yields an empty list. Timeouts and connection failures
    /// are expected under intermittent connectivity: they surface as a quiet
    /// error for the caller's consecutive-failure accounting, never as log
    /// spam. Only genuinely unexpected failures are logged, and then only as
    /// warnings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] when the backend cannot be reached.
    pub async fn poll(&self, handle: &SessionHandle) -> Result<Vec<WorkItem>> {
        let result = self
            .http
            .get(format!("{}/api/device/poll", self.base_url))
            .query(&[("device_id", handle.as_str())])
            .timeout(POLL_TIMEOUT)
            .send()
            .await;

        let response = match result {
            Ok(r) => r,
            Err(e) if e.is_timeout() || e.is_connect() => {
                // Expected under intermittent connectivity; not worth a log
                // line every cycle.
                return Err(Error::Http(e));
            }
            Err(e) => {
                warn!(error = %e, "Polling error");
                return Err(Error::Http(e));
            }
        };

        if !response.status().is_success() {
            return Ok(Vec::new());
        }

        match response.json::<PollResponse>().await {
            Ok(body) => Ok(body.into_work_items()),
            Err(e) => {
                warn!(error = %e, "Malformed poll response");
                Ok(Vec::new())
            }
        }
    }

    /// Reports the outcome of one work item.
    ///
    /// Best-effort: failures are logged and never retried. Returns whether
    /// the backend acknowledged the report.
    pub async fn report_status(
        &self,
        handle: &SessionHandle,
        item_id: &str,
        outcome: Outcome,
        elapsed: Option<f64>,
        error_text: Option<String>,
    ) -> bool {
        let report = StatusReport {
            device_id: handle.as_str().to_string(),
            command_id: item_id.to_string(),
            status: outcome,
            execution_time: elapsed,
            error: error_text,
        };

        let result = self
            .http
            .post(format!("{}/api/device/status", self.base_url))
            .timeout(STATUS_TIMEOUT)
            .json(&report)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => response
                .json::<StatusResponse>()
                .await
                .map(|body| body.success)
                .unwrap_or(false),
            Ok(response) => {
                error!(status = %response.status(), "Status report HTTP error");
                false
            }
            Err(e) => {
                error!(error = %e, "Status report error");
                false
            }
        }
    }

    /// Checks whether the backend is reachable and serving.
    pub async fn check_health(&self) -> bool {
        let result = self
            .http
            .get(format!("{}/api/device/health", self.base_url))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => response
                .json::<HealthResponse>()
                .await
                .map(|body| body.status == "online")
                .unwrap_or(false),
            Ok(_) | Err(_) => {
                debug!("Backend health check failed");
                false
            }
        }
    }
}

// ============================================================================
// Device Identity
// ============================================================================

/// Derives the device identity from the host name and a hardware identifier.
///
/// The identifier is the first six hex digits of the primary MAC address,
/// uppercased; when no stable hardware identifier is available a random one
/// is used, which makes the identity non-deterministic across restarts but
/// still unique.
#[must_use]
pub fn derive_device_id(host_name: &str) -> String {
    format!("device_{host_name}_{}", hardware_id())
}

/// Six uppercase hex digits identifying this host's hardware.
fn hardware_id() -> String {
    let stable = mac_address::get_mac_address()
        .ok()
        .flatten()
        .map(|mac| mac.to_string().replace(':', "").to_uppercase());

    match stable {
        Some(hex) if hex.len() >= 6 => hex[..6].to_string(),
        _ => {
            let random = uuid::Uuid::new_v4().simple().to_string().to_uppercase();
            random[..6].to_string()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn test_config() -> Config {
        Config {
            api_key: "test-key".to_string(),
            ..Config::default()
        }
    }

    /// Serves exactly one canned HTTP response on an ephemeral local port.
    async fn one_shot_backend(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");

        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut request = [0u8; 4096];
                let _ = socket.read(&mut request).await;
                let response = format!(
                    "{status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len(),
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });

        format!("http://{addr}")
    }

    fn client_for(url: String) -> BackendClient {
        let config = Config {
            backend_url: url,
            ..test_config()
        };
        BackendClient::new(&config).expect("client should build")
    }

    #[test]
    fn test_client_construction() {
        let client = BackendClient::new(&test_config()).expect("client should build");
        assert_eq!(client.base_url, "http://localhost:5001");
    }

    #[test]
    fn test_client_rejects_invalid_api_key() {
        let config = Config {
            api_key: "bad\nkey".to_string(),
            ..Config::default()
        };
        assert!(BackendClient::new(&config).is_err());
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let config = Config {
            backend_url: "http://backend.example/".to_string(),
            ..test_config()
        };
        let client = BackendClient::new(&config).expect("client should build");
        assert_eq!(client.base_url, "http://backend.example");
    }

    #[test]
    fn test_session_handle_display() {
        let handle = SessionHandle::new("device_host_AB12CD");
        assert_eq!(handle.to_string(), "device_host_AB12CD");
        assert_eq!(handle.as_str(), "device_host_AB12CD");
    }

    #[test]
    fn test_derive_device_id_shape() {
        let id = derive_device_id("till-3");
        assert!(id.starts_with("device_till-3_"));

        let hw = id.rsplit('_').next().unwrap();
        assert_eq!(hw.len(), 6);
        assert!(hw.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hw, hw.to_uppercase());
    }

    #[tokio::test]
    async fn test_poll_surfaces_connection_failure_quietly() {
        let config = Config {
            // Nothing listens here; the poll must fail as a transport error
            // the loop can count, not panic or hang.
            backend_url: "http://127.0.0.1:1".to_string(),
            ..test_config()
        };
        let client = BackendClient::new(&config).expect("client should build");
        let handle = SessionHandle::new("device_test_000000");

        let err = client.poll(&handle).await.unwrap_err();
        assert!(matches!(err, Error::Http(_)));
    }

    #[tokio::test]
    async fn test_register_accepts_explicit_success() {
        let url = one_shot_backend("HTTP/1.1 200 OK", r#"{"success": true}"#).await;
        let client = client_for(url);

        let handle = client
            .register("host", Some("COM7"))
            .await
            .expect("register should succeed");
        assert!(handle.as_str().starts_with("device_host_"));
    }

    #[tokio::test]
    async fn test_register_rejects_unsuccessful_body() {
        // HTTP 200 but no explicit success flag set: no handle.
        let url = one_shot_backend("HTTP/1.1 200 OK", r#"{"success": false}"#).await;
        let client = client_for(url);

        let err = client.register("host", None).await.unwrap_err();
        assert!(matches!(err, Error::Registration { .. }));
    }

    #[tokio::test]
    async fn test_register_rejects_http_error() {
        let url = one_shot_backend("HTTP/1.1 500 Internal Server Error", "{}").await;
        let client = client_for(url);

        let err = client.register("host", None).await.unwrap_err();
        assert!(matches!(err, Error::Registration { .. }));
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_register_fails_when_unreachable() {
        let config = Config {
            backend_url: "http://127.0.0.1:1".to_string(),
            ..test_config()
        };
        let client = BackendClient::new(&config).expect("client should build");

        let err = client.register("host", None).await.unwrap_err();
        assert!(matches!(err, Error::Registration { .. }));
    }

    #[tokio::test]
    async fn test_report_status_is_best_effort() {
        let config = Config {
            backend_url: "http://127.0.0.1:1".to_string(),
            ..test_config()
        };
        let client = BackendClient::new(&config).expect("client should build");
        let handle = SessionHandle::new("device_test_000000");

        // Unreachable backend: the report is dropped, not an error.
        let acked = client
            .report_status(&handle, "cmd-1", Outcome::Success, Some(1.5), None)
            .await;
        assert!(!acked);
    }
}
