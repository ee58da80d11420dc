//! HTTP peer client.
//!
//! [`HttpSessionClient`] implements [`SessionService`] by re-issuing each
//! call against another node's router. [`HttpDialer`] builds one client per
//! peer for [`Cluster::connect`](mnemosyne_runtime::Cluster::connect).

use crate::error::ErrorBody;
use crate::extractors::{FORWARDED_HEADER, TIMEOUT_HEADER};
use crate::middleware::REQUEST_ID_HEADER;
use mnemosyne_core::constants::AUTHORIZATION_METADATA_KEY;
use mnemosyne_core::rpc::{
    AbandonRequest, AbandonResponse, DeleteRequest, DeleteResponse, ExistsRequest, ExistsResponse,
    GetRequest, ListRequest, ListResponse, ServiceFuture, SessionResponse, SetValueRequest,
    SetValueResponse, StartRequest,
};
use mnemosyne_core::{CallContext, SessionError, SessionService};
use mnemosyne_runtime::{ClusterError, Dialer, cluster::DialFuture};
use reqwest::{Certificate, Client, RequestBuilder, Response};
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Connect timeout of clients built by [`HttpDialer`].
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors raised while building a peer client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The root certificate is not valid PEM.
    #[error("invalid peer CA certificate: {0}")]
    Certificate(String),

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// [`SessionService`] backed by another node's HTTP endpoint.
#[derive(Clone, Debug)]
pub struct HttpSessionClient {
    base_url: String,
    http: Client,
}

impl HttpSessionClient {
    /// Client for `base_url`, e.g. `http://10.0.0.2:8080`.
    ///
    /// # Errors
    ///
    /// [`ClientError::Build`] if the TLS backend cannot be initialized.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()?;
        Ok(Self::with_client(base_url, http))
    }

    /// Client for `base_url` sharing an existing `reqwest` client.
    #[must_use]
    pub fn with_client(base_url: impl Into<String>, http: Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    /// Base URL calls are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Attach the call metadata headers and the request timeout.
    fn request(
        &self,
        method: &'static str,
        ctx: &CallContext,
    ) -> Result<RequestBuilder, SessionError> {
        let mut builder = self
            .http
            .post(format!("{}/v1/session/{method}", self.base_url));

        if let Some(remaining) = ctx.remaining() {
            if remaining.is_zero() {
                return Err(SessionError::DeadlineExceeded(format!(
                    "{method}: deadline exceeded"
                )));
            }
            let millis = remaining.as_millis().max(1);
            builder = builder
                .header(TIMEOUT_HEADER, millis.to_string())
                .timeout(remaining);
        }
        if ctx.is_forwarded() {
            builder = builder.header(FORWARDED_HEADER, "1");
        }
        if let Some(request_id) = ctx.request_id() {
            builder = builder.header(REQUEST_ID_HEADER, request_id);
        }
        if let Some(token) = ctx.access_token() {
            builder = builder.header(AUTHORIZATION_METADATA_KEY, format!("Bearer {token}"));
        }

        Ok(builder)
    }

    async fn call<Req, Resp>(
        &self,
        method: &'static str,
        ctx: &CallContext,
        body: Option<&Req>,
    ) -> Result<Resp, SessionError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let mut builder = self.request(method, ctx)?;
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| self.transport_error(method, &e))?;
        if !response.status().is_success() {
            return Err(remote_error(response).await);
        }
        response
            .json::<Resp>()
            .await
            .map_err(|e| self.transport_error(method, &e))
    }

    fn transport_error(&self, method: &'static str, err: &reqwest::Error) -> SessionError {
        if err.is_timeout() {
            SessionError::DeadlineExceeded(format!("{method}: deadline exceeded"))
        } else if err.is_connect() {
            SessionError::Unavailable(format!("cluster node {} is unreachable", self.base_url))
        } else {
            SessionError::internal("peer request failed", err)
        }
    }
}

/// Decode the `{code, message}` body of a failed call.
async fn remote_error(response: Response) -> SessionError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => body.into_session_error(),
        Err(_) => SessionError::internal("unexpected peer error", format!("{status}: {text}")),
    }
}

impl SessionService for HttpSessionClient {
    fn start(&self, ctx: CallContext, request: StartRequest) -> ServiceFuture<'_, SessionResponse> {
        Box::pin(async move { self.call("start", &ctx, Some(&request)).await })
    }

    fn get(&self, ctx: CallContext, request: GetRequest) -> ServiceFuture<'_, SessionResponse> {
        Box::pin(async move { self.call("get", &ctx, Some(&request)).await })
    }

    fn context(&self, ctx: CallContext) -> ServiceFuture<'_, SessionResponse> {
        Box::pin(async move { self.call::<(), _>("context", &ctx, None).await })
    }

    fn exists(&self, ctx: CallContext, request: ExistsRequest) -> ServiceFuture<'_, ExistsResponse> {
        Box::pin(async move { self.call("exists", &ctx, Some(&request)).await })
    }

    fn abandon(
        &self,
        ctx: CallContext,
        request: AbandonRequest,
    ) -> ServiceFuture<'_, AbandonResponse> {
        Box::pin(async move { self.call("abandon", &ctx, Some(&request)).await })
    }

    fn set_value(
        &self,
        ctx: CallContext,
        request: SetValueRequest,
    ) -> ServiceFuture<'_, SetValueResponse> {
        Box::pin(async move { self.call("set_value", &ctx, Some(&request)).await })
    }

    fn delete(&self, ctx: CallContext, request: DeleteRequest) -> ServiceFuture<'_, DeleteResponse> {
        Box::pin(async move { self.call("delete", &ctx, Some(&request)).await })
    }

    fn list(&self, ctx: CallContext, request: ListRequest) -> ServiceFuture<'_, ListResponse> {
        Box::pin(async move { self.call("list", &ctx, Some(&request)).await })
    }
}

/// [`Dialer`] producing [`HttpSessionClient`]s.
///
/// Peers are reached over plain HTTP unless a root certificate is supplied,
/// in which case every peer is dialed over HTTPS and verified against it.
#[derive(Clone, Debug)]
pub struct HttpDialer {
    http: Client,
    scheme: &'static str,
    probe: bool,
}

impl HttpDialer {
    /// Plain HTTP dialer without a health probe.
    ///
    /// # Errors
    ///
    /// [`ClientError::Build`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self, ClientError> {
        Ok(Self {
            http: Client::builder()
                .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
                .build()?,
            scheme: "http",
            probe: false,
        })
    }

    /// HTTPS dialer trusting the PEM encoded root certificate `pem`.
    ///
    /// # Errors
    ///
    /// [`ClientError::Certificate`] for an unreadable certificate.
    pub fn with_root_certificate(pem: &[u8]) -> Result<Self, ClientError> {
        let certificate =
            Certificate::from_pem(pem).map_err(|e| ClientError::Certificate(e.to_string()))?;
        Ok(Self {
            http: Client::builder()
                .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
                .add_root_certificate(certificate)
                .build()?,
            scheme: "https",
            probe: false,
        })
    }

    /// Require `GET /health` to answer before a dial succeeds.
    #[must_use]
    pub const fn with_health_probe(mut self, probe: bool) -> Self {
        self.probe = probe;
        self
    }

    async fn probe(&self, base_url: &str) -> Result<(), String> {
        let response = self
            .http
            .get(format!("{base_url}/health"))
            .timeout(DEFAULT_CONNECT_TIMEOUT)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("health probe returned {}", response.status()))
        }
    }
}

/// Check that `addr` is `host:port` with a non-empty host and a valid port.
///
/// # Errors
///
/// A description of what is wrong with the address.
pub fn validate_addr(addr: &str) -> Result<(), String> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| "expected host:port".to_string())?;
    if host.is_empty() || host.contains('/') {
        return Err(format!("invalid host {host:?}"));
    }
    match port.parse::<u16>() {
        Ok(port) if port > 0 => Ok(()),
        _ => Err(format!("invalid port {port:?}")),
    }
}

impl Dialer for HttpDialer {
    fn dial<'a>(&'a self, addr: &'a str) -> DialFuture<'a> {
        Box::pin(async move {
            let dial_error = |reason: String| ClusterError::Dial {
                addr: addr.to_string(),
                reason,
            };

            validate_addr(addr).map_err(dial_error)?;
            let base_url = format!("{}://{addr}", self.scheme);
            if self.probe {
                self.probe(&base_url).await.map_err(dial_error)?;
            }

            let client: Arc<dyn SessionService> =
                Arc::new(HttpSessionClient::with_client(base_url, self.http.clone()));
            Ok(client)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_addr_validation() {
        assert!(validate_addr("10.0.0.1:8080").is_ok());
        assert!(validate_addr("node-a.internal:443").is_ok());
        assert!(validate_addr("[::1]:8080").is_ok());

        assert!(validate_addr("10.0.0.1").is_err());
        assert!(validate_addr(":8080").is_err());
        assert!(validate_addr("host:0").is_err());
        assert!(validate_addr("host:http").is_err());
        assert!(validate_addr("http://host:80").is_err());
    }

    #[test]
    fn test_base_url_is_normalized() {
        let client = HttpSessionClient::new("http://10.0.0.1:8080/").unwrap();
        assert_eq!(client.base_url(), "http://10.0.0.1:8080");
    }

    #[tokio::test]
    async fn test_dial_rejects_bad_addresses() {
        let dialer = HttpDialer::new().unwrap();
        let err = dialer.dial("not-an-address").await.err().unwrap();
        assert!(matches!(err, ClusterError::Dial { ref addr, .. } if addr == "not-an-address"));
    }

    #[tokio::test]
    async fn test_dial_without_probe_does_not_connect() {
        let dialer = HttpDialer::new().unwrap();
        assert!(dialer.dial("127.0.0.1:1").await.is_ok());
    }

    #[tokio::test]
    async fn test_probe_fails_for_closed_port() {
        let dialer = HttpDialer::new().unwrap().with_health_probe(true);
        assert!(dialer.dial("127.0.0.1:1").await.is_err());
    }

    #[tokio::test]
    async fn test_elapsed_deadline_is_not_sent() {
        let client = HttpSessionClient::new("http://127.0.0.1:1").unwrap();
        let ctx = CallContext::new().with_timeout(Duration::ZERO);
        let err = client
            .get(
                ctx,
                GetRequest {
                    access_token: "t".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::DeadlineExceeded(_)));
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_unavailable() {
        let client = HttpSessionClient::new("http://127.0.0.1:1").unwrap();
        let err = client
            .exists(
                CallContext::new(),
                ExistsRequest {
                    access_token: "t".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Unavailable(_)));
    }
}
