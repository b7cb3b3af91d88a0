//! HTTP client for the LXD API over a Unix domain socket.
//!
//! LXD serves its REST API on a local Unix socket. Each exchange opens a
//! fresh connection with hyper's HTTP/1 client over tokio's `UnixStream`
//! and decodes the JSON envelope that every LXD response carries.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, Uri};
use hyper_util::rt::TokioIo;
use serde_json::Value;
use tokio::net::UnixStream;

use crate::error::{BackendError, Lookup};
use crate::LxdBackendConfig;

/// A connection to one LXD daemon.
///
/// Cheap to clone; clones share the same immutable settings.
#[derive(Debug, Clone)]
pub struct LxdClient {
    inner: Arc<ClientSettings>,
}

#[derive(Debug)]
struct ClientSettings {
    socket_path: PathBuf,
    project: Option<String>,
    request_timeout: Duration,
}

impl LxdClient {
    /// Create a client from the backend configuration.
    #[must_use]
    pub fn new(config: &LxdBackendConfig) -> Self {
        Self {
            inner: Arc::new(ClientSettings {
                socket_path: config.socket_path.clone(),
                project: config.project.clone(),
                request_timeout: config.request_timeout,
            }),
        }
    }

    /// Default timeout applied by [`Self::request`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.inner.request_timeout
    }

    /// Send a request with the default timeout.
    ///
    /// # Errors
    /// See [`Self::request_with_timeout`].
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Lookup<Value>, BackendError> {
        self.request_with_timeout(method, path, body, self.inner.request_timeout)
            .await
    }

    /// Send a request and decode the response envelope.
    ///
    /// `path` is the path component (e.g. `/1.0/virtual-machines/foo/state`);
    /// the configured project is appended as a query parameter unless the
    /// path already names one. A 404 from the daemon yields
    /// [`Lookup::NotFound`].
    ///
    /// # Errors
    /// Returns [`BackendError::TransportUnavailable`] when the socket cannot
    /// be reached or the exchange exceeds `timeout`,
    /// [`BackendError::Api`] for any other daemon error, and
    /// [`BackendError::InvalidResponse`] when the body is not JSON.
    pub async fn request_with_timeout(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        timeout: Duration,
    ) -> Result<Lookup<Value>, BackendError> {
        let uri_path = self.scoped_path(path);
        tracing::trace!(%method, path = %uri_path, "LXD request");

        match tokio::time::timeout(timeout, self.exchange(method, &uri_path, body)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::TransportUnavailable(format!(
                "request to {uri_path} timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    fn scoped_path(&self, path: &str) -> String {
        match &self.inner.project {
            Some(project) if !path.contains("project=") => {
                let separator = if path.contains('?') { '&' } else { '?' };
                format!("{path}{separator}project={project}")
            }
            _ => path.to_owned(),
        }
    }

    async fn exchange(
        &self,
        method: Method,
        uri_path: &str,
        body: Option<&Value>,
    ) -> Result<Lookup<Value>, BackendError> {
        let socket_path = &self.inner.socket_path;
        let stream = UnixStream::connect(socket_path).await.map_err(|e| {
            BackendError::TransportUnavailable(format!("connect to {}: {e}", socket_path.display()))
        })?;

        let io = TokioIo::new(stream);

        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| BackendError::TransportUnavailable(format!("HTTP handshake: {e}")))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!("LXD connection closed: {e}");
            }
        });

        let body_bytes = body.map(|b| Bytes::from(b.to_string())).unwrap_or_default();
        let content_len = body_bytes.len();

        let uri: Uri = uri_path
            .parse()
            .map_err(|e| BackendError::InvalidResponse(format!("invalid URI path {uri_path}: {e}")))?;

        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("Host", "lxd");

        if content_len > 0 {
            builder = builder.header("Content-Type", "application/json");
            builder = builder.header("Content-Length", content_len.to_string());
        }

        let req = builder
            .body(Full::new(body_bytes))
            .map_err(|e| BackendError::InvalidResponse(format!("build request: {e}")))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| BackendError::TransportUnavailable(format!("send request: {e}")))?;

        let status = resp.status();
        let body_bytes = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| BackendError::TransportUnavailable(format!("read response body: {e}")))?
            .to_bytes();

        decode_envelope(uri_path, status.as_u16(), &body_bytes)
    }
}

/// Turn an HTTP status and body into a lookup result.
///
/// LXD reports errors both through the HTTP status and the envelope's
/// `error_code`; either one saying 404 means the object is gone.
pub(crate) fn decode_envelope(
    uri_path: &str,
    status: u16,
    body: &[u8],
) -> Result<Lookup<Value>, BackendError> {
    let json: Value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(body).map_err(|e| {
            BackendError::InvalidResponse(format!(
                "HTTP {status} from {uri_path}: {e}: {}",
                String::from_utf8_lossy(body)
            ))
        })?
    };

    let error_code = json
        .get("error_code")
        .and_then(Value::as_u64)
        .and_then(|c| u16::try_from(c).ok())
        .filter(|c| *c != 0);

    if status == 404 || error_code == Some(404) {
        return Ok(Lookup::NotFound);
    }

    let is_error = !(200..300).contains(&status)
        || json.get("type").and_then(Value::as_str) == Some("error");
    if is_error {
        let message = json
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_owned();
        return Err(BackendError::Api {
            path: uri_path.to_owned(),
            code: error_code.unwrap_or(status),
            message,
        });
    }

    Ok(Lookup::Found(json))
}
