//! HTTP/1.1 over the guest API Unix socket
//!
//! [`SocketTransport`] knows where the socket lives and how to reach it.
//! [`Session`] owns one HTTP connection for the duration of a metadata read
//! and is closed when the read finishes, whatever the outcome.

use crate::config::MetadataConfig;
use crate::error::{MetadataError, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::client::conn::http1::{self, SendRequest};
use hyper::header::HOST;
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use std::path::{Path, PathBuf};
use tokio::net::UnixStream;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Response to a single GET
#[derive(Debug, Clone)]
pub struct RouteResponse {
    /// Route that was requested
    pub route: String,
    /// Final HTTP status
    pub status: StatusCode,
    /// Raw body
    pub body: Bytes,
}

impl RouteResponse {
    pub fn new(route: impl Into<String>, status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            route: route.into(),
            status,
            body: body.into(),
        }
    }

    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Body decoded as UTF-8, invalid sequences replaced
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Location of the guest API socket
#[derive(Debug, Clone)]
pub struct SocketTransport {
    path: PathBuf,
    authority: String,
}

impl SocketTransport {
    /// Create a transport for a socket path, sending `authority` as Host
    pub fn new(path: impl Into<PathBuf>, authority: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            authority: authority.into(),
        }
    }

    /// Transport described by a client configuration
    pub fn from_config(config: &MetadataConfig) -> Self {
        Self::new(config.socket_path(), config.authority.clone())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Connect a byte stream to the socket
    ///
    /// Failures are misconfiguration, never retried.
    pub async fn connect(&self) -> Result<UnixStream> {
        UnixStream::connect(&self.path)
            .await
            .map_err(|source| MetadataError::Transport {
                path: self.path.clone(),
                source,
            })
    }

    /// Open a session with an established connection
    pub async fn open(&self) -> Result<Session> {
        let connection = Connection::establish(self).await?;
        Ok(Session {
            transport: self.clone(),
            connection: Some(connection),
        })
    }
}

/// One HTTP/1.1 connection and the task driving it
struct Connection {
    sender: SendRequest<Empty<Bytes>>,
    driver: JoinHandle<()>,
}

impl Connection {
    async fn establish(transport: &SocketTransport) -> Result<Self> {
        let stream = transport.connect().await?;
        let (sender, conn) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|source| MetadataError::Protocol {
                route: transport.path.display().to_string(),
                source,
            })?;

        let driver = tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "Guest API connection ended with error");
            }
        });

        trace!(path = %transport.path.display(), "Connected to guest API socket");
        Ok(Self { sender, driver })
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Connection scoped to one metadata read
///
/// Dropping the session closes the connection.
pub struct Session {
    transport: SocketTransport,
    connection: Option<Connection>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("transport", &self.transport)
            .field("connected", &self.connection.is_some())
            .finish()
    }
}

impl Session {
    pub fn transport(&self) -> &SocketTransport {
        &self.transport
    }

    /// Issue one GET and read the whole response
    pub async fn get(&mut self, route: &str) -> Result<RouteResponse> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(route)
            .header(HOST, self.transport.authority.as_str())
            .body(Empty::<Bytes>::new())
            .map_err(|source| MetadataError::InvalidRequest {
                route: route.to_string(),
                source,
            })?;

        let connection = self.connection().await?;
        let response = connection
            .sender
            .send_request(request)
            .await
            .map_err(|source| MetadataError::Protocol {
                route: route.to_string(),
                source,
            })?;

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|source| MetadataError::Protocol {
                route: route.to_string(),
                source,
            })?
            .to_bytes();

        Ok(RouteResponse::new(route, status, body))
    }

    /// Close the connection
    pub fn close(mut self) {
        if self.connection.take().is_some() {
            trace!(path = %self.transport.path.display(), "Closed guest API session");
        }
    }

    /// Live connection, reconnecting if the server closed the previous one
    async fn connection(&mut self) -> Result<&mut Connection> {
        let reusable = match self.connection.as_mut() {
            Some(conn) => conn.sender.ready().await.is_ok(),
            None => false,
        };

        let conn = match self.connection.take() {
            Some(conn) if reusable => conn,
            _ => {
                debug!(path = %self.transport.path.display(), "Reconnecting to guest API socket");
                Connection::establish(&self.transport).await?
            }
        };
        Ok(self.connection.insert(conn))
    }
}
