use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};

/// A connected duplex byte stream: `AsyncRead + AsyncWrite` over TCP or a Unix socket.
///
/// This is the fundamental I/O type returned by transport operations.
/// It wraps either a TCP stream or a Unix domain socket stream.
pub struct PlexStream {
    inner: PlexStreamInner,
}

enum PlexStreamInner {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
}

impl PlexStream {
    /// Connect to `endpoint`.
    pub async fn connect(endpoint: &Endpoint) -> Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => {
                let stream =
                    TcpStream::connect(addr)
                        .await
                        .map_err(|source| TransportError::Connect {
                            endpoint: endpoint.to_string(),
                            source,
                        })?;
                stream.set_nodelay(true)?;
                debug!(%endpoint, "connected over tcp");
                Ok(Self::from_tcp(stream))
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => crate::uds::UnixDomainSocket::connect(path).await,
            #[cfg(not(unix))]
            Endpoint::Unix(_) => Err(TransportError::Unsupported(endpoint.to_string())),
        }
    }

    /// Wrap an established TCP stream.
    pub fn from_tcp(stream: TcpStream) -> Self {
        Self {
            inner: PlexStreamInner::Tcp(stream),
        }
    }

    /// Wrap an established Unix domain socket stream.
    #[cfg(unix)]
    pub fn from_unix(stream: tokio::net::UnixStream) -> Self {
        Self {
            inner: PlexStreamInner::Unix(stream),
        }
    }

    /// Short human-readable description of the remote side, for logs.
    pub fn peer_label(&self) -> String {
        match &self.inner {
            PlexStreamInner::Tcp(stream) => stream
                .peer_addr()
                .map(|addr| format!("tcp://{addr}"))
                .unwrap_or_else(|_| "tcp://<unknown>".to_string()),
            #[cfg(unix)]
            PlexStreamInner::Unix(stream) => match stream.peer_cred() {
                Ok(cred) => format!(
                    "unix:uid={},pid={}",
                    cred.uid(),
                    cred.pid().map_or_else(|| "?".to_string(), |pid| pid.to_string())
                ),
                Err(_) => "unix:<unknown>".to_string(),
            },
        }
    }
}

impl AsyncRead for PlexStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            PlexStreamInner::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(unix)]
            PlexStreamInner::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for PlexStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.get_mut().inner {
            PlexStreamInner::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(unix)]
            PlexStreamInner::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            PlexStreamInner::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(unix)]
            PlexStreamInner::Unix(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            PlexStreamInner::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(unix)]
            PlexStreamInner::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

impl std::fmt::Debug for PlexStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            PlexStreamInner::Tcp(_) => f.debug_struct("PlexStream").field("type", &"tcp").finish(),
            #[cfg(unix)]
            PlexStreamInner::Unix(_) => {
                f.debug_struct("PlexStream").field("type", &"unix").finish()
            }
        }
    }
}
