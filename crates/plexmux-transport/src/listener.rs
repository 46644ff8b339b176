use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::stream::PlexStream;

/// Accepts transport connections on any supported [`Endpoint`].
pub struct TransportListener {
    inner: ListenerInner,
}

enum ListenerInner {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(crate::uds::UnixDomainSocket),
}

impl TransportListener {
    /// Bind to `endpoint`.
    pub async fn bind(endpoint: &Endpoint) -> Result<Self> {
        let inner = match endpoint {
            Endpoint::Tcp(addr) => {
                let listener =
                    TcpListener::bind(addr)
                        .await
                        .map_err(|source| TransportError::Bind {
                            endpoint: endpoint.to_string(),
                            source,
                        })?;
                info!(%endpoint, "listening on tcp");
                ListenerInner::Tcp(listener)
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => ListenerInner::Unix(crate::uds::UnixDomainSocket::bind(path)?),
            #[cfg(not(unix))]
            Endpoint::Unix(_) => return Err(TransportError::Unsupported(endpoint.to_string())),
        };
        Ok(Self { inner })
    }

    /// Accept the next incoming connection.
    pub async fn accept(&self) -> Result<PlexStream> {
        match &self.inner {
            ListenerInner::Tcp(listener) => {
                let (stream, addr) = listener.accept().await.map_err(TransportError::Accept)?;
                stream.set_nodelay(true)?;
                debug!(%addr, "accepted tcp connection");
                Ok(PlexStream::from_tcp(stream))
            }
            #[cfg(unix)]
            ListenerInner::Unix(socket) => socket.accept().await,
        }
    }

    /// The endpoint actually bound (resolves an ephemeral TCP port).
    pub fn local_endpoint(&self) -> Result<Endpoint> {
        match &self.inner {
            ListenerInner::Tcp(listener) => Ok(Endpoint::from(listener.local_addr()?)),
            #[cfg(unix)]
            ListenerInner::Unix(socket) => Ok(Endpoint::Unix(socket.path().to_path_buf())),
        }
    }
}
