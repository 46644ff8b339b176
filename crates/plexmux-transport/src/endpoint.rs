use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::TransportError;

/// Where a transport connects to or listens on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A TCP `host:port` pair.
    Tcp(String),
    /// A filesystem Unix domain socket path.
    Unix(PathBuf),
}

impl Endpoint {
    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match self {
            Endpoint::Tcp(_) => "tcp",
            Endpoint::Unix(_) => "unix-domain-socket",
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Endpoint::Tcp(addr.to_string())
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    /// Accepted forms, in order of precedence:
    ///
    /// - `tcp://host:port`
    /// - `unix:///path/to.sock` (or `unix:relative.sock`)
    /// - a literal socket address such as `127.0.0.1:4001`
    /// - anything containing a `/` or ending in `.sock` is a socket path
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        if input.is_empty() {
            return Err(TransportError::InvalidEndpoint(input.to_string()));
        }

        if let Some(addr) = input.strip_prefix("tcp://") {
            if addr.rsplit_once(':').is_none() {
                return Err(TransportError::InvalidEndpoint(input.to_string()));
            }
            return Ok(Endpoint::Tcp(addr.to_string()));
        }

        if let Some(path) = input
            .strip_prefix("unix://")
            .or_else(|| input.strip_prefix("unix:"))
        {
            if path.is_empty() {
                return Err(TransportError::InvalidEndpoint(input.to_string()));
            }
            return Ok(Endpoint::Unix(PathBuf::from(path)));
        }

        if input.parse::<SocketAddr>().is_ok() {
            return Ok(Endpoint::Tcp(input.to_string()));
        }

        if input.contains('/') || input.ends_with(".sock") {
            return Ok(Endpoint::Unix(PathBuf::from(input)));
        }

        Err(TransportError::InvalidEndpoint(input.to_string()))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_explicit_schemes() {
        assert_eq!(
            "tcp://localhost:4001".parse::<Endpoint>().unwrap(),
            Endpoint::Tcp("localhost:4001".to_string())
        );
        assert_eq!(
            "unix:///tmp/plex.sock".parse::<Endpoint>().unwrap(),
            Endpoint::Unix(PathBuf::from("/tmp/plex.sock"))
        );
        assert_eq!(
            "unix:plex.sock".parse::<Endpoint>().unwrap(),
            Endpoint::Unix(PathBuf::from("plex.sock"))
        );
    }

    #[test]
    fn parses_bare_forms() {
        assert_eq!(
            "127.0.0.1:9000".parse::<Endpoint>().unwrap(),
            Endpoint::Tcp("127.0.0.1:9000".to_string())
        );
        assert_eq!(
            "/run/plex/ctl.sock".parse::<Endpoint>().unwrap(),
            Endpoint::Unix(PathBuf::from("/run/plex/ctl.sock"))
        );
        assert_eq!(
            "local.sock".parse::<Endpoint>().unwrap(),
            Endpoint::Unix(PathBuf::from("local.sock"))
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            "".parse::<Endpoint>(),
            Err(TransportError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            "not-an-endpoint".parse::<Endpoint>(),
            Err(TransportError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            "tcp://missing-port".parse::<Endpoint>(),
            Err(TransportError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            "unix://".parse::<Endpoint>(),
            Err(TransportError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn display_round_trips() {
        for raw in ["tcp://127.0.0.1:1", "unix:///tmp/x.sock"] {
            let endpoint: Endpoint = raw.parse().unwrap();
            assert_eq!(endpoint.to_string(), raw);
        }
    }
}
