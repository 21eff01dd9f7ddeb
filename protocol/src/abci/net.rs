//! Listen addresses and the stream type shared by server and client.
//!
//! Addresses use the engine's URL-ish notation:
//!
//! - `unix://<path>`: a unix domain socket (relative paths resolve against
//!   the working directory),
//! - `tcp://<host:port>` or bare `<host:port>`: a TCP socket.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

/// Where the out-of-process transport listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    Unix(PathBuf),
    Tcp(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid listen address {addr:?}: {reason}")]
pub struct AddrParseError {
    pub addr: String,
    pub reason: &'static str,
}

impl FromStr for ListenAddr {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| AddrParseError {
            addr: s.to_string(),
            reason,
        };

        if let Some(path) = s.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(invalid("empty socket path"));
            }
            return Ok(ListenAddr::Unix(PathBuf::from(path)));
        }

        let hostport = match s.strip_prefix("tcp://") {
            Some(rest) => rest,
            None if s.contains("://") => return Err(invalid("unsupported scheme")),
            None => s,
        };
        match hostport.rsplit_once(':') {
            Some((_, port)) if port.parse::<u16>().is_ok() => Ok(ListenAddr::Tcp(hostport.to_string())),
            _ => Err(invalid("expected host:port")),
        }
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenAddr::Unix(path) => write!(f, "unix://{}", path.display()),
            ListenAddr::Tcp(hostport) => write!(f, "tcp://{hostport}"),
        }
    }
}

/// A connected stream of either kind.
#[derive(Debug)]
pub enum Connection {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Connection {
    /// Connect to a listening transport.
    pub async fn connect(addr: &ListenAddr) -> io::Result<Self> {
        match addr {
            ListenAddr::Tcp(hostport) => {
                let stream = TcpStream::connect(hostport.as_str()).await?;
                stream.set_nodelay(true)?;
                Ok(Connection::Tcp(stream))
            }
            #[cfg(unix)]
            ListenAddr::Unix(path) => Ok(Connection::Unix(UnixStream::connect(path).await?)),
            #[cfg(not(unix))]
            ListenAddr::Unix(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix sockets are not supported on this platform",
            )),
        }
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            Connection::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Connection::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            Connection::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            Connection::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            Connection::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_forms() {
        assert_eq!(
            "unix://example.sock".parse::<ListenAddr>().unwrap(),
            ListenAddr::Unix(PathBuf::from("example.sock"))
        );
        assert_eq!(
            "tcp://127.0.0.1:26658".parse::<ListenAddr>().unwrap(),
            ListenAddr::Tcp("127.0.0.1:26658".into())
        );
        assert_eq!(
            "localhost:26658".parse::<ListenAddr>().unwrap(),
            ListenAddr::Tcp("localhost:26658".into())
        );
    }

    #[test]
    fn rejects_bad_addresses() {
        assert!("unix://".parse::<ListenAddr>().is_err());
        assert!("grpc://127.0.0.1:1".parse::<ListenAddr>().is_err());
        assert!("tcp://127.0.0.1".parse::<ListenAddr>().is_err());
        assert!("no-port".parse::<ListenAddr>().is_err());
    }

    #[test]
    fn display_uses_scheme() {
        let addr: ListenAddr = "0.0.0.0:26658".parse().unwrap();
        assert_eq!(addr.to_string(), "tcp://0.0.0.0:26658");
    }
}
