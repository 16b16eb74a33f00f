//! TCP port probing.

use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::trace;

use crate::error::{GuardError, Result};

/// Answers "is something listening on this port?".
#[async_trait]
pub trait PortProber: Send + Sync {
    /// `Ok(false)` for a free port, `Ok(true)` for a bound one, and
    /// `Err` (PortProbeFailed) when the state cannot be determined.
    async fn is_port_bound(&self, port: u16) -> Result<bool>;
}

/// Probes by connecting to the loopback interface.
#[derive(Debug, Clone)]
pub struct TcpPortProber {
    host: IpAddr,
    timeout: Duration,
}

impl TcpPortProber {
    pub fn new(timeout: Duration) -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            timeout,
        }
    }

    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }
}

impl Default for TcpPortProber {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[async_trait]
impl PortProber for TcpPortProber {
    async fn is_port_bound(&self, port: u16) -> Result<bool> {
        let addr = SocketAddr::new(self.host, port);
        match tokio::time::timeout(self.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => {
                trace!(port, "port accepted connection");
                Ok(true)
            }
            Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => {
                trace!(port, "connection refused");
                Ok(false)
            }
            Ok(Err(e)) => Err(GuardError::port_probe_failed(port, e.to_string()).with_source(e)),
            Err(_) => Err(GuardError::port_probe_failed(
                port,
                format!("connect timed out after {:?}", self.timeout),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_bound_port_reports_true() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let prober = TcpPortProber::default();
        assert!(prober.is_port_bound(port).await.unwrap());
    }

    #[tokio::test]
    async fn test_refused_connection_reports_false() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let prober = TcpPortProber::default();
        assert!(!prober.is_port_bound(port).await.unwrap());
    }

    #[tokio::test]
    async fn test_unroutable_host_is_probe_failure() {
        // TEST-NET-1 never answers, so the connect either times out or is rejected by the OS.
        let prober = TcpPortProber::new(Duration::from_millis(50))
            .with_host(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)));
        match prober.is_port_bound(9).await {
            Err(e) => assert_eq!(e.code(), ErrorCode::PortProbeFailed),
            Ok(bound) => assert!(!bound),
        }
    }
}
