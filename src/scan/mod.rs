// Scan module - TCP connect port scanning

pub mod coordinator;

use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;

pub use coordinator::ScanCoordinator;

/// One port waiting in the coordinator's queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanTask {
    pub port: u16,
}

/// Why a port was not found open
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortError {
    Refused,
    TimedOut,
    Unreachable,
    Other(String),
}

/// Outcome of probing one port, produced by exactly one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub port: u16,
    pub open: bool,
    pub error: Option<PortError>,
}

impl ScanResult {
    pub fn open(port: u16) -> Self {
        ScanResult {
            port,
            open: true,
            error: None,
        }
    }

    pub fn closed(port: u16, error: PortError) -> Self {
        ScanResult {
            port,
            open: false,
            error: Some(error),
        }
    }
}

/// Performs a single connect attempt against one address
#[async_trait]
pub trait PortConnector: Send + Sync {
    async fn probe(&self, addr: SocketAddr, timeout: Duration) -> ScanResult;
}

/// Plain TCP connect; the stream is closed as soon as the handshake completes
pub struct TcpConnector;

#[async_trait]
impl PortConnector for TcpConnector {
    async fn probe(&self, addr: SocketAddr, timeout: Duration) -> ScanResult {
        let port = addr.port();
        match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => ScanResult::open(port),
            Ok(Err(e)) => {
                let error = match e.kind() {
                    std::io::ErrorKind::ConnectionRefused => PortError::Refused,
                    std::io::ErrorKind::TimedOut => PortError::TimedOut,
                    std::io::ErrorKind::HostUnreachable | std::io::ErrorKind::NetworkUnreachable => {
                        PortError::Unreachable
                    }
                    _ => PortError::Other(e.to_string()),
                };
                ScanResult::closed(port, error)
            }
            Err(_) => ScanResult::closed(port, PortError::TimedOut),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let result = TcpConnector.probe(addr, Duration::from_secs(1)).await;
        assert_eq!(result, ScanResult::open(addr.port()));
    }

    #[tokio::test]
    async fn test_connect_closed_port() {
        // Bind then drop to get a port nothing listens on
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let result = TcpConnector.probe(addr, Duration::from_secs(1)).await;
        assert!(!result.open);
        assert_eq!(result.error, Some(PortError::Refused));
    }
}
