//! Health probes for the services running inside the VM.
//!
//! The VM publishes two ports to the host: the CPI daemon and the network
//! forwarder's management API. A probe only asks whether the endpoint is
//! reachable within its own timeout; the services' protocols are not spoken.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::error::{BltError, BltResult};

#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Succeeds when the service is reachable and responsive.
    async fn ping(&self) -> BltResult<()>;
}

/// TCP reachability check bounded by a connect timeout.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    name: &'static str,
    addr: SocketAddr,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(name: &'static str, addr: SocketAddr, timeout: Duration) -> Self {
        Self { name, addr, timeout }
    }

    fn failure(&self, reason: impl Into<String>) -> BltError {
        BltError::Probe {
            name: self.name,
            addr: self.addr.to_string(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl HealthProbe for TcpProbe {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn ping(&self) -> BltResult<()> {
        match tokio::time::timeout(self.timeout, TcpStream::connect(self.addr)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(self.failure(e.to_string())),
            Err(_) => Err(self.failure(format!("no answer within {:?}", self.timeout))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn reachable_endpoint_succeeds() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let probe = TcpProbe::new("cpi", listener.local_addr().unwrap(), Duration::from_secs(1));
        probe.ping().await.expect("listener accepts connections");
    }

    #[tokio::test]
    async fn closed_port_fails_with_named_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = TcpProbe::new("forwarder", addr, Duration::from_secs(1));
        let err = probe.ping().await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("forwarder"), "got: {msg}");
        assert!(msg.contains(&addr.to_string()), "got: {msg}");
    }
}
