//! Host name resolution on the tokio runtime

use super::{EventSender, Resolver, TransportError};
use std::net::IpAddr;
use tokio::runtime::Handle;
use tracing::debug;

/// [`Resolver`] that looks names up with `tokio::net::lookup_host`
#[derive(Debug, Clone)]
pub struct TokioResolver {
    runtime: Handle,
}

impl TokioResolver {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    pub fn from_current() -> Result<Self, TransportError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    /// Resolve `host` to its first address
    pub async fn lookup(host: &str) -> Result<IpAddr, String> {
        // lookup_host wants a port; it is discarded
        let mut addrs = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|e| e.to_string())?;
        addrs
            .next()
            .map(|addr| addr.ip())
            .ok_or_else(|| format!("no addresses for {host}"))
    }
}

impl Resolver for TokioResolver {
    fn resolve(&mut self, host: &str, events: &EventSender) {
        let host = host.to_string();
        let events = events.clone();
        self.runtime.spawn(async move {
            match Self::lookup(&host).await {
                Ok(ip) => {
                    debug!(target: "mqtt_transport", %host, %ip, "DNS lookup finished");
                    events.resolved(ip);
                }
                Err(reason) => events.resolution_failed(reason),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{event_channel, SessionEvent};

    #[tokio::test]
    async fn test_lookup_localhost() {
        let ip = TokioResolver::lookup("localhost").await.unwrap();
        assert!(ip.is_loopback());
    }

    #[tokio::test]
    async fn test_resolve_delivers_event() {
        let (sender, mut rx) = event_channel();
        let mut resolver = TokioResolver::from_current().unwrap();
        resolver.resolve("127.0.0.1", &sender);

        match rx.recv().await {
            Some(SessionEvent::Resolved(ip)) => assert!(ip.is_loopback()),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_host_fails() {
        let result = TokioResolver::lookup("does-not-exist.invalid").await;
        assert!(result.is_err());
    }
}
