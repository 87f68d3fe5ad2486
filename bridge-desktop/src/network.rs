//! Network Monitoring Implementation

use async_trait::async_trait;
use bridge_traits::{
    error::Result,
    network::{NetworkChangeStream, NetworkInfo, NetworkMonitor, NetworkStatus, NetworkType},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

const DEFAULT_PROBE_TARGET: &str = "1.1.1.1:53";

/// Desktop network monitor implementation
///
/// Detects connectivity by opening a TCP connection to a probe target, and
/// reports changes by polling. Platform notification APIs (netlink,
/// SystemConfiguration, Network List Manager) would react faster but need
/// per-OS dependencies.
#[derive(Clone)]
pub struct DesktopNetworkMonitor {
    probe_target: String,
    probe_timeout: Duration,
    poll_interval: Duration,
    cached_info: Arc<Mutex<Option<NetworkInfo>>>,
}

impl DesktopNetworkMonitor {
    /// Create a new network monitor
    pub fn new() -> Self {
        Self {
            probe_target: DEFAULT_PROBE_TARGET.to_string(),
            probe_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(5),
            cached_info: Arc::new(Mutex::new(None)),
        }
    }

    /// Probe `host:port` instead of the default public resolver
    pub fn with_probe_target(mut self, target: impl Into<String>) -> Self {
        self.probe_target = target.into();
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Last observed network info, if any probe has run
    pub async fn cached_info(&self) -> Option<NetworkInfo> {
        self.cached_info.lock().await.clone()
    }

    async fn check_connectivity(&self) -> NetworkStatus {
        match tokio::time::timeout(
            self.probe_timeout,
            tokio::net::TcpStream::connect(self.probe_target.as_str()),
        )
        .await
        {
            Ok(Ok(_)) => NetworkStatus::Connected,
            Ok(Err(_)) | Err(_) => NetworkStatus::Disconnected,
        }
    }
}

impl Default for DesktopNetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkMonitor for DesktopNetworkMonitor {
    async fn get_network_info(&self) -> Result<NetworkInfo> {
        let status = self.check_connectivity().await;

        let info = match status {
            // Desktop can't tell Ethernet from WiFi without platform APIs
            NetworkStatus::Connected => NetworkInfo::connected(Some(NetworkType::Other)),
            _ => NetworkInfo::disconnected(),
        };

        *self.cached_info.lock().await = Some(info.clone());
        debug!(status = ?status, "Network info updated");

        Ok(info)
    }

    async fn is_wifi(&self) -> bool {
        false
    }

    async fn is_metered(&self) -> bool {
        false
    }

    async fn subscribe_changes(&self) -> Result<Box<dyn NetworkChangeStream>> {
        Ok(Box::new(DesktopNetworkChangeStream {
            monitor: self.clone(),
            last_status: None,
        }))
    }
}

/// Network change stream that polls for changes
///
/// The first poll always yields; afterwards only status changes do.
struct DesktopNetworkChangeStream {
    monitor: DesktopNetworkMonitor,
    last_status: Option<NetworkStatus>,
}

#[async_trait]
impl NetworkChangeStream for DesktopNetworkChangeStream {
    async fn next(&mut self) -> Option<NetworkInfo> {
        loop {
            if self.last_status.is_some() {
                tokio::time::sleep(self.monitor.poll_interval).await;
            }

            if let Ok(info) = self.monitor.get_network_info().await {
                if self.last_status != Some(info.status) {
                    self.last_status = Some(info.status);
                    return Some(info);
                }
            }
        }
    }
}
