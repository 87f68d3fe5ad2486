//! Network Monitoring Abstraction
//!
//! Provides network connectivity and status information.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Network connection type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkType {
    /// Cellular/mobile data connection
    Cellular,
    /// WiFi connection
    WiFi,
    /// Ethernet connection
    Ethernet,
    /// Other or unknown connection type
    Other,
}

/// Network connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkStatus {
    /// Connected to network
    Connected,
    /// Not connected to any network
    Disconnected,
    /// Connection status unknown or indeterminate
    Indeterminate,
}

/// Network information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub status: NetworkStatus,
    pub network_type: Option<NetworkType>,
    /// Whether the connection is metered (has data limits/costs)
    pub is_metered: bool,
    /// Whether the connection is considered expensive by the OS
    pub is_expensive: bool,
}

impl NetworkInfo {
    pub fn connected(network_type: Option<NetworkType>) -> Self {
        Self {
            status: NetworkStatus::Connected,
            network_type,
            is_metered: false,
            is_expensive: false,
        }
    }

    pub fn disconnected() -> Self {
        Self {
            status: NetworkStatus::Disconnected,
            network_type: None,
            is_metered: false,
            is_expensive: false,
        }
    }

    /// Collapses the status into the two signals the playback core reacts to.
    ///
    /// `Indeterminate` yields `None`.
    pub fn change_event(&self) -> Option<NetworkEvent> {
        match self.status {
            NetworkStatus::Connected => Some(NetworkEvent::Available),
            NetworkStatus::Disconnected => Some(NetworkEvent::Lost),
            NetworkStatus::Indeterminate => None,
        }
    }
}

/// Connectivity transition delivered to the connection selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkEvent {
    Available,
    Lost,
}

/// Network monitor trait
///
/// Provides network connectivity information to allow the core to:
/// - Re-run server connection selection when the network comes back
/// - Mark the server connection lost when the network drops
/// - Refresh cached stream URLs after a network change
///
/// # Platform Support
///
/// - **Desktop**: System network APIs (NetworkManager, SystemConfiguration, Windows Network List Manager)
/// - **iOS**: Network framework, Reachability
/// - **Android**: ConnectivityManager
/// - **Web**: Navigator.onLine + Network Information API (limited)
///
/// # Example
///
/// ```ignore
/// use bridge_traits::network::NetworkMonitor;
///
/// async fn should_prefetch(monitor: &dyn NetworkMonitor) -> bool {
///     match monitor.get_network_info().await {
///         Ok(info) => info.status == NetworkStatus::Connected && !info.is_metered,
///         Err(_) => false,
///     }
/// }
/// ```
#[async_trait]
pub trait NetworkMonitor: Send + Sync {
    /// Get current network information
    async fn get_network_info(&self) -> Result<NetworkInfo>;

    /// Check if currently connected to any network
    async fn is_connected(&self) -> bool {
        matches!(
            self.get_network_info().await,
            Ok(NetworkInfo {
                status: NetworkStatus::Connected,
                ..
            })
        )
    }

    /// Check if connected via WiFi
    async fn is_wifi(&self) -> bool {
        matches!(
            self.get_network_info().await,
            Ok(NetworkInfo {
                status: NetworkStatus::Connected,
                network_type: Some(NetworkType::WiFi),
                ..
            })
        )
    }

    /// Check if connection is metered
    async fn is_metered(&self) -> bool {
        matches!(
            self.get_network_info().await,
            Ok(NetworkInfo {
                is_metered: true,
                ..
            })
        )
    }

    /// Subscribe to network status changes
    ///
    /// Returns a stream of network info updates. Implementations should
    /// emit an event whenever network status changes.
    async fn subscribe_changes(&self) -> Result<Box<dyn NetworkChangeStream>>;
}

/// Stream of network status changes
#[async_trait]
pub trait NetworkChangeStream: Send {
    /// Get the next network info update
    ///
    /// Returns `None` when the stream is closed.
    async fn next(&mut self) -> Option<NetworkInfo>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_info() {
        let info = NetworkInfo {
            status: NetworkStatus::Connected,
            network_type: Some(NetworkType::WiFi),
            is_metered: false,
            is_expensive: false,
        };

        assert_eq!(info.status, NetworkStatus::Connected);
        assert_eq!(info.network_type, Some(NetworkType::WiFi));
        assert!(!info.is_metered);
    }

    #[test]
    fn test_change_event_mapping() {
        assert_eq!(
            NetworkInfo::connected(None).change_event(),
            Some(NetworkEvent::Available)
        );
        assert_eq!(
            NetworkInfo::disconnected().change_event(),
            Some(NetworkEvent::Lost)
        );

        let unknown = NetworkInfo {
            status: NetworkStatus::Indeterminate,
            ..NetworkInfo::disconnected()
        };
        assert_eq!(unknown.change_event(), None);
    }
}
