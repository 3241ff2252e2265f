//! Node configuration

use std::path::PathBuf;

use super::types::Network;

/// Configuration for a storage server node
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Address to listen on
    pub ip: String,
    /// Port to listen on
    pub port: u16,
    /// Persistent data directory (database, certificates)
    pub data_dir: PathBuf,
    /// Mainnet or stagenet
    pub network: Network,
    /// havend JSON-RPC address
    pub daemon_rpc_ip: String,
    /// havend JSON-RPC port
    pub daemon_rpc_port: u16,
    /// Serve requests before the first swarm map arrives
    pub force_start: bool,

    /// Peer-exchange base period in milliseconds (jittered ±25%)
    /// Default: 1000
    pub gossip_interval_ms: u64,
    /// Daemon poll period in seconds
    /// Default: 10
    pub daemon_poll_interval_secs: u64,
    /// Expiry sweep period in seconds
    /// Default: 10
    pub cleanup_interval_secs: u64,
    /// Reachability re-test period in seconds
    /// Default: 30
    pub reachability_interval_secs: u64,

    /// Messages per push batch; larger deltas continue on the next tick
    /// Default: 500
    pub batch_max_messages: usize,
    /// Bootstrap targets per new swarm, lowest pubkeys first
    /// Default: 3
    pub bootstrap_targets: usize,

    /// Storage test retry period in milliseconds
    pub storage_test_retry_ms: u64,
    /// Storage test gives up after this many seconds of elapsed time
    pub storage_test_window_secs: u64,
    /// Long-poll wait cap in seconds
    pub long_poll_timeout_secs: u64,
    /// Per-connection session deadline in seconds
    pub session_deadline_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            ip: "0.0.0.0".to_string(),
            port: 22020,
            data_dir: PathBuf::from("."),
            network: Network::Mainnet,
            daemon_rpc_ip: "127.0.0.1".to_string(),
            daemon_rpc_port: Network::Mainnet.default_daemon_rpc_port(),
            force_start: false,
            gossip_interval_ms: 1000,
            daemon_poll_interval_secs: 10,
            cleanup_interval_secs: 10,
            reachability_interval_secs: 30,
            batch_max_messages: 500,
            bootstrap_targets: 3,
            storage_test_retry_ms: 50,
            storage_test_window_secs: 60,
            long_poll_timeout_secs: 20,
            session_deadline_secs: 60,
        }
    }
}

impl NodeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listen(mut self, ip: String, port: u16) -> Self {
        self.ip = ip;
        self.port = port;
        self
    }

    pub fn with_data_dir(mut self, dir: PathBuf) -> Self {
        self.data_dir = dir;
        self
    }

    pub fn with_network(mut self, network: Network) -> Self {
        self.network = network;
        self.daemon_rpc_port = network.default_daemon_rpc_port();
        self
    }

    pub fn with_daemon_rpc(mut self, ip: String, port: u16) -> Self {
        self.daemon_rpc_ip = ip;
        self.daemon_rpc_port = port;
        self
    }

    pub fn with_force_start(mut self, force: bool) -> Self {
        self.force_start = force;
        self
    }

    /// Configuration for testing (fast intervals, tiny batches)
    pub fn for_testing() -> Self {
        Self {
            gossip_interval_ms: 50,
            daemon_poll_interval_secs: 1,
            cleanup_interval_secs: 1,
            reachability_interval_secs: 1,
            batch_max_messages: 10,
            storage_test_retry_ms: 5,
            storage_test_window_secs: 2,
            long_poll_timeout_secs: 2,
            session_deadline_secs: 5,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.gossip_interval_ms, 1000);
        assert_eq!(config.daemon_poll_interval_secs, 10);
        assert_eq!(config.cleanup_interval_secs, 10);
        assert_eq!(config.bootstrap_targets, 3);
        assert_eq!(config.long_poll_timeout_secs, 20);
        assert_eq!(config.session_deadline_secs, 60);
        assert!(!config.force_start);
    }

    #[test]
    fn test_network_switch_updates_daemon_port() {
        let config = NodeConfig::new().with_network(Network::Stagenet);
        assert_eq!(config.daemon_rpc_port, 39994);
    }

    #[test]
    fn test_explicit_daemon_rpc_wins() {
        let config = NodeConfig::new()
            .with_network(Network::Stagenet)
            .with_daemon_rpc("10.0.0.1".into(), 12345);
        assert_eq!(config.daemon_rpc_port, 12345);
        assert_eq!(config.daemon_rpc_ip, "10.0.0.1");
    }

    #[test]
    fn test_testing_config_is_fast() {
        let config = NodeConfig::for_testing();
        assert!(config.gossip_interval_ms <= 100);
        assert!(config.storage_test_window_secs <= 5);
    }
}
