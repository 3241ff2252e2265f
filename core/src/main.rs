//! Haven storage server daemon
//!
//! Usage:
//!   haven-storage <ip> <port> [--data-dir DIR] [--stagenet] [--force-start]
//!
//! Keys are fetched from the local havend daemon at startup; the node then
//! serves the snode endpoints on the given address and keeps its swarm's
//! messages replicated in the background.

use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use haven_core::data;
use haven_core::logging::{self, LogBuffer};
use haven_core::network::daemon::{DaemonClient, DaemonRpc};
use haven_core::network::client::HttpSnodeClient;
use haven_core::network::server;
use haven_core::node::core::ServiceNode;
use haven_core::security::NodeKeys;
use haven_core::swarm::record::SnodeRecord;
use haven_core::{Network, NodeConfig};

const EXIT_INVALID_PORT: i32 = 2;

#[derive(Debug, Default)]
struct Options {
    ip: Option<String>,
    port: Option<u16>,
    data_dir: Option<PathBuf>,
    config_file: Option<PathBuf>,
    log_level: Option<String>,
    daemon_rpc_ip: Option<String>,
    daemon_rpc_port: Option<u16>,
    stagenet: bool,
    force_start: bool,
    print_version: bool,
    print_help: bool,
}

fn print_usage(binary: &str) {
    eprintln!("Usage: {} <ip> <port> [...]\n", binary);
    eprintln!("Options:");
    eprintln!("  --data-dir DIR          Path to persistent data (defaults to ~/.haven/storage)");
    eprintln!("  --config-file FILE      Path to custom config file (defaults to `storage-server.conf' inside --data-dir)");
    eprintln!("  --log-level LEVEL       Log verbosity: trace, debug, info, warn, error");
    eprintln!("  --havend-rpc-ip IP      RPC IP of the local havend (commonly localhost)");
    eprintln!("  --havend-rpc-port PORT  RPC port of the local havend");
    eprintln!("  --stagenet              Start in stagenet mode");
    eprintln!("  --force-start           Ignore the initialisation ready check");
    eprintln!("  --version, -v           Print the version of this binary");
    eprintln!("  --help                  Show this help message");
}

fn parse_args(args: &[String], options: &mut Options) -> Result<(), String> {
    let mut positional = Vec::new();
    let mut iter = args.iter().peekable();

    while let Some(arg) = iter.next() {
        let mut take_value = |name: &str| -> Result<String, String> {
            iter.next()
                .cloned()
                .ok_or_else(|| format!("missing value for {}", name))
        };

        match arg.as_str() {
            "--data-dir" => options.data_dir = Some(PathBuf::from(take_value("--data-dir")?)),
            "--config-file" => {
                options.config_file = Some(PathBuf::from(take_value("--config-file")?))
            }
            "--log-level" => options.log_level = Some(take_value("--log-level")?),
            "--havend-rpc-ip" => options.daemon_rpc_ip = Some(take_value("--havend-rpc-ip")?),
            "--havend-rpc-port" => {
                let value = take_value("--havend-rpc-port")?;
                options.daemon_rpc_port =
                    Some(value.parse().map_err(|_| format!("invalid port: {}", value))?);
            }
            "--stagenet" => options.stagenet = true,
            "--force-start" => options.force_start = true,
            "--version" | "-v" => options.print_version = true,
            "--help" => options.print_help = true,
            other if other.starts_with("--") => {
                return Err(format!("unknown option: {}", other));
            }
            other => positional.push(other.to_string()),
        }
    }

    if let Some(ip) = positional.first() {
        options.ip = Some(ip.clone());
    }
    if let Some(port) = positional.get(1) {
        options.port = Some(port.parse().map_err(|_| format!("invalid port: {}", port))?);
    }

    Ok(())
}

/// Apply `key=value` lines from the config file, for keys the command line
/// did not already set.
fn apply_config_file(path: &PathBuf, options: &mut Options) -> Result<(), String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read config file {}: {}", path.display(), e))?;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(format!("bad config line: {}", line));
        };
        let (key, value) = (key.trim(), value.trim());

        match key {
            "ip" if options.ip.is_none() => options.ip = Some(value.to_string()),
            "port" if options.port.is_none() => {
                options.port = Some(value.parse().map_err(|_| format!("invalid port: {}", value))?)
            }
            "log-level" if options.log_level.is_none() => {
                options.log_level = Some(value.to_string())
            }
            "havend-rpc-ip" if options.daemon_rpc_ip.is_none() => {
                options.daemon_rpc_ip = Some(value.to_string())
            }
            "havend-rpc-port" if options.daemon_rpc_port.is_none() => {
                options.daemon_rpc_port =
                    Some(value.parse().map_err(|_| format!("invalid port: {}", value))?)
            }
            "stagenet" => options.stagenet = options.stagenet || value == "1" || value == "true",
            "force-start" => {
                options.force_start = options.force_start || value == "1" || value == "true"
            }
            _ => {}
        }
    }

    Ok(())
}

/// Soft limit on open file descriptors, from /proc where available.
fn fd_limit() -> Option<u64> {
    let limits = std::fs::read_to_string("/proc/self/limits").ok()?;
    let line = limits.lines().find(|l| l.starts_with("Max open files"))?;
    line.split_whitespace().nth(3)?.parse().ok()
}

fn default_data_dir(stagenet: bool) -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    if stagenet {
        PathBuf::from(home).join(".haven").join("stagenet").join("storage")
    } else {
        PathBuf::from(home).join(".haven").join("storage")
    }
}

fn hex_to_key(hex_str: &str) -> Option<[u8; 32]> {
    hex::decode(hex_str).ok()?.try_into().ok()
}

/// Fetch the service node keys from havend, retrying until it answers.
/// The hex copies of the secrets are wiped once converted.
async fn wait_for_privkey(daemon: &DaemonClient) -> NodeKeys {
    use zeroize::Zeroize;

    loop {
        match daemon.get_service_node_privkey().await {
            Ok(mut response) => {
                let keys = hex_to_key(&response.legacy)
                    .zip(hex_to_key(&response.ed25519))
                    .zip(hex_to_key(&response.x25519));
                response.legacy.zeroize();
                response.ed25519.zeroize();
                response.x25519.zeroize();
                match keys {
                    Some(((legacy, ed25519), x25519)) => {
                        return NodeKeys::from_secrets(legacy, ed25519, x25519);
                    }
                    None => error!("havend returned malformed keys; retrying in 5s"),
                }
            }
            Err(e) => {
                error!(error = %e, "error retrieving service node key from havend; is havend running? retrying in 5s");
            }
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let binary = args
        .first()
        .map(|s| s.as_str())
        .unwrap_or("haven-storage")
        .to_string();

    let mut options = Options::default();
    if let Err(e) = parse_args(&args[1..], &mut options) {
        eprintln!("{}", e);
        print_usage(&binary);
        exit(1);
    }

    if options.print_help {
        print_usage(&binary);
        return;
    }

    if options.print_version {
        println!("Haven Storage Server v{}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let data_dir = options
        .data_dir
        .clone()
        .unwrap_or_else(|| default_data_dir(options.stagenet));

    // Config file defaults to storage-server.conf in the data dir; a
    // missing default is fine, an explicitly given path must exist.
    let config_file = options.config_file.clone();
    match &config_file {
        Some(path) => {
            if let Err(e) = apply_config_file(path, &mut options) {
                eprintln!("{}", e);
                exit(1);
            }
        }
        None => {
            let default_path = data_dir.join("storage-server.conf");
            if default_path.exists() {
                if let Err(e) = apply_config_file(&default_path, &mut options) {
                    eprintln!("{}", e);
                    exit(1);
                }
            }
        }
    }

    let (Some(ip), Some(port)) = (options.ip.clone(), options.port) else {
        eprintln!("Invalid option: address and/or port missing.");
        print_usage(&binary);
        exit(1);
    };

    let network = if options.stagenet {
        Network::Stagenet
    } else {
        Network::Mainnet
    };
    let daemon_rpc_ip = options
        .daemon_rpc_ip
        .clone()
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let daemon_rpc_port = options
        .daemon_rpc_port
        .unwrap_or_else(|| network.default_daemon_rpc_port());

    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        eprintln!("Could not create data directory {}: {}", data_dir.display(), e);
        exit(1);
    }

    let log_level = options.log_level.clone().unwrap_or_else(|| "info".to_string());
    let Some(level) = logging::parse_log_level(&log_level) else {
        eprintln!("Incorrect log level: {}", log_level);
        exit(1);
    };
    let log_buffer = LogBuffer::new();
    logging::init_logging(level, log_buffer.clone());

    info!("Haven Storage Server v{}", env!("CARGO_PKG_VERSION"));

    if options.stagenet {
        warn!("starting in stagenet mode, make sure it is intentional");
    }

    if ip == "127.0.0.1" {
        error!("tried to bind to localhost, please bind to an outward facing address");
        exit(1);
    }

    if port == daemon_rpc_port {
        error!("storage server port must be different from that of havend");
        exit(EXIT_INVALID_PORT);
    }

    match fd_limit() {
        Some(limit) => info!(limit, "open file descriptor limit"),
        None => info!("open file descriptor limit: N/A"),
    }

    info!(level = %log_level, "log level set");
    info!(dir = %data_dir.display(), "data directory");
    info!(ip = %daemon_rpc_ip, port = daemon_rpc_port, "havend RPC");
    info!(ip = %ip, port, "listening address");

    let daemon = DaemonClient::new(daemon_rpc_ip.clone(), daemon_rpc_port);

    info!("retrieving service node keys from havend");
    let keys = wait_for_privkey(&daemon).await;
    info!(
        pubkey = %hex::encode(keys.legacy_pubkey()),
        "retrieved keys; this is our service node pubkey"
    );

    let our_record = SnodeRecord::new(
        ip.clone(),
        port,
        keys.legacy_pubkey(),
        [0u8; 32],
        keys.ed25519_pubkey(),
    );

    let db_path = data_dir.join("storage.db");
    let db = match data::start_db(&db_path) {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, path = %db_path.display(), "could not open database");
            exit(1);
        }
    };

    let config = NodeConfig::new()
        .with_listen(ip, port)
        .with_data_dir(data_dir)
        .with_network(network)
        .with_daemon_rpc(daemon_rpc_ip, daemon_rpc_port)
        .with_force_start(options.force_start);

    let snode_client = HttpSnodeClient::new(keys.clone(), our_record.address().to_string());
    let node = Arc::new(ServiceNode::new(
        config,
        keys,
        our_record,
        db,
        Arc::new(daemon),
        Arc::new(snode_client),
    ));

    ServiceNode::spawn_background_tasks(&node);

    let server_node = node.clone();
    let server = tokio::spawn(server::run_server(server_node, log_buffer));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
        result = server => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(error = %e, "server failed");
                    node.stop().await;
                    exit(1);
                }
                Err(e) => {
                    error!(error = %e, "server task panicked");
                    exit(1);
                }
            }
        }
    }

    node.stop().await;
}
