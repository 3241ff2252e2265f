//! Node errors

/// Errors that can occur while operating the node
#[derive(Debug)]
pub enum NodeError {
    /// Failed to start the node
    StartFailed(String),
    /// Database error
    Database(String),
    /// Network error talking to a peer
    Network(String),
    /// Error talking to the havend daemon
    Daemon(String),
    /// Node has not received its initial swarm map yet
    NotReady(String),
    /// Request belongs to a different swarm
    WrongSwarm(u64),
    /// Invalid input provided
    InvalidInput(String),
    /// Wire decoding error
    Wire(String),
    /// IO error
    Io(String),
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeError::StartFailed(e) => write!(f, "failed to start node: {}", e),
            NodeError::Database(e) => write!(f, "database error: {}", e),
            NodeError::Network(e) => write!(f, "network error: {}", e),
            NodeError::Daemon(e) => write!(f, "daemon error: {}", e),
            NodeError::NotReady(e) => write!(f, "node is not ready: {}", e),
            NodeError::WrongSwarm(id) => write!(f, "request belongs to swarm {}", id),
            NodeError::InvalidInput(e) => write!(f, "invalid input: {}", e),
            NodeError::Wire(e) => write!(f, "wire error: {}", e),
            NodeError::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for NodeError {}

impl From<std::io::Error> for NodeError {
    fn from(e: std::io::Error) -> Self {
        NodeError::Io(e.to_string())
    }
}

impl From<rusqlite::Error> for NodeError {
    fn from(e: rusqlite::Error) -> Self {
        NodeError::Database(e.to_string())
    }
}
