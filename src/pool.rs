//! Remote connection pool: one live connection per `(protocol, host,
//! port)` endpoint, created lazily and kept for the process lifetime.
//!
//! Connections are never closed by this layer (`spec.md` §5) — they
//! outlive every VFD that references them, so the pool hands out shared,
//! reference-counted handles rather than ones the cache could drop.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;

use crate::backend::remote::{RemoteFs, RemoteFsConnector};

/// A `(protocol, host, port)` triple identifying one remote connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub protocol: String,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(protocol: &str, host: &str, port: u16) -> Self {
        Endpoint { protocol: protocol.to_owned(), host: host.to_owned(), port }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol, self.host, self.port)
    }
}

/// Process-lifetime pool of remote connections.
pub struct ConnectionPool {
    connector: Box<dyn RemoteFsConnector>,
    connections: HashMap<Endpoint, Arc<dyn RemoteFs>>,
}

impl ConnectionPool {
    pub fn new(connector: Box<dyn RemoteFsConnector>) -> Self {
        ConnectionPool { connector, connections: HashMap::new() }
    }

    /// Returns the connection for `endpoint`, creating it on first use.
    pub fn get_or_connect(&mut self, endpoint: &Endpoint) -> io::Result<Arc<dyn RemoteFs>> {
        if let Some(connection) = self.connections.get(endpoint) {
            return Ok(connection.clone());
        }
        let connection: Arc<dyn RemoteFs> =
            Arc::from(self.connector.connect(&endpoint.protocol, &endpoint.host, endpoint.port)?);
        self.connections.insert(endpoint.clone(), connection.clone());
        Ok(connection)
    }

    /// Number of distinct endpoints currently connected — exposed for
    /// tests and diagnostics only.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
