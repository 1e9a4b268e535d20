//! # Client Facade and Configuration
//!
//! Purpose: Tie configuration, the TCP connector and the connection pool
//! together behind one handle the session layer can share.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Client` hides pool construction and connector wiring.
//! 2. **Lazy Connect**: Nothing touches the network until the first rent.
//! 3. **Validated Config**: Bad settings fail at construction, not mid-query.
//! 4. **Classified Errors**: Every error maps onto usage, capacity or resource.

use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use chw_buffer::{DEFAULT_MAX_CACHED_SEGMENTS, DEFAULT_SEGMENT_SIZE};
use chw_common::{AsciiCaseInsensitive, ChwError, ErrorClass, IndexedCollection};

use crate::connection::TcpConnector;
use crate::pool::{
    ConnectionPool, PoolConfig, PoolStatus, PooledConnection, ReturnOutcome,
    DEFAULT_MAX_POOL_SIZE,
};

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Session settings keyed by name, ignoring ASCII case.
pub type SessionSettings = IndexedCollection<String, String, AsciiCaseInsensitive>;

/// Errors surfaced by the client, its pool and its connections.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or IO failure while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Address could not be parsed into a socket address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Configuration JSON could not be parsed.
    #[error("config parse error: {0}")]
    Config(#[from] serde_json::Error),
    /// Opening a connection took longer than the configured timeout.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    /// Pool is at capacity and no idle connections are available.
    #[error("connection pool exhausted ({max_pool_size} connections in use)")]
    PoolExhausted { max_pool_size: usize },
    /// The pool was disposed.
    #[error("connection pool has been disposed")]
    PoolDisposed,
    /// A lease was handed back to a pool that did not issue it.
    #[error("connection was not rented from this pool")]
    ForeignConnection,
    /// The peer closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,
    /// Buffer or collection contract violation.
    #[error(transparent)]
    Buffer(#[from] ChwError),
}

impl ClientError {
    /// Returns the taxonomy bucket of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            ClientError::PoolExhausted { .. } => ErrorClass::Capacity,
            ClientError::Io(_) | ClientError::ConnectTimeout(_) | ClientError::ConnectionClosed => {
                ErrorClass::Resource
            }
            ClientError::InvalidAddress(_)
            | ClientError::InvalidConfig(_)
            | ClientError::Config(_)
            | ClientError::PoolDisposed
            | ClientError::ForeignConnection => ErrorClass::Usage,
            ClientError::Buffer(err) => err.class(),
        }
    }
}

/// One named session setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setting {
    pub name: String,
    pub value: String,
}

/// Configuration for the client and its pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address, e.g. "127.0.0.1:9000".
    pub addr: String,
    /// Maximum total connections (idle + in-use).
    pub max_pool_size: usize,
    /// Segment size of connection staging buffers.
    pub segment_size: usize,
    /// Free segments kept for reuse across connections.
    pub max_cached_segments: usize,
    /// Optional TCP connect timeout in milliseconds.
    pub connect_timeout_ms: Option<u64>,
    /// Optional per-read timeout in milliseconds.
    pub read_timeout_ms: Option<u64>,
    /// Optional per-send timeout in milliseconds.
    pub write_timeout_ms: Option<u64>,
    /// Disable Nagle's algorithm on connections.
    pub nodelay: bool,
    /// Ordered session settings; names must be unique ignoring ASCII case.
    pub settings: Vec<Setting>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addr: "127.0.0.1:9000".to_string(),
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            segment_size: DEFAULT_SEGMENT_SIZE,
            max_cached_segments: DEFAULT_MAX_CACHED_SEGMENTS,
            connect_timeout_ms: None,
            read_timeout_ms: None,
            write_timeout_ms: None,
            nodelay: true,
            settings: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> ClientResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> ClientResult<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Checks limits, the address and setting names.
    pub fn validate(&self) -> ClientResult<()> {
        if self.max_pool_size == 0 {
            return Err(ClientError::InvalidConfig(
                "max_pool_size must be greater than zero".to_string(),
            ));
        }
        if self.segment_size == 0 {
            return Err(ClientError::InvalidConfig(
                "segment_size must be greater than zero".to_string(),
            ));
        }
        self.socket_addr()?;
        self.session_settings()?;
        Ok(())
    }

    /// Parses `addr`.
    pub fn socket_addr(&self) -> ClientResult<SocketAddr> {
        self.addr
            .parse()
            .map_err(|_| ClientError::InvalidAddress(self.addr.clone()))
    }

    /// Builds the settings collection, rejecting duplicate names.
    pub fn session_settings(&self) -> ClientResult<SessionSettings> {
        let mut settings =
            SessionSettings::with_capacity_and_comparer(self.settings.len(), AsciiCaseInsensitive);
        for setting in &self.settings {
            if settings
                .push(setting.name.clone(), setting.value.clone())
                .is_err()
            {
                return Err(ClientError::InvalidConfig(format!(
                    "duplicate setting: {}",
                    setting.name
                )));
            }
        }
        Ok(settings)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_ms.map(Duration::from_millis)
    }
}

/// Pooled client handle.
///
/// Cloning shares the pool.
#[derive(Clone, Debug)]
pub struct Client {
    pool: ConnectionPool<TcpConnector>,
}

impl Client {
    /// Creates a client with default configuration for `addr`.
    pub fn connect(addr: impl Into<String>) -> ClientResult<Self> {
        let config = ClientConfig {
            addr: addr.into(),
            ..ClientConfig::default()
        };
        Self::with_config(config)
    }

    /// Creates a client with a custom configuration.
    pub fn with_config(config: ClientConfig) -> ClientResult<Self> {
        config.validate()?;
        let pool_config = PoolConfig {
            max_pool_size: config.max_pool_size,
        };
        let connector = TcpConnector::new(config)?;
        let pool = ConnectionPool::new(pool_config, connector)?;
        Ok(Client { pool })
    }

    /// Rents a connection from the pool.
    pub async fn rent(&self) -> ClientResult<PooledConnection<TcpConnector>> {
        self.pool.rent().await
    }

    /// Hands a connection back explicitly.
    pub fn give_back(
        &self,
        conn: PooledConnection<TcpConnector>,
    ) -> ClientResult<ReturnOutcome> {
        self.pool.give_back(conn)
    }

    /// Current pool occupancy.
    pub fn status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Closes idle connections and refuses further rents.
    pub fn dispose(&self) {
        self.pool.dispose();
    }

    /// Validated session settings shared by every connection.
    pub fn settings(&self) -> &SessionSettings {
        self.pool.manager().settings()
    }

    /// The underlying pool.
    pub fn pool(&self) -> &ConnectionPool<TcpConnector> {
        &self.pool
    }
}
