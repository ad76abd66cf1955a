//! Shared connection pools and their lifecycle
//!
//! Pools are keyed by [`SiteConnectionConfig`] in a [`ConnectionManagerCache`].
//! Each pool is owned by a reference-counted [`ConnectionManagerTracker`] and
//! handed to clients behind a [`CloseBlockingConnectionManager`], so closing a
//! client never destroys a pool other clients still use.

pub mod cache;
pub mod close_blocking;
pub mod connection;
pub mod error;
pub mod manager;
pub mod route;
pub mod site_connection_config;
pub mod tracked_client;
pub mod tracker;
pub mod tunnel;

pub use cache::{ConnectionManagerCache, ManagerFactory};
pub use close_blocking::CloseBlockingConnectionManager;
pub use connection::ManagedConnection;
pub use error::PoolError;
pub use manager::{
    ConnectionManager, PoolConfig, PoolStats, PoolingConnectionManager, DEFAULT_MAX_PER_ROUTE,
};
pub use route::{HttpHost, HttpRoute};
pub use site_connection_config::SiteConnectionConfig;
pub use tracked_client::TrackedHttpClient;
pub use tracker::ConnectionManagerTracker;
pub use tunnel::establish_tunnel;
