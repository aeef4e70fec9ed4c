//! # boltnet
//!
//! The connection core of a Bolt graph-database driver: connection pooling,
//! cluster routing, retries and authentication-token management.
//!
//! ## Features
//!
//! - **Connection Pooling** - Per-address pools with acquisition timeouts,
//!   lifetime/idle validation, warm-up and metrics
//! - **Cluster Routing** - Per-database routing tables discovered from routers,
//!   refreshed single-flight, with round-robin or least-connected selection
//! - **Retries** - Exponential backoff with jitter for transient failures and
//!   leadership changes
//! - **Authentication** - Static or expiring tokens with refresh on security errors
//! - **Async/Await** - Built on Tokio, with a blocking facade for synchronous callers
//!
//! Binary framing and value encoding are not part of this crate. A codec plugs in
//! through the [`bolt::Connector`] and [`bolt::Connection`] traits.
//!
//! ## Basic Usage
//!
//! ```rust,ignore
//! use boltnet::{AuthToken, Driver, ExecuteConfig};
//! use futures::FutureExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let driver = Driver::new(
//!         "neo4j://localhost:7687",
//!         AuthToken::basic("neo4j", "password"),
//!         my_codec::connector(),
//!     )?;
//!
//!     driver.verify_connectivity().await?;
//!
//!     let address = driver
//!         .execute(&ExecuteConfig::read(), |conn| {
//!             async move { Ok(conn.address().clone()) }.boxed()
//!         })
//!         .await?;
//!     println!("served by {}", address);
//!
//!     driver.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! Customize driver behavior with [`DriverConfig`]:
//!
//! ```rust
//! use boltnet::{AuthToken, DriverConfig, RoutingPolicy};
//! use std::time::Duration;
//!
//! let config = DriverConfig::builder("neo4j://localhost:7687", AuthToken::basic("u", "p"))
//!     .unwrap()
//!     .with_max_connection_pool_size(50)
//!     .with_connection_acquisition_timeout(Duration::from_secs(10))
//!     .with_routing_policy(RoutingPolicy::LeastConnected)
//!     .build();
//! assert!(config.validate().is_ok());
//! ```
//!
//! ## Authentication
//!
//! ```rust
//! use boltnet::AuthToken;
//!
//! let auth = AuthToken::basic("username", "password");
//! let auth = AuthToken::bearer("my-token");
//! let auth = AuthToken::none();
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`DriverResult`]. [`classify`] tells whether an error
//! is worth retrying:
//!
//! ```rust
//! use boltnet::{classify, DriverError, ErrorKind};
//!
//! let err = DriverError::session_expired("leader switched");
//! assert_eq!(classify(&err), ErrorKind::Retryable);
//! ```
//!
//! ## Modules
//!
//! - [`driver`] - Pool, routing, retry, auth and the driver context
//! - [`bolt`] - Contracts for the Bolt wire layer
//!

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod bolt;
pub mod driver;

// Re-exports for convenience
pub use driver::{
    classify, AccessMode, AuthToken, AuthTokenManager, BlockingDriver, Bookmark, Driver,
    DriverConfig, DriverConfigBuilder, DriverError, DriverMetrics, DriverResult, ErrorKind,
    ExecuteConfig, RetryConfig, RoutedConnection, RoutingPolicy, ServerAddress,
};

pub use bolt::{Connection, Connector, Request, Response};

/// Config alias for convenience
pub type Config = DriverConfig;
