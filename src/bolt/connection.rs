//! Transport contracts required by the connection core.
//!
//! A [`Connection`] is one authenticated socket speaking Bolt. The driver never
//! looks at bytes: it sends [`Request`]s and waits on the returned
//! [`PendingResponse`]. A [`Connector`] opens new connections for the pool.

use async_trait::async_trait;

use super::message::Request;
use super::pipeline::PendingResponse;
use crate::driver::{AuthToken, DriverResult, ServerAddress};

/// One open Bolt connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Server this connection talks to.
    fn server_address(&self) -> &ServerAddress;

    /// Whether the underlying transport is still usable.
    fn is_open(&self) -> bool;

    /// Write a request and register a handler for its response.
    ///
    /// Responses are delivered in request order.
    async fn send_and_receive(&mut self, request: Request) -> DriverResult<PendingResponse>;

    /// Close the transport. Closing twice is a no-op.
    async fn close(&mut self) -> DriverResult<()>;
}

/// Opens and authenticates new connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `address` and authenticate with `auth`.
    async fn connect(
        &self,
        address: &ServerAddress,
        auth: &AuthToken,
    ) -> DriverResult<Box<dyn Connection>>;
}
