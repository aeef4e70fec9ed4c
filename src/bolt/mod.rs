//! # Bolt Collaborator Contracts
//!
//! The pieces of the Bolt protocol the connection core depends on.
//!
//! ## Overview
//!
//! Binary framing and value encoding live outside this crate. This module
//! defines only what the pool, discovery and retry layers need:
//!
//! - **Messages** - the requests the core issues (ROUTE, RESET, GOODBYE) and
//!   the four response kinds a server can answer with
//! - **Pipeline** - strict FIFO dispatch of responses to pending requests
//! - **Connection** - the transport trait a codec implementation provides
//!
//! ## Submodules
//!
//! - [`message`] - Request/response message types
//! - [`pipeline`] - Per-connection response pipeline
//! - [`connection`] - `Connection` and `Connector` traits

pub mod connection;
pub mod message;
pub mod pipeline;

pub use connection::{Connection, Connector};
pub use message::{Metadata, Request, Response};
pub use pipeline::{PendingResponse, ResponsePipeline, ResponseSummary};
