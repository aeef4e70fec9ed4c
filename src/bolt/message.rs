//! Bolt request and response messages as seen by the connection core.
//!
//! Encoding these onto the wire is the transport's job; the core only
//! needs to know which request it sent and which kind of response came back.

use std::collections::HashMap;

use bytes::Bytes;
use serde_json::Value;

/// Response metadata carried by SUCCESS messages.
pub type Metadata = serde_json::Map<String, Value>;

/// Requests the core sends to a server.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// ROUTE - ask a router for the routing table of a database
    Route {
        /// Routing context from the driver URI
        routing_context: HashMap<String, String>,
        /// Bookmarks the table must reflect
        bookmarks: Vec<String>,
        /// Target database (`None` = home/default database)
        database: Option<String>,
        /// User to impersonate
        impersonated_user: Option<String>,
    },
    /// RESET - return the connection to a clean state
    Reset,
    /// GOODBYE - polite close
    Goodbye,
    /// Any other request, already encoded by the codec layer
    Encoded {
        /// Message name for logging
        name: &'static str,
        /// Encoded message body
        payload: Bytes,
    },
}

impl Request {
    /// Build a ROUTE request.
    pub fn route(
        routing_context: HashMap<String, String>,
        bookmarks: Vec<String>,
        database: Option<String>,
        impersonated_user: Option<String>,
    ) -> Self {
        Request::Route {
            routing_context,
            bookmarks,
            database,
            impersonated_user,
        }
    }

    /// Get message name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Route { .. } => "ROUTE",
            Request::Reset => "RESET",
            Request::Goodbye => "GOODBYE",
            Request::Encoded { name, .. } => name,
        }
    }
}

/// All Bolt response messages.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// SUCCESS - Operation completed successfully
    Success(Metadata),
    /// RECORD - Query result record
    Record(Vec<Value>),
    /// FAILURE - Operation failed
    Failure {
        /// Server error code
        code: String,
        /// Server error message
        message: String,
    },
    /// IGNORED - Message was ignored (connection in FAILED state)
    Ignored,
}

impl Response {
    /// Build a FAILURE response.
    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Response::Failure {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Get message name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Response::Success(_) => "SUCCESS",
            Response::Record(_) => "RECORD",
            Response::Failure { .. } => "FAILURE",
            Response::Ignored => "IGNORED",
        }
    }

    /// Whether this message completes the current request.
    pub fn is_summary(&self) -> bool {
        !matches!(self, Response::Record(_))
    }
}
