//! Per-connection response pipeline.
//!
//! Requests on one connection are answered strictly in order. Every request
//! enqueues one pending handler; SUCCESS, FAILURE and IGNORED complete (dequeue)
//! the oldest handler while RECORD only peeks at it.

use std::collections::VecDeque;

use serde_json::Value;
use tokio::sync::oneshot;

use super::message::{Metadata, Request, Response};
use crate::driver::{DriverError, DriverResult, ServerError};

/// Outcome of one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseSummary {
    /// Metadata from the SUCCESS message
    pub metadata: Metadata,
    /// Records streamed before the summary
    pub records: Vec<Vec<Value>>,
    /// The server ignored the request
    pub ignored: bool,
}

/// Handle to a request whose response has not arrived yet.
#[derive(Debug)]
pub struct PendingResponse {
    rx: oneshot::Receiver<DriverResult<ResponseSummary>>,
}

impl PendingResponse {
    /// Wait for the response.
    pub async fn wait(self) -> DriverResult<ResponseSummary> {
        self.rx
            .await
            .map_err(|_| DriverError::session_expired("Connection closed before response arrived"))?
    }
}

struct PendingHandler {
    request: &'static str,
    records: Vec<Vec<Value>>,
    tx: oneshot::Sender<DriverResult<ResponseSummary>>,
}

/// FIFO queue of pending response handlers for one connection.
#[derive(Default)]
pub struct ResponsePipeline {
    handlers: VecDeque<PendingHandler>,
    error: Option<ServerError>,
    broken: Option<String>,
}

impl ResponsePipeline {
    /// Create an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a request that is about to be written.
    pub fn enqueue(&mut self, request: &Request) -> DriverResult<PendingResponse> {
        if let Some(reason) = &self.broken {
            return Err(DriverError::protocol(reason.clone()));
        }
        let (tx, rx) = oneshot::channel();
        self.handlers.push_back(PendingHandler {
            request: request.name(),
            records: Vec::new(),
            tx,
        });
        Ok(PendingResponse { rx })
    }

    /// Dispatch one message read from the connection.
    ///
    /// A message with no pending handler is a protocol violation: the pipeline
    /// is marked broken and the connection must be torn down.
    pub fn on_message(&mut self, response: Response) -> DriverResult<()> {
        tracing::trace!(message = response.name(), "S: message");

        if let Response::Record(fields) = response {
            return match self.handlers.front_mut() {
                Some(handler) => {
                    handler.records.push(fields);
                    Ok(())
                }
                None => Err(self.violation("RECORD received with no pending request")),
            };
        }

        let Some(handler) = self.handlers.pop_front() else {
            return Err(self.violation(format!("{} received with no pending request", response.name())));
        };

        let outcome = match response {
            Response::Success(metadata) => {
                if handler.request == "RESET" {
                    self.error = None;
                }
                Ok(ResponseSummary {
                    metadata,
                    records: handler.records,
                    ignored: false,
                })
            }
            Response::Failure { code, message } => {
                let err = ServerError::new(code, message);
                self.error = Some(err.clone());
                Err(DriverError::from_server(err))
            }
            Response::Ignored => match &self.error {
                Some(err) => Err(DriverError::from_server(err.clone())),
                None => Ok(ResponseSummary {
                    ignored: true,
                    ..Default::default()
                }),
            },
            Response::Record(_) => unreachable!("records are handled above"),
        };

        // 수신자가 이미 포기한 경우 무시
        let _ = handler.tx.send(outcome);
        Ok(())
    }

    /// Fail every pending handler, e.g. when the socket dies.
    pub fn fail_all(&mut self, reason: &str) {
        for handler in self.handlers.drain(..) {
            let _ = handler
                .tx
                .send(Err(DriverError::session_expired(reason.to_string())));
        }
    }

    /// Number of requests still waiting for a summary.
    pub fn pending(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no responses are outstanding.
    pub fn is_idle(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Whether a protocol violation was detected.
    pub fn is_broken(&self) -> bool {
        self.broken.is_some()
    }

    /// Last FAILURE seen since the previous RESET.
    pub fn last_failure(&self) -> Option<&ServerError> {
        self.error.as_ref()
    }

    fn violation(&mut self, reason: impl Into<String>) -> DriverError {
        let reason = reason.into();
        tracing::warn!(%reason, "protocol violation, tearing down connection");
        self.broken = Some(reason.clone());
        self.fail_all(&reason);
        DriverError::protocol(reason)
    }
}

impl std::fmt::Debug for ResponsePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponsePipeline")
            .field("pending", &self.handlers.len())
            .field("failed", &self.error.is_some())
            .field("broken", &self.broken)
            .finish()
    }
}
