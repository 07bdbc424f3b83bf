//! Transport-independent request dispatch
//!
//! A server decodes each client or coordinator message into a [`Request`],
//! hands it to [`RequestHandler::handle`], and encodes the [`Response`].
//! Without two-phase commit PUT and DEL are applied directly; with it they are
//! prepared and answered with a vote, and COMMIT / ABORT finish them.

use crate::coordinator::StoreCoordinator;
use crate::store::DurableStore;
use crate::tpc::TransactionLog;
use bytes::Bytes;
use shardkv_common::error::{ERRMSG_INVALID_REQUEST, MSG_SUCCESS};
use shardkv_common::{Error, Key};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A decoded request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    Get { key: Key },
    Put { key: Key, value: Bytes },
    Del { key: Key },
    Commit,
    Abort,
    Info,
}

impl Request {
    /// Short name for logging
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Get { .. } => "get",
            Self::Put { .. } => "put",
            Self::Del { .. } => "del",
            Self::Commit => "commit",
            Self::Abort => "abort",
            Self::Info => "info",
        }
    }
}

/// The reply to a request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    /// GET hit
    Value(Bytes),
    /// Direct PUT/DEL applied
    Success,
    /// Intent logged; ready to commit
    VoteCommit,
    /// Mutation refused; carries the reason
    VoteAbort(String),
    /// COMMIT/ABORT processed
    Ack,
    /// Server description
    Info(String),
    /// Request failed; carries the client-facing message
    Error(String),
}

impl Response {
    fn error(e: &Error) -> Self {
        Self::Error(e.client_message().to_string())
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => write!(f, "{}", String::from_utf8_lossy(v)),
            Self::Success | Self::Ack => write!(f, "{MSG_SUCCESS}"),
            Self::VoteCommit => write!(f, "VOTE COMMIT"),
            Self::VoteAbort(msg) => write!(f, "VOTE ABORT: {msg}"),
            Self::Info(info) => write!(f, "{info}"),
            Self::Error(msg) => write!(f, "{msg}"),
        }
    }
}

/// Maps requests onto a coordinator
pub struct RequestHandler<S, L> {
    coordinator: Arc<StoreCoordinator<S, L>>,
}

impl<S, L> Clone for RequestHandler<S, L> {
    fn clone(&self) -> Self {
        Self {
            coordinator: Arc::clone(&self.coordinator),
        }
    }
}

impl<S: DurableStore, L: TransactionLog> RequestHandler<S, L> {
    /// Create a handler over a shared coordinator
    pub const fn new(coordinator: Arc<StoreCoordinator<S, L>>) -> Self {
        Self { coordinator }
    }

    /// The coordinator requests are dispatched to
    pub fn coordinator(&self) -> &StoreCoordinator<S, L> {
        &self.coordinator
    }

    /// Handle one request
    pub fn handle(&self, request: Request) -> Response {
        debug!(kind = request.kind(), tpc = self.coordinator.is_tpc(), "handling request");
        match request {
            Request::Info => Response::Info(self.coordinator.get_info().to_string()),
            Request::Get { key } => match self.coordinator.read(&key) {
                Ok(value) => Response::Value(value),
                Err(e) => Response::error(&e),
            },
            request if self.coordinator.is_tpc() => self.handle_tpc(request),
            request => self.handle_direct(request),
        }
    }

    fn handle_direct(&self, request: Request) -> Response {
        let result = match request {
            Request::Put { key, value } => self.coordinator.write(&key, value),
            Request::Del { key } => self.coordinator.delete(&key),
            _ => return Response::Error(ERRMSG_INVALID_REQUEST.to_string()),
        };
        match result {
            Ok(()) => Response::Success,
            Err(e) => Response::error(&e),
        }
    }

    fn handle_tpc(&self, request: Request) -> Response {
        let vote = |result: shardkv_common::Result<u64>| match result {
            Ok(_) => Response::VoteCommit,
            Err(e) => Response::VoteAbort(e.client_message().to_string()),
        };

        match request {
            Request::Put { key, value } => vote(self.coordinator.prepare_put(&key, value)),
            Request::Del { key } => vote(self.coordinator.prepare_delete(&key)),
            Request::Commit => match self.coordinator.commit() {
                Ok(_) => Response::Ack,
                Err(e) => Response::error(&e),
            },
            Request::Abort => match self.coordinator.abort() {
                Ok(_) => Response::Ack,
                Err(e) => Response::error(&e),
            },
            _ => Response::Error(ERRMSG_INVALID_REQUEST.to_string()),
        }
    }
}
