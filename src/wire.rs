//! The transport seam.
//!
//! The engine never touches sockets or the Bolt codec. It drives a
//! [`WireConnection`] instead: each method enqueues one protocol message on
//! the transport when it is *called* and returns a future that resolves when
//! the matching server reply arrives. Calls made before any future is awaited
//! are therefore pipelined in call order, and awaiting a future implies a
//! flush of everything enqueued before it.

use futures::future::BoxFuture;
use thiserror::Error;

use crate::row::Row;
use crate::summary::ResultSummary;
use crate::value::Params;

/// Future returned by every [`WireConnection`] operation.
pub type WireFuture<T> = BoxFuture<'static, core::result::Result<T, WireError>>;

/// Transport-level failure, classified by the transaction layer.
#[derive(Debug, Error)]
pub enum WireError {
    /// The server answered a request with FAILURE.
    #[error("server failure {code}: {message}")]
    Server {
        /// Server failure code, e.g. `Neo.ClientError.Statement.SyntaxError`.
        code: String,
        /// Human-readable failure message.
        message: String,
    },

    /// The server ignored a request queued behind a failed one.
    #[error("request ignored by the server")]
    Ignored,

    /// Socket-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer violated the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The connection was closed underneath us.
    #[error("connection closed")]
    ConnectionClosed,
}

impl WireError {
    /// True when the failure poisons only the transaction, not the socket.
    pub fn is_transaction_scoped(&self) -> bool {
        matches!(self, WireError::Server { .. } | WireError::Ignored)
    }
}

/// Which server-side result stream a PULL or DISCARD addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRef {
    /// The stream opened by the most recently submitted RUN (`qid = -1`).
    /// Used when the RUN acknowledgement has not been awaited yet.
    LastSubmitted,
    /// A stream addressed by its query id from a RUN acknowledgement.
    Query(i64),
}

impl StreamRef {
    /// Wire-level query id (`-1` for the last submitted stream).
    pub fn query_id(self) -> i64 {
        match self {
            StreamRef::LastSubmitted => -1,
            StreamRef::Query(id) => id,
        }
    }
}

/// Kind of transaction a BEGIN opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    /// Driver-managed transaction committed when the result is consumed.
    Autocommit,
    /// Caller-managed transaction ended by an explicit commit or rollback.
    Explicit,
}

/// Acknowledgement of a RUN: the stream is open and its columns are known.
#[derive(Debug, Clone)]
pub struct RunAck {
    /// Server-assigned id of the opened stream.
    pub query_id: i64,
    /// Column labels of the result, in order.
    pub keys: Vec<String>,
}

/// One batch of records produced by a PULL.
#[derive(Debug, Default)]
pub struct Page {
    /// Records in stream order.
    pub rows: Vec<Row>,
    /// True when the server holds more records for this stream.
    pub has_more: bool,
    /// Present on the final page of a stream.
    pub summary: Option<ResultSummary>,
}

/// Acknowledgement of a DISCARD.
#[derive(Debug, Default)]
pub struct DiscardAck {
    /// Summary of the discarded stream, when the server reported one.
    pub summary: Option<ResultSummary>,
}

/// Acknowledgement of a COMMIT.
#[derive(Debug, Default)]
pub struct CommitAck {
    /// Bookmark identifying the committed state, for causal chaining.
    pub bookmark: Option<String>,
}

/// An established, authenticated Bolt connection.
///
/// Implementations enqueue the message during the method call and resolve the
/// returned future with the server's reply. `flush: false` lets a message
/// piggyback on the next write; passing `flush: true` (or awaiting a future
/// of a later message) forces the buffered messages out.
pub trait WireConnection: Send + Sync {
    /// Open a transaction. Consumes the given bookmarks for causal ordering.
    fn begin(
        &self,
        kind: TransactionKind,
        bookmarks: &[String],
        flush: bool,
    ) -> WireFuture<()>;

    /// Submit a query with parameters, opening a result stream.
    fn run(&self, query: &str, parameters: Params, flush: bool) -> WireFuture<RunAck>;

    /// Request up to `n` records from a stream (`-1` for all remaining).
    /// Always flushes.
    fn pull(&self, target: StreamRef, n: i64) -> WireFuture<Page>;

    /// Discard up to `n` records from a stream (`-1` for all remaining).
    fn discard(&self, target: StreamRef, n: i64, flush: bool) -> WireFuture<DiscardAck>;

    /// Commit the open transaction. Always flushes.
    fn commit(&self) -> WireFuture<CommitAck>;

    /// Roll back the open transaction. Always flushes.
    fn rollback(&self) -> WireFuture<()>;

    /// Reset the connection to a clean state, clearing any server-side
    /// failure.
    fn reset(&self, flush: bool) -> WireFuture<()>;

    /// Close the connection. The connection must not be used afterwards.
    fn close(&self) -> WireFuture<()>;
}
