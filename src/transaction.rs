//! The transaction state machine and the sync-over-async bridge.
//!
//! All network composition happens here: wire futures are created eagerly
//! (which pipelines the messages in call order), joined, and driven to
//! completion on the driver's current-thread runtime. Everything above this
//! layer is plain blocking code.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Runtime;

use crate::error::{Error, Result};
use crate::value::Params;
use crate::wire::{
    CommitAck, DiscardAck, Page, RunAck, StreamRef, TransactionKind, WireConnection, WireError,
    WireFuture,
};

/// Where a transaction sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Begun but nothing executed yet; the BEGIN is still in flight.
    New,
    /// At least one query executed successfully.
    Ready,
    /// A query failed inside an explicit transaction; only rollback is
    /// permitted, and it completes locally.
    OpenFailed,
    /// Terminal: the transaction failed.
    Failed,
    /// Terminal: the transaction committed.
    Committed,
    /// Terminal: the transaction rolled back.
    RolledBack,
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransactionState::New => "new",
            TransactionState::Ready => "ready",
            TransactionState::OpenFailed => "failed (rollback required)",
            TransactionState::Failed => "failed",
            TransactionState::Committed => "committed",
            TransactionState::RolledBack => "rolled back",
        };
        f.write_str(name)
    }
}

/// How to open a [`Transaction`].
#[derive(Debug, Clone, Default)]
pub struct TransactionOptions {
    /// Commit automatically when the single result is consumed.
    pub auto_commit: bool,
    /// Bookmarks the BEGIN waits on for causal ordering.
    pub bookmarks: Vec<String>,
    /// Send a RESET ahead of the BEGIN to clear server-side failure state.
    pub reset_first: bool,
}

/// Shared handles a connection uses to observe its transactions.
#[derive(Clone, Default)]
pub(crate) struct TransactionMonitor {
    pub(crate) fatal: Arc<AtomicBool>,
    pub(crate) bookmarks: Arc<Mutex<Vec<String>>>,
}

#[derive(Debug, Clone)]
enum StoredFailure {
    Transaction {
        code: Option<String>,
        message: String,
    },
    Connection {
        message: String,
    },
    Timeout,
}

impl StoredFailure {
    fn to_error(&self) -> Error {
        match self {
            StoredFailure::Transaction { code, message } => Error::TransactionFailed {
                code: code.clone(),
                message: message.clone(),
            },
            StoredFailure::Connection { message } => Error::ConnectionFatal(message.clone()),
            StoredFailure::Timeout => Error::QueryTimeout,
        }
    }
}

/// A successful RUN + first PULL.
#[derive(Debug)]
pub struct RunResult {
    /// The stream's identity and column keys.
    pub run: RunAck,
    /// The first page of records.
    pub page: Page,
}

/// One server-side transaction.
///
/// The runtime must have its timer enabled; query timeouts are driven by
/// `tokio::time`.
pub struct Transaction {
    wire: Arc<dyn WireConnection>,
    runtime: Arc<Runtime>,
    auto_commit: bool,
    state: TransactionState,
    // In flight until the first operation joins it.
    begin: Option<WireFuture<()>>,
    failure: Option<StoredFailure>,
    monitor: TransactionMonitor,
    // Query id of the stream that still has records on the server.
    open_stream: Option<i64>,
}

impl Transaction {
    /// Open a transaction on `wire`. The BEGIN is enqueued immediately but
    /// its result is only awaited together with the first operation.
    pub fn new(
        wire: Arc<dyn WireConnection>,
        runtime: Arc<Runtime>,
        options: TransactionOptions,
    ) -> Self {
        Self::with_monitor(wire, runtime, options, TransactionMonitor::default())
    }

    pub(crate) fn with_monitor(
        wire: Arc<dyn WireConnection>,
        runtime: Arc<Runtime>,
        options: TransactionOptions,
        monitor: TransactionMonitor,
    ) -> Self {
        let kind = if options.auto_commit {
            TransactionKind::Autocommit
        } else {
            TransactionKind::Explicit
        };
        let reset = options.reset_first.then(|| wire.reset(false));
        let begin = wire.begin(kind, &options.bookmarks, false);
        let begin: WireFuture<()> = match reset {
            Some(reset) => Box::pin(async move {
                reset.await?;
                begin.await
            }),
            None => begin,
        };
        Self {
            wire,
            runtime,
            auto_commit: options.auto_commit,
            state: TransactionState::New,
            begin: Some(begin),
            failure: None,
            monitor,
            open_stream: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// True when the transaction commits on result consumption.
    pub fn is_auto_commit(&self) -> bool {
        self.auto_commit
    }

    /// True when queries may still run.
    pub fn is_runnable(&self) -> bool {
        matches!(self.state, TransactionState::New | TransactionState::Ready)
    }

    /// True when the transaction still needs a commit or rollback.
    pub fn is_open(&self) -> bool {
        matches!(
            self.state,
            TransactionState::New | TransactionState::Ready | TransactionState::OpenFailed
        )
    }

    /// Run a query and pull the first page. The PULL is pipelined behind the
    /// RUN (and the BEGIN, on the first operation).
    pub fn run_and_pull(
        &mut self,
        query: &str,
        parameters: Params,
        fetch_size: u64,
        timeout: Option<Duration>,
    ) -> Result<RunResult> {
        self.assert_usable()?;
        let begin = self.take_begin();
        let run = self.wire.run(query, parameters, false);
        let pull = self.wire.pull(StreamRef::LastSubmitted, pull_n(fetch_size));
        let fut = async move {
            let ((), run) = tokio::try_join!(begin, run)?;
            let page = pull.await?;
            Ok::<_, WireError>((run, page))
        };
        let (run, page) = self.execute(fut, timeout)?;
        self.state = TransactionState::Ready;
        self.open_stream = page.has_more.then_some(run.query_id);
        Ok(RunResult { run, page })
    }

    /// Run a query and discard its records, keeping only the summary.
    /// With `commit` the COMMIT rides in the same round trip.
    pub fn run_and_discard(
        &mut self,
        query: &str,
        parameters: Params,
        timeout: Option<Duration>,
        commit: bool,
    ) -> Result<DiscardAck> {
        self.assert_usable()?;
        let begin = self.take_begin();
        let run = self.wire.run(query, parameters, false);
        let discard = self.wire.discard(StreamRef::LastSubmitted, -1, !commit);
        let commit_fut = commit.then(|| self.wire.commit());
        let fut = async move {
            let ((), _run, discard, commit) =
                tokio::try_join!(begin, run, discard, join_opt(commit_fut))?;
            Ok::<_, WireError>((discard, commit))
        };
        let (ack, commit_ack) = self.execute(fut, timeout)?;
        if commit {
            self.finish_commit(commit_ack);
        } else {
            self.state = TransactionState::Ready;
        }
        Ok(ack)
    }

    /// Pull the next page of an open stream.
    pub fn pull(&mut self, run: &RunAck, fetch_size: u64) -> Result<Page> {
        self.assert_usable()?;
        let pull = self
            .wire
            .pull(StreamRef::Query(run.query_id), pull_n(fetch_size));
        let page = self.execute(pull, None)?;
        self.open_stream = page.has_more.then_some(run.query_id);
        Ok(page)
    }

    /// Finish a result stream: discard whatever the server still holds and,
    /// for autocommit transactions, commit in the same round trip. No-op on
    /// a transaction that is no longer runnable.
    pub fn finish_stream(&mut self, run: &RunAck, commit: bool) -> Result<()> {
        if self.failure.is_some() || !self.is_runnable() {
            return Ok(());
        }
        let discard_needed = self.open_stream == Some(run.query_id);
        let commit_needed = commit && self.auto_commit;
        if !discard_needed && !commit_needed {
            return Ok(());
        }
        let begin = self.take_begin();
        let discard = discard_needed
            .then(|| {
                self.wire
                    .discard(StreamRef::Query(run.query_id), -1, !commit_needed)
            });
        let commit_fut = commit_needed.then(|| self.wire.commit());
        let fut = async move {
            let ((), _discard, commit) =
                tokio::try_join!(begin, join_opt(discard), join_opt(commit_fut))?;
            Ok::<_, WireError>(commit)
        };
        let commit_ack = self.execute(fut, None)?;
        self.open_stream = None;
        if commit_needed {
            self.finish_commit(commit_ack);
        }
        Ok(())
    }

    /// Commit. Any still-open stream is discarded in the same round trip,
    /// ahead of the COMMIT.
    pub fn commit(&mut self) -> Result<()> {
        self.assert_usable()?;
        let begin = self.take_begin();
        let discard = self
            .open_stream
            .take()
            .map(|qid| self.wire.discard(StreamRef::Query(qid), -1, false));
        let commit = self.wire.commit();
        let fut = async move {
            let ((), _discard, ack) = tokio::try_join!(begin, join_opt(discard), commit)?;
            Ok::<_, WireError>(ack)
        };
        let ack = self.execute(fut, None)?;
        self.finish_commit(Some(ack));
        Ok(())
    }

    /// Roll back. On [`TransactionState::OpenFailed`] this completes locally
    /// because the server already abandoned the transaction.
    pub fn rollback(&mut self) -> Result<()> {
        if self.state == TransactionState::OpenFailed {
            self.state = TransactionState::Failed;
            return Ok(());
        }
        self.assert_usable()?;
        let begin = self.take_begin();
        let discard = self
            .open_stream
            .take()
            .map(|qid| self.wire.discard(StreamRef::Query(qid), -1, false));
        let rollback = self.wire.rollback();
        let fut = async move {
            let ((), _discard, ()) = tokio::try_join!(begin, join_opt(discard), rollback)?;
            Ok::<_, WireError>(())
        };
        self.execute(fut, None)?;
        self.state = TransactionState::RolledBack;
        Ok(())
    }

    /// Mark the transaction as failed with `error`, without touching the
    /// network. Explicit transactions move to
    /// [`TransactionState::OpenFailed`] and still need a rollback.
    pub fn fail(&mut self, error: &Error) -> Result<()> {
        self.assert_usable()?;
        let failure = match error {
            Error::TransactionFailed { code, message } => StoredFailure::Transaction {
                code: code.clone(),
                message: message.clone(),
            },
            Error::ConnectionFatal(message) => StoredFailure::Connection {
                message: message.clone(),
            },
            Error::QueryTimeout => StoredFailure::Timeout,
            other => StoredFailure::Transaction {
                code: None,
                message: other.to_string(),
            },
        };
        self.fail_with(failure);
        Ok(())
    }

    fn assert_usable(&self) -> Result<()> {
        if let Some(failure) = &self.failure {
            return Err(failure.to_error());
        }
        if !self.is_runnable() {
            return Err(Error::IllegalState(format!(
                "transaction is {}",
                self.state
            )));
        }
        Ok(())
    }

    fn take_begin(&mut self) -> WireFuture<()> {
        self.begin
            .take()
            .unwrap_or_else(|| Box::pin(futures::future::ready(Ok(()))))
    }

    fn execute<T>(
        &mut self,
        fut: impl Future<Output = core::result::Result<T, WireError>>,
        timeout: Option<Duration>,
    ) -> Result<T> {
        let outcome = match timeout {
            // The timeout future needs the runtime's timer; build it inside
            // block_on.
            Some(limit) => match self
                .runtime
                .block_on(async { tokio::time::timeout(limit, fut).await })
            {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::debug!(?limit, "query timed out, failing transaction");
                    self.fail_with(StoredFailure::Timeout);
                    return Err(Error::QueryTimeout);
                }
            },
            None => self.runtime.block_on(fut),
        };
        outcome.map_err(|err| self.classify(err))
    }

    /// Transaction-scoped failures poison only this transaction; everything
    /// else flips the connection's fatal flag.
    fn classify(&mut self, err: WireError) -> Error {
        let transaction_scoped = err.is_transaction_scoped();
        let error = Error::from(err);
        if transaction_scoped {
            let (code, message) = match &error {
                Error::TransactionFailed { code, message } => (code.clone(), message.clone()),
                other => (None, other.to_string()),
            };
            self.fail_with(StoredFailure::Transaction { code, message });
        } else {
            tracing::warn!(%error, "connection is no longer usable");
            self.monitor.fatal.store(true, Ordering::SeqCst);
            self.fail_with(StoredFailure::Connection {
                message: error.to_string(),
            });
        }
        error
    }

    fn fail_with(&mut self, failure: StoredFailure) {
        self.failure = Some(failure);
        self.open_stream = None;
        self.begin = None;
        self.state = if self.auto_commit {
            TransactionState::Failed
        } else {
            TransactionState::OpenFailed
        };
    }

    fn finish_commit(&mut self, ack: Option<CommitAck>) {
        self.state = TransactionState::Committed;
        if let Some(bookmark) = ack.and_then(|ack| ack.bookmark) {
            *self.monitor.bookmarks.lock() = vec![bookmark];
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("state", &self.state)
            .field("auto_commit", &self.auto_commit)
            .field("open_stream", &self.open_stream)
            .finish_non_exhaustive()
    }
}

async fn join_opt<T>(fut: Option<WireFuture<T>>) -> core::result::Result<Option<T>, WireError> {
    match fut {
        Some(fut) => fut.await.map(Some),
        None => Ok(None),
    }
}

fn pull_n(fetch_size: u64) -> i64 {
    i64::try_from(fetch_size).unwrap_or(i64::MAX)
}
