//! Connections: the transaction supplier and the blocking runtime.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use tokio::runtime::Runtime;

use crate::error::{Error, Result};
use crate::opts::DriverConfig;
use crate::prepared::PreparedStatement;
use crate::statement::Statement;
use crate::transaction::{Transaction, TransactionMonitor, TransactionOptions, TransactionState};
use crate::wire::WireConnection;

struct CoreState {
    auto_commit: bool,
    closed: bool,
    transaction: Option<Arc<Mutex<Transaction>>>,
}

/// Shared between a connection and the statements it hands out.
pub(crate) struct ConnectionCore {
    wire: Arc<dyn WireConnection>,
    runtime: Arc<Runtime>,
    config: DriverConfig,
    monitor: TransactionMonitor,
    state: Mutex<CoreState>,
}

impl ConnectionCore {
    /// The live transaction, creating one lazily when the previous one
    /// reached a terminal state. With `single_autocommit_check`, refuses to
    /// hand an open autocommit transaction to a second statement.
    pub(crate) fn transaction(
        &self,
        single_autocommit_check: bool,
    ) -> Result<Arc<Mutex<Transaction>>> {
        let mut state = self.state.lock();
        self.assert_usable(&state)?;
        let mut reset_first = false;
        if let Some(tx) = &state.transaction {
            let guard = tx.lock();
            if guard.is_open() {
                if single_autocommit_check && guard.is_auto_commit() {
                    return Err(Error::IllegalState(
                        "only a single autocommit transaction is supported".into(),
                    ));
                }
                drop(guard);
                return Ok(Arc::clone(tx));
            }
            // A failed transaction leaves failure state on the server side;
            // clear it before the next BEGIN.
            reset_first = guard.state() == TransactionState::Failed;
        }
        let options = TransactionOptions {
            auto_commit: state.auto_commit,
            bookmarks: self.monitor.bookmarks.lock().clone(),
            reset_first,
        };
        tracing::debug!(
            auto_commit = options.auto_commit,
            reset_first,
            "opening transaction"
        );
        let tx = Arc::new(Mutex::new(Transaction::with_monitor(
            Arc::clone(&self.wire),
            Arc::clone(&self.runtime),
            options,
            self.monitor.clone(),
        )));
        state.transaction = Some(Arc::clone(&tx));
        Ok(tx)
    }

    pub(crate) fn default_fetch_size(&self) -> u64 {
        self.config.effective_fetch_size()
    }

    fn assert_usable(&self, state: &CoreState) -> Result<()> {
        if state.closed {
            return Err(Error::closed("connection"));
        }
        if self.monitor.fatal.load(Ordering::SeqCst) {
            return Err(Error::ConnectionFatal(
                "a previous failure made this connection unusable".into(),
            ));
        }
        Ok(())
    }
}

/// A synchronous connection over one Bolt transport.
///
/// Starts in autocommit mode. All blocking happens on a driver-owned
/// current-thread runtime; the transport may live on any executor.
pub struct Connection {
    core: Arc<ConnectionCore>,
}

impl Connection {
    /// Wrap an established transport.
    pub fn new(wire: Arc<dyn WireConnection>, config: DriverConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        Ok(Self {
            core: Arc::new(ConnectionCore {
                wire,
                runtime: Arc::new(runtime),
                config,
                monitor: TransactionMonitor::default(),
                state: Mutex::new(CoreState {
                    auto_commit: true,
                    closed: false,
                    transaction: None,
                }),
            }),
        })
    }

    /// New statement bound to this connection.
    pub fn create_statement(&self) -> Result<Statement> {
        self.assert_usable()?;
        Ok(Statement::new(
            Arc::clone(&self.core),
            self.core.config.translator_handle(),
            0,
        ))
    }

    /// New prepared statement bound to `query` for its lifetime.
    pub fn prepare_statement(&self, query: &str) -> Result<PreparedStatement> {
        self.assert_usable()?;
        Ok(PreparedStatement::new(
            Arc::clone(&self.core),
            self.core.config.translator_handle(),
            0,
            query.to_string(),
            self.core.config.rewrites_batches(),
        ))
    }

    /// Switch between autocommit and explicit-transaction mode. Switching
    /// with a runnable transaction open commits it first; a failed explicit
    /// transaction must be rolled back before switching.
    pub fn set_auto_commit(&self, enabled: bool) -> Result<()> {
        let mut state = self.core.state.lock();
        self.core.assert_usable(&state)?;
        if state.auto_commit == enabled {
            return Ok(());
        }
        if let Some(tx) = &state.transaction {
            let mut guard = tx.lock();
            if guard.state() == TransactionState::OpenFailed {
                return Err(Error::IllegalState(
                    "the failed transaction must be rolled back first".into(),
                ));
            }
            if guard.is_runnable() {
                guard.commit()?;
            }
        }
        state.auto_commit = enabled;
        Ok(())
    }

    /// True in autocommit mode.
    pub fn is_auto_commit(&self) -> bool {
        self.core.state.lock().auto_commit
    }

    /// Commit the open explicit transaction.
    pub fn commit(&self) -> Result<()> {
        self.end_transaction(true)
    }

    /// Roll back the open explicit transaction.
    pub fn rollback(&self) -> Result<()> {
        self.end_transaction(false)
    }

    /// Bookmarks received from committed transactions, for causal chaining
    /// across connections.
    pub fn bookmarks(&self) -> Vec<String> {
        self.core.monitor.bookmarks.lock().clone()
    }

    /// True once [`Connection::close`] ran.
    pub fn is_closed(&self) -> bool {
        self.core.state.lock().closed
    }

    /// Close the connection, rolling back any open transaction and closing
    /// the transport. Idempotent.
    pub fn close(&self) -> Result<()> {
        let tx = {
            let mut state = self.core.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            state.transaction.take()
        };
        if let Some(tx) = tx {
            let mut guard = tx.lock();
            if guard.is_open() && !self.core.monitor.fatal.load(Ordering::SeqCst) {
                if let Err(error) = guard.rollback() {
                    tracing::debug!(%error, "rollback during close failed");
                }
            }
        }
        if let Err(error) = self.core.runtime.block_on(self.core.wire.close()) {
            tracing::debug!(%error, "transport close failed");
        }
        Ok(())
    }

    fn end_transaction(&self, commit: bool) -> Result<()> {
        let tx = {
            let state = self.core.state.lock();
            self.core.assert_usable(&state)?;
            if state.auto_commit {
                return Err(Error::IllegalState(
                    "commit and rollback are driver-managed in autocommit mode".into(),
                ));
            }
            state.transaction.clone()
        };
        let Some(tx) = tx else {
            return Err(Error::IllegalState("no transaction is open".into()));
        };
        let mut guard = tx.lock();
        if !guard.is_open() {
            return Err(Error::IllegalState("no transaction is open".into()));
        }
        if commit { guard.commit() } else { guard.rollback() }
    }

    fn assert_usable(&self) -> Result<()> {
        let state = self.core.state.lock();
        self.core.assert_usable(&state)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.core.state.lock();
        f.debug_struct("Connection")
            .field("auto_commit", &state.auto_commit)
            .field("closed", &state.closed)
            .field("has_transaction", &state.transaction.is_some())
            .finish_non_exhaustive()
    }
}
