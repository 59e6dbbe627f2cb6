//! Plain statements: one query in, one result (rows or an update count) out.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::connection::ConnectionCore;
use crate::error::{Error, Result};
use crate::result_set::ResultSet;
use crate::translator::{QueryTranslator, forces_native};
use crate::value::Params;

/// Flags a statement shares with the result set it spawned.
#[derive(Debug, Default)]
pub(crate) struct StatementShared {
    pub(crate) closed: AtomicBool,
    pub(crate) close_on_completion: AtomicBool,
}

/// A single-use query handle bound to a connection.
///
/// At most one result set is open per statement; executing again closes the
/// previous one (draining whatever the server still holds for it).
pub struct Statement {
    core: Arc<ConnectionCore>,
    shared: Arc<StatementShared>,
    translator: Option<Arc<dyn QueryTranslator>>,
    fetch_size: u64,
    max_rows: u64,
    max_field_size: usize,
    query_timeout_secs: u64,
    poolable: bool,
    result_set: Option<ResultSet>,
    update_count: Option<u64>,
    // Set by execute(); gates the multiple-results accessors.
    multi_results: bool,
    warnings: Vec<String>,
}

impl Statement {
    pub(crate) fn new(
        core: Arc<ConnectionCore>,
        translator: Option<Arc<dyn QueryTranslator>>,
        fetch_size: u64,
    ) -> Self {
        Self {
            core,
            shared: Arc::new(StatementShared::default()),
            translator,
            fetch_size,
            max_rows: 0,
            max_field_size: 0,
            query_timeout_secs: 0,
            poolable: false,
            result_set: None,
            update_count: None,
            multi_results: false,
            warnings: Vec::new(),
        }
    }

    /// Run a query expected to return rows. The first page is fetched before
    /// this returns; further pages are pulled lazily as the cursor advances.
    pub fn execute_query(&mut self, query: &str) -> Result<&mut ResultSet> {
        self.execute_query_with(query, true, Params::new())
    }

    /// Run a query expected to mutate data and return the total number of
    /// mutations the server reported. Rows, if any, are discarded unseen.
    /// In autocommit mode the commit rides in the same round trip.
    pub fn execute_update(&mut self, query: &str) -> Result<u64> {
        self.execute_update_with(query, true, Params::new())
    }

    /// Run a query without knowing its shape. Returns true when rows are
    /// available via [`Statement::result_set`], false when the outcome is an
    /// update count.
    ///
    /// Classification follows the reported mutation summary, not the query
    /// text: a query that both mutates and returns rows counts as an update
    /// and its rows are discarded.
    pub fn execute(&mut self, query: &str) -> Result<bool> {
        self.execute_with(query, true, Params::new())
    }

    pub(crate) fn execute_query_with(
        &mut self,
        query: &str,
        translate: bool,
        parameters: Params,
    ) -> Result<&mut ResultSet> {
        self.assert_open()?;
        self.discard_prior_result()?;
        let query = self.process_query(query, translate)?;
        let tx = self.core.transaction(true)?;
        let result = tx.lock().run_and_pull(
            &query,
            parameters,
            self.effective_fetch_size(),
            self.timeout(),
        )?;
        let rs = ResultSet::new(
            tx,
            Arc::clone(&self.shared),
            result.run,
            result.page,
            self.fetch_size(),
            self.max_rows,
            self.max_field_size,
        );
        self.multi_results = false;
        Ok(self.result_set.insert(rs))
    }

    pub(crate) fn execute_update_with(
        &mut self,
        query: &str,
        translate: bool,
        parameters: Params,
    ) -> Result<u64> {
        self.assert_open()?;
        self.discard_prior_result()?;
        let query = self.process_query(query, translate)?;
        let tx = self.core.transaction(true)?;
        let mut guard = tx.lock();
        let commit = guard.is_auto_commit();
        let ack = guard.run_and_discard(&query, parameters, self.timeout(), commit)?;
        drop(guard);
        let count = ack
            .summary
            .map(|summary| summary.counters.total())
            .unwrap_or(0);
        self.update_count = Some(count);
        self.multi_results = false;
        Ok(count)
    }

    pub(crate) fn execute_with(
        &mut self,
        query: &str,
        translate: bool,
        parameters: Params,
    ) -> Result<bool> {
        self.assert_open()?;
        self.discard_prior_result()?;
        let query = self.process_query(query, translate)?;
        let tx = self.core.transaction(true)?;
        let result = tx.lock().run_and_pull(
            &query,
            parameters,
            self.effective_fetch_size(),
            self.timeout(),
        )?;
        let mutations = result
            .page
            .summary
            .as_ref()
            .map(|summary| summary.counters.total())
            .unwrap_or(0);
        self.multi_results = true;
        if mutations > 0 {
            if !result.page.rows.is_empty() {
                self.warnings
                    .push("query returned rows but was classified as an update; rows were discarded".into());
            }
            tx.lock().finish_stream(&result.run, true)?;
            self.update_count = Some(mutations);
            Ok(false)
        } else {
            let rs = ResultSet::new(
                tx,
                Arc::clone(&self.shared),
                result.run,
                result.page,
                self.fetch_size(),
                self.max_rows,
                self.max_field_size,
            );
            self.result_set = Some(rs);
            Ok(true)
        }
    }

    /// Rows from the last [`Statement::execute`], when it produced any.
    pub fn result_set(&mut self) -> Result<Option<&mut ResultSet>> {
        self.assert_open()?;
        if !self.multi_results || self.update_count.is_some() {
            return Ok(None);
        }
        Ok(self.result_set.as_mut())
    }

    /// Update count from the last [`Statement::execute`], when it was an
    /// update.
    pub fn update_count(&self) -> Option<u64> {
        if self.multi_results { self.update_count } else { None }
    }

    /// Advance past the current result. This driver produces at most one
    /// result per execution, so the current result set is closed and there
    /// never is a next one.
    pub fn get_more_results(&mut self) -> Result<bool> {
        self.assert_open()?;
        self.discard_prior_result()?;
        Ok(false)
    }

    /// Warnings accumulated since the last execution.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Drop accumulated warnings.
    pub fn clear_warnings(&mut self) {
        self.warnings.clear();
    }

    /// Batching requires a bound query text.
    pub fn add_batch(&mut self, _query: &str) -> Result<()> {
        Err(Error::IllegalState(
            "batching is only supported on prepared statements".into(),
        ))
    }

    /// Batching requires a bound query text.
    pub fn execute_batch(&mut self) -> Result<()> {
        Err(Error::IllegalState(
            "batching is only supported on prepared statements".into(),
        ))
    }

    /// Close the statement and its open result set. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(mut rs) = self.result_set.take() {
            rs.close()?;
        }
        Ok(())
    }

    /// True once [`Statement::close`] ran (directly or via
    /// close-on-completion).
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Rows requested per PULL. `0` restores the connection default.
    pub fn set_fetch_size(&mut self, n: u64) -> Result<()> {
        self.assert_open()?;
        self.fetch_size = n;
        Ok(())
    }

    /// Current per-PULL row request size.
    pub fn fetch_size(&self) -> u64 {
        if self.fetch_size > 0 {
            self.fetch_size
        } else {
            self.core.default_fetch_size()
        }
    }

    /// Cap on the total number of rows a result set yields. `0` = unlimited.
    pub fn set_max_rows(&mut self, n: u64) -> Result<()> {
        self.assert_open()?;
        self.max_rows = n;
        Ok(())
    }

    /// Current row cap.
    pub fn max_rows(&self) -> u64 {
        self.max_rows
    }

    /// Cap on the length of string and byte values returned by getters,
    /// counted in characters/bytes. `0` = unlimited. Longer values are
    /// silently truncated.
    pub fn set_max_field_size(&mut self, n: usize) -> Result<()> {
        self.assert_open()?;
        self.max_field_size = n;
        Ok(())
    }

    /// Current field size cap.
    pub fn max_field_size(&self) -> usize {
        self.max_field_size
    }

    /// Seconds an execute call may block. `0` = wait indefinitely. The
    /// timeout bounds the wait, not the server-side query.
    pub fn set_query_timeout(&mut self, seconds: u64) -> Result<()> {
        self.assert_open()?;
        self.query_timeout_secs = seconds;
        Ok(())
    }

    /// Current query timeout in seconds.
    pub fn query_timeout(&self) -> u64 {
        self.query_timeout_secs
    }

    /// Hint that the statement may be pooled. Stored, not acted on.
    pub fn set_poolable(&mut self, poolable: bool) -> Result<()> {
        self.assert_open()?;
        self.poolable = poolable;
        Ok(())
    }

    /// Current poolable hint.
    pub fn is_poolable(&self) -> bool {
        self.poolable
    }

    /// Close this statement automatically when its result set is exhausted
    /// and closed.
    pub fn set_close_on_completion(&mut self) -> Result<()> {
        self.assert_open()?;
        self.shared.close_on_completion.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// True when close-on-completion is armed.
    pub fn is_close_on_completion(&self) -> bool {
        self.shared.close_on_completion.load(Ordering::SeqCst)
    }

    fn assert_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::closed("statement"));
        }
        Ok(())
    }

    fn discard_prior_result(&mut self) -> Result<()> {
        self.update_count = None;
        self.multi_results = false;
        self.warnings.clear();
        if let Some(mut rs) = self.result_set.take() {
            rs.close()?;
        }
        Ok(())
    }

    pub(crate) fn process_query(&self, query: &str, translate: bool) -> Result<String> {
        if !translate || forces_native(query) {
            return Ok(query.to_string());
        }
        match &self.translator {
            Some(translator) => translator.translate(query),
            None => Ok(query.to_string()),
        }
    }

    fn effective_fetch_size(&self) -> u64 {
        let fetch = self.fetch_size();
        if self.max_rows > 0 {
            fetch.min(self.max_rows)
        } else {
            fetch
        }
    }

    fn timeout(&self) -> Option<Duration> {
        (self.query_timeout_secs > 0).then(|| Duration::from_secs(self.query_timeout_secs))
    }
}

impl std::fmt::Debug for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("closed", &self.is_closed())
            .field("fetch_size", &self.fetch_size)
            .field("max_rows", &self.max_rows)
            .field("query_timeout_secs", &self.query_timeout_secs)
            .finish_non_exhaustive()
    }
}
