//! Prepared statements: one query text, parameter binding, and batching.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::connection::ConnectionCore;
use crate::error::{Error, Result};
use crate::result_set::ResultSet;
use crate::statement::Statement;
use crate::translator::QueryTranslator;
use crate::value::{Params, Value};

/// Name of the list parameter a rewritten batch is bound to.
const BATCH_LIST_PARAM: &str = "__parameters";
/// Name each batch entry takes inside the rewritten query.
const BATCH_ITEM: &str = "__parameter";

mod sealed {
    pub trait Sealed {}
    impl Sealed for usize {}
    impl Sealed for &str {}
}

/// A parameter key: a 1-based ordinal (`usize`) or a name (`&str`).
/// Ordinal `k` binds the parameter named `k`.
pub trait ParamKey: sealed::Sealed {
    #[doc(hidden)]
    fn into_name(self) -> Result<String>;
}

impl ParamKey for usize {
    fn into_name(self) -> Result<String> {
        if self == 0 {
            return Err(Error::InvalidArgument(
                "parameter ordinal must be at least 1".into(),
            ));
        }
        Ok(self.to_string())
    }
}

impl ParamKey for &str {
    fn into_name(self) -> Result<String> {
        Ok(self.to_string())
    }
}

/// Per-entry outcome of a batch execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The entry ran and reported this many mutations.
    Updated(u64),
    /// The entry ran (or was empty) but no count is available.
    SuccessNoInfo,
}

/// A statement bound to one query text for its lifetime.
///
/// Parameter setters mutate the *current* batch entry; [`add_batch`] freezes
/// it and starts a fresh one. Plain executes use the current entry.
///
/// [`add_batch`]: PreparedStatement::add_batch
pub struct PreparedStatement {
    stmt: Statement,
    query: String,
    rewrite_batches: bool,
    // Never empty; the last entry is the current one.
    batches: Vec<Params>,
}

impl PreparedStatement {
    pub(crate) fn new(
        core: Arc<ConnectionCore>,
        translator: Option<Arc<dyn QueryTranslator>>,
        fetch_size: u64,
        query: String,
        rewrite_batches: bool,
    ) -> Self {
        Self {
            stmt: Statement::new(core, translator, fetch_size),
            query,
            rewrite_batches,
            batches: vec![Params::new()],
        }
    }

    /// Bind a parameter in the current batch entry.
    pub fn set(&mut self, key: impl ParamKey, value: impl Into<Value>) -> Result<()> {
        let name = key.into_name()?;
        self.current_mut().insert(name, value.into());
        Ok(())
    }

    /// Bind a parameter to null in the current batch entry.
    pub fn set_null(&mut self, key: impl ParamKey) -> Result<()> {
        self.set(key, Value::Null)
    }

    /// Clear the current batch entry's bindings.
    pub fn clear_parameters(&mut self) {
        self.current_mut().clear();
    }

    /// Freeze the current bindings as one batch entry and start a new one.
    pub fn add_batch(&mut self) {
        self.batches.push(Params::new());
    }

    /// Drop all batch entries, including the current bindings.
    pub fn clear_batch(&mut self) {
        self.batches.clear();
        self.batches.push(Params::new());
    }

    /// Run the query with the current bindings, expecting rows.
    pub fn execute_query(&mut self) -> Result<&mut ResultSet> {
        let query = self.query.clone();
        let params = self.current_params();
        self.stmt.execute_query_with(&query, true, params)
    }

    /// Run the query with the current bindings, expecting an update count.
    pub fn execute_update(&mut self) -> Result<u64> {
        let query = self.query.clone();
        let params = self.current_params();
        self.stmt.execute_update_with(&query, true, params)
    }

    /// Run the query with the current bindings without knowing its shape.
    /// See [`Statement::execute`] for the classification rule.
    pub fn execute(&mut self) -> Result<bool> {
        let query = self.query.clone();
        let params = self.current_params();
        self.stmt.execute_with(&query, true, params)
    }

    /// Execute every batch entry.
    ///
    /// With batch rewriting enabled the whole batch runs as a single UNWIND
    /// query in one round trip and the result is one total count; otherwise
    /// each non-empty entry runs as its own update, one round trip apiece.
    /// The first failure aborts with [`Error::BatchFailed`] carrying the
    /// outcomes collected so far. The batch queue is cleared on return,
    /// success or not.
    pub fn execute_batch(&mut self) -> Result<Vec<BatchOutcome>> {
        let result = if self.rewrite_batches {
            self.execute_batch_rewritten()
        } else {
            self.execute_batch_naive()
        };
        self.clear_batch();
        result
    }

    fn execute_batch_naive(&mut self) -> Result<Vec<BatchOutcome>> {
        let entries = self.batches.clone();
        let query = self.query.clone();
        let mut outcomes = Vec::with_capacity(entries.len());
        for params in entries {
            if params.is_empty() {
                outcomes.push(BatchOutcome::SuccessNoInfo);
                continue;
            }
            match self.stmt.execute_update_with(&query, true, params) {
                Ok(count) => outcomes.push(BatchOutcome::Updated(count)),
                Err(err) => {
                    return Err(Error::BatchFailed {
                        partial: outcomes,
                        source: Box::new(err),
                    });
                }
            }
        }
        Ok(outcomes)
    }

    fn execute_batch_rewritten(&mut self) -> Result<Vec<BatchOutcome>> {
        let entries: Vec<Params> = self
            .batches
            .iter()
            .filter(|params| !params.is_empty())
            .cloned()
            .collect();
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let mut key_set = BTreeSet::new();
        for params in &entries {
            key_set.extend(params.keys().cloned());
        }
        let keys = longest_first(key_set);
        // Translate the bound text first; the generated UNWIND wrapper is
        // native and must not pass through a translator again.
        let translated = self.stmt.process_query(&self.query, true)?;
        let rewritten = rewrite_query(&translated, &keys);
        let list: Vec<Value> = entries.into_iter().map(Value::Map).collect();
        let mut params = Params::new();
        params.insert(BATCH_LIST_PARAM.to_string(), Value::List(list));
        match self.stmt.execute_update_with(&rewritten, false, params) {
            Ok(count) => Ok(vec![BatchOutcome::Updated(count)]),
            Err(err) => Err(Error::BatchFailed {
                partial: Vec::new(),
                source: Box::new(err),
            }),
        }
    }

    /// Rows from the last [`PreparedStatement::execute`], when it produced
    /// any.
    pub fn result_set(&mut self) -> Result<Option<&mut ResultSet>> {
        self.stmt.result_set()
    }

    /// Update count from the last [`PreparedStatement::execute`], when it
    /// was an update.
    pub fn update_count(&self) -> Option<u64> {
        self.stmt.update_count()
    }

    /// See [`Statement::get_more_results`].
    pub fn get_more_results(&mut self) -> Result<bool> {
        self.stmt.get_more_results()
    }

    /// See [`Statement::warnings`].
    pub fn warnings(&self) -> &[String] {
        self.stmt.warnings()
    }

    /// See [`Statement::clear_warnings`].
    pub fn clear_warnings(&mut self) {
        self.stmt.clear_warnings();
    }

    /// Close the statement and its open result set. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        self.stmt.close()
    }

    /// True once closed.
    pub fn is_closed(&self) -> bool {
        self.stmt.is_closed()
    }

    /// See [`Statement::set_fetch_size`].
    pub fn set_fetch_size(&mut self, n: u64) -> Result<()> {
        self.stmt.set_fetch_size(n)
    }

    /// See [`Statement::set_max_rows`].
    pub fn set_max_rows(&mut self, n: u64) -> Result<()> {
        self.stmt.set_max_rows(n)
    }

    /// See [`Statement::set_max_field_size`].
    pub fn set_max_field_size(&mut self, n: usize) -> Result<()> {
        self.stmt.set_max_field_size(n)
    }

    /// See [`Statement::set_query_timeout`].
    pub fn set_query_timeout(&mut self, seconds: u64) -> Result<()> {
        self.stmt.set_query_timeout(seconds)
    }

    /// See [`Statement::set_close_on_completion`].
    pub fn set_close_on_completion(&mut self) -> Result<()> {
        self.stmt.set_close_on_completion()
    }

    fn current_params(&self) -> Params {
        self.batches.last().cloned().unwrap_or_default()
    }

    fn current_mut(&mut self) -> &mut Params {
        if self.batches.is_empty() {
            self.batches.push(Params::new());
        }
        let last = self.batches.len() - 1;
        &mut self.batches[last]
    }
}

impl std::fmt::Debug for PreparedStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedStatement")
            .field("query", &self.query)
            .field("batch_entries", &self.batches.len())
            .field("rewrite_batches", &self.rewrite_batches)
            .finish_non_exhaustive()
    }
}

fn longest_first(keys: BTreeSet<String>) -> Vec<String> {
    let mut keys: Vec<String> = keys.into_iter().collect();
    keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    keys
}

/// Rewrite a parameterized query into its single-round-trip batch form:
/// every `$key` becomes an access into one element of a list parameter and
/// the whole query iterates over that list.
fn rewrite_query(query: &str, keys_longest_first: &[String]) -> String {
    let mut text = query.to_string();
    for key in keys_longest_first {
        text = replace_placeholder(&text, key);
    }
    format!("UNWIND ${BATCH_LIST_PARAM} AS {BATCH_ITEM} {text}")
}

/// Replace `$key` with `__parameter['key']` unless the placeholder continues
/// with a digit (then it belongs to a longer key handled earlier).
fn replace_placeholder(text: &str, key: &str) -> String {
    let needle = format!("${key}");
    let replacement = format!("{BATCH_ITEM}['{key}']");
    let mut out = String::with_capacity(text.len() + replacement.len());
    let mut rest = text;
    while let Some(pos) = rest.find(&needle) {
        let (head, tail) = rest.split_at(pos);
        out.push_str(head);
        let (matched, after) = tail.split_at(needle.len());
        if after.as_bytes().first().is_some_and(u8::is_ascii_digit) {
            out.push_str(matched);
        } else {
            out.push_str(&replacement);
        }
        rest = after;
    }
    out.push_str(rest);
    out
}
