//! Lazily paged result cursors.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::row::Row;
use crate::statement::StatementShared;
use crate::transaction::Transaction;
use crate::value::Value;
use crate::wire::{Page, RunAck};

mod sealed {
    pub trait Sealed {}
    impl Sealed for usize {}
    impl Sealed for &str {}
}

/// A column reference: a 1-based ordinal (`usize`) or a label (`&str`).
pub trait ColumnRef: sealed::Sealed {
    #[doc(hidden)]
    fn resolve(&self, keys: &[String]) -> Result<usize>;
    #[doc(hidden)]
    fn describe(&self) -> String;
}

impl ColumnRef for usize {
    fn resolve(&self, keys: &[String]) -> Result<usize> {
        if *self == 0 || *self > keys.len() {
            return Err(Error::InvalidColumn(format!(
                "ordinal {self} out of range 1..={}",
                keys.len()
            )));
        }
        Ok(*self - 1)
    }

    fn describe(&self) -> String {
        self.to_string()
    }
}

impl ColumnRef for &str {
    fn resolve(&self, keys: &[String]) -> Result<usize> {
        keys.iter()
            .position(|key| key.as_str() == *self)
            .ok_or_else(|| Error::InvalidColumn(format!("no column labeled {self:?}")))
    }

    fn describe(&self) -> String {
        (*self).to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    BeforeFirst,
    At(usize),
    AfterLast,
}

/// A forward-only cursor over a paged result stream.
///
/// Rows are pulled from the server at most `fetch_size` at a time; the
/// server never materializes more than one page ahead of the cursor.
pub struct ResultSet {
    tx: Arc<Mutex<Transaction>>,
    stmt: Arc<StatementShared>,
    run: RunAck,
    page: Page,
    position: Position,
    fetch_size: u64,
    // Rows the cursor may still yield under the statement's max-rows cap.
    remaining: Option<u64>,
    max_field_size: usize,
    closed: bool,
}

impl ResultSet {
    pub(crate) fn new(
        tx: Arc<Mutex<Transaction>>,
        stmt: Arc<StatementShared>,
        run: RunAck,
        page: Page,
        fetch_size: u64,
        max_rows: u64,
        max_field_size: usize,
    ) -> Self {
        Self {
            tx,
            stmt,
            run,
            page,
            position: Position::BeforeFirst,
            fetch_size,
            remaining: (max_rows > 0).then_some(max_rows),
            max_field_size,
            closed: false,
        }
    }

    /// Column labels, in result order.
    pub fn keys(&self) -> &[String] {
        &self.run.keys
    }

    /// Advance to the next row. Pulls the next page from the server when the
    /// current one is consumed and more rows remain.
    #[expect(
        clippy::should_implement_trait,
        reason = "cursor advance is fallible and named after the wider driver convention"
    )]
    pub fn next(&mut self) -> Result<bool> {
        self.assert_open()?;
        loop {
            if self.remaining == Some(0) {
                self.position = Position::AfterLast;
                return Ok(false);
            }
            let candidate = match self.position {
                Position::BeforeFirst => 0,
                Position::At(i) => i + 1,
                Position::AfterLast => return Ok(false),
            };
            if candidate < self.page.rows.len() {
                self.position = Position::At(candidate);
                if let Some(remaining) = self.remaining.as_mut() {
                    *remaining -= 1;
                }
                return Ok(true);
            }
            if !self.page.has_more {
                self.position = Position::AfterLast;
                return Ok(false);
            }
            let fetch = match self.remaining {
                Some(remaining) => remaining.min(self.fetch_size),
                None => self.fetch_size,
            };
            self.page = self.tx.lock().pull(&self.run, fetch)?;
            self.position = Position::BeforeFirst;
        }
    }

    /// Close the cursor. Drains any rows the server still holds and, in
    /// autocommit mode, commits in the same round trip. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let result = self.tx.lock().finish_stream(&self.run, true);
        if self.stmt.close_on_completion.load(Ordering::SeqCst) {
            self.stmt.closed.store(true, Ordering::SeqCst);
        }
        result
    }

    /// True once [`ResultSet::close`] ran.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Rows requested per subsequent PULL.
    pub fn set_fetch_size(&mut self, n: u64) -> Result<()> {
        self.assert_open()?;
        if n == 0 {
            return Err(Error::InvalidArgument(
                "fetch size must be positive on an open cursor".into(),
            ));
        }
        self.fetch_size = n;
        Ok(())
    }

    /// Current per-PULL row request size.
    pub fn fetch_size(&self) -> u64 {
        self.fetch_size
    }

    /// Raw value of a column in the current row.
    pub fn get_value(&self, column: impl ColumnRef) -> Result<Value> {
        self.value_of(&column).cloned()
    }

    /// True when the named column in the current row is null.
    pub fn is_null(&self, column: impl ColumnRef) -> Result<bool> {
        Ok(self.value_of(&column)?.is_null())
    }

    /// String value, truncated to the statement's max field size.
    pub fn get_string(&self, column: impl ColumnRef) -> Result<Option<String>> {
        let value = self.value_of(&column)?;
        if value.is_null() {
            return Ok(None);
        }
        let s = value
            .as_string()
            .map_err(|e| Error::coercion(column.describe(), e))?;
        Ok(Some(self.truncate_string(s)))
    }

    /// Boolean value.
    pub fn get_bool(&self, column: impl ColumnRef) -> Result<Option<bool>> {
        let value = self.value_of(&column)?;
        if value.is_null() {
            return Ok(None);
        }
        value
            .as_bool()
            .map(Some)
            .map_err(|e| Error::coercion(column.describe(), e))
    }

    /// 64-bit integer value.
    pub fn get_i64(&self, column: impl ColumnRef) -> Result<Option<i64>> {
        let value = self.value_of(&column)?;
        if value.is_null() {
            return Ok(None);
        }
        value
            .as_i64()
            .map(Some)
            .map_err(|e| Error::coercion(column.describe(), e))
    }

    /// 32-bit integer value; fails when the stored integer does not fit.
    pub fn get_i32(&self, column: impl ColumnRef) -> Result<Option<i32>> {
        let value = self.value_of(&column)?;
        if value.is_null() {
            return Ok(None);
        }
        value
            .as_i32()
            .map(Some)
            .map_err(|e| Error::coercion(column.describe(), e))
    }

    /// 16-bit integer value; fails when the stored integer does not fit.
    pub fn get_i16(&self, column: impl ColumnRef) -> Result<Option<i16>> {
        let value = self.value_of(&column)?;
        if value.is_null() {
            return Ok(None);
        }
        value
            .as_i16()
            .map(Some)
            .map_err(|e| Error::coercion(column.describe(), e))
    }

    /// 64-bit float value.
    pub fn get_f64(&self, column: impl ColumnRef) -> Result<Option<f64>> {
        let value = self.value_of(&column)?;
        if value.is_null() {
            return Ok(None);
        }
        value
            .as_f64()
            .map(Some)
            .map_err(|e| Error::coercion(column.describe(), e))
    }

    /// 32-bit float value; fails when narrowing would change the value.
    pub fn get_f32(&self, column: impl ColumnRef) -> Result<Option<f32>> {
        let value = self.value_of(&column)?;
        if value.is_null() {
            return Ok(None);
        }
        value
            .as_f32()
            .map(Some)
            .map_err(|e| Error::coercion(column.describe(), e))
    }

    /// Byte-array value, truncated to the statement's max field size.
    pub fn get_bytes(&self, column: impl ColumnRef) -> Result<Option<Vec<u8>>> {
        let value = self.value_of(&column)?;
        if value.is_null() {
            return Ok(None);
        }
        let bytes = value
            .as_bytes()
            .map_err(|e| Error::coercion(column.describe(), e))?;
        let mut bytes = bytes.to_vec();
        if self.max_field_size > 0 {
            bytes.truncate(self.max_field_size);
        }
        Ok(Some(bytes))
    }

    /// List value.
    pub fn get_list(&self, column: impl ColumnRef) -> Result<Option<Vec<Value>>> {
        let value = self.value_of(&column)?;
        if value.is_null() {
            return Ok(None);
        }
        value
            .as_list()
            .map(|items| Some(items.to_vec()))
            .map_err(|e| Error::coercion(column.describe(), e))
    }

    /// Map value.
    pub fn get_map(&self, column: impl ColumnRef) -> Result<Option<HashMap<String, Value>>> {
        let value = self.value_of(&column)?;
        if value.is_null() {
            return Ok(None);
        }
        value
            .as_map()
            .map(|entries| Some(entries.clone()))
            .map_err(|e| Error::coercion(column.describe(), e))
    }

    fn assert_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::closed("result set"));
        }
        Ok(())
    }

    fn current_row(&self) -> Result<&Row> {
        self.assert_open()?;
        match self.position {
            Position::At(i) => self
                .page
                .rows
                .get(i)
                .ok_or_else(|| Error::IllegalState("cursor out of sync with page".into())),
            Position::BeforeFirst => {
                Err(Error::IllegalState("cursor is before the first row".into()))
            }
            Position::AfterLast => {
                Err(Error::IllegalState("cursor is after the last row".into()))
            }
        }
    }

    fn value_of(&self, column: &impl ColumnRef) -> Result<&Value> {
        let row = self.current_row()?;
        let index = column.resolve(&self.run.keys)?;
        row.get(index)
            .ok_or_else(|| Error::InvalidColumn(column.describe()))
    }

    fn truncate_string(&self, s: String) -> String {
        if self.max_field_size == 0 || s.chars().count() <= self.max_field_size {
            return s;
        }
        s.chars().take(self.max_field_size).collect()
    }
}

impl std::fmt::Debug for ResultSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSet")
            .field("keys", &self.run.keys)
            .field("position", &self.position)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
