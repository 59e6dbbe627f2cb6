//! Driver configuration.

use std::sync::Arc;

use crate::translator::QueryTranslator;

/// Default number of records requested per PULL.
pub const DEFAULT_FETCH_SIZE: u64 = 1000;

/// Configuration applied to every connection built from it.
#[derive(Clone, Default)]
pub struct DriverConfig {
    fetch_size: Option<u64>,
    rewrite_batches: bool,
    translator: Option<Arc<dyn QueryTranslator>>,
}

impl DriverConfig {
    /// Configuration with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records requested per PULL for statements that do not override it.
    /// `0` restores the default.
    #[must_use]
    pub fn fetch_size(mut self, n: u64) -> Self {
        self.fetch_size = (n > 0).then_some(n);
        self
    }

    /// Rewrite batched parameterized statements into a single UNWIND query.
    #[must_use]
    pub fn rewrite_batches(mut self, on: bool) -> Self {
        self.rewrite_batches = on;
        self
    }

    /// Translate statement text through `translator` before execution.
    #[must_use]
    pub fn translator(mut self, translator: Arc<dyn QueryTranslator>) -> Self {
        self.translator = Some(translator);
        self
    }

    pub(crate) fn effective_fetch_size(&self) -> u64 {
        self.fetch_size.unwrap_or(DEFAULT_FETCH_SIZE)
    }

    pub(crate) fn rewrites_batches(&self) -> bool {
        self.rewrite_batches
    }

    pub(crate) fn translator_handle(&self) -> Option<Arc<dyn QueryTranslator>> {
        self.translator.clone()
    }
}

impl std::fmt::Debug for DriverConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverConfig")
            .field("fetch_size", &self.fetch_size)
            .field("rewrite_batches", &self.rewrite_batches)
            .field("translator", &self.translator.is_some())
            .finish()
    }
}
