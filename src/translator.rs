//! Optional query translation.
//!
//! When a connection is configured with a translator, every statement text
//! passes through it before hitting the wire, unless the text carries the
//! [`FORCE_NATIVE`] escape marker outside of any quoted region.

use crate::error::Result;

/// Escape marker that bypasses a configured translator for one statement.
pub const FORCE_NATIVE: &str = "/*+ FORCE_NATIVE */";

/// Translates statement text from a foreign dialect into the native one.
pub trait QueryTranslator: Send + Sync {
    /// Translate `query`, or fail with a descriptive error.
    fn translate(&self, query: &str) -> Result<String>;
}

impl<F> QueryTranslator for F
where
    F: Fn(&str) -> Result<String> + Send + Sync,
{
    fn translate(&self, query: &str) -> Result<String> {
        self(query)
    }
}

/// True when `query` contains [`FORCE_NATIVE`] outside of single quotes,
/// double quotes, and backticks.
pub fn forces_native(query: &str) -> bool {
    let marker = FORCE_NATIVE.as_bytes();
    let bytes = query.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'\'' | b'"' | b'`' => quote = Some(b),
                _ => {
                    if bytes[i..].starts_with(marker) {
                        return true;
                    }
                }
            },
        }
        i += 1;
    }
    false
}
