//! A synchronous, cursor-based client for Bolt-speaking graph databases.
//!
//! # Features
//!
//! - **Blocking API over a pipelined wire**: RUN, PULL, and BEGIN ride the
//!   same round trip; callers see plain synchronous calls
//! - **Lazy result paging**: the server materializes at most one fetch-size
//!   page ahead of the cursor
//! - **Transaction state machine**: autocommit and explicit transactions
//!   with precise failure classification (dead transaction vs. dead
//!   connection)
//! - **Batched prepared statements**: optional single-round-trip rewrite of
//!   a whole batch into one UNWIND query
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use zero_bolt::{Connection, DriverConfig, WireConnection};
//!
//! fn run(wire: Arc<dyn WireConnection>) -> zero_bolt::Result<()> {
//!     let conn = Connection::new(wire, DriverConfig::new())?;
//!
//!     let mut stmt = conn.create_statement()?;
//!     let rs = stmt.execute_query("MATCH (n:Person) RETURN n.name AS name")?;
//!     while rs.next()? {
//!         println!("{:?}", rs.get_string("name")?);
//!     }
//!
//!     conn.close()?;
//!     Ok(())
//! }
//! ```

pub mod connection;
pub mod error;
pub mod opts;
pub mod prepared;
pub mod result_set;
pub mod row;
pub mod statement;
pub mod summary;
pub mod transaction;
pub mod translator;
pub mod value;
pub mod wire;

pub use connection::Connection;
pub use error::{CoercionError, Error, Result};
pub use opts::{DEFAULT_FETCH_SIZE, DriverConfig};
pub use prepared::{BatchOutcome, ParamKey, PreparedStatement};
pub use result_set::{ColumnRef, ResultSet};
pub use row::Row;
pub use statement::Statement;
pub use summary::{ResultSummary, UpdateCounters};
pub use transaction::{RunResult, Transaction, TransactionOptions, TransactionState};
pub use translator::{FORCE_NATIVE, QueryTranslator};
pub use value::{Params, Value};
pub use wire::{
    CommitAck, DiscardAck, Page, RunAck, StreamRef, TransactionKind, WireConnection, WireError,
    WireFuture,
};
