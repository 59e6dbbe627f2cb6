//! Scripted wire double shared by the integration suites.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::future;
use parking_lot::Mutex;
use zero_bolt::{
    CommitAck, DiscardAck, Page, Params, ResultSummary, Row, RunAck, StreamRef, TransactionKind,
    UpdateCounters, Value, WireConnection, WireError, WireFuture,
};

/// One scripted reply for a wire operation.
pub enum Reply<T> {
    Ok(T),
    Err(WireError),
    /// A future that never resolves, for timeout tests.
    Never,
}

/// A wire double: every call is logged, replies come from per-operation
/// scripts, and unscripted calls succeed with a default reply.
#[derive(Default)]
pub struct MockWire {
    begin: Mutex<VecDeque<Reply<()>>>,
    run: Mutex<VecDeque<Reply<RunAck>>>,
    pull: Mutex<VecDeque<Reply<Page>>>,
    discard: Mutex<VecDeque<Reply<DiscardAck>>>,
    commit: Mutex<VecDeque<Reply<CommitAck>>>,
    rollback: Mutex<VecDeque<Reply<()>>>,
    reset: Mutex<VecDeque<Reply<()>>>,
    log: Mutex<Vec<String>>,
}

impl MockWire {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script_begin(&self, reply: Reply<()>) {
        self.begin.lock().push_back(reply);
    }

    pub fn script_run(&self, reply: Reply<RunAck>) {
        self.run.lock().push_back(reply);
    }

    pub fn script_pull(&self, reply: Reply<Page>) {
        self.pull.lock().push_back(reply);
    }

    pub fn script_discard(&self, reply: Reply<DiscardAck>) {
        self.discard.lock().push_back(reply);
    }

    pub fn script_commit(&self, reply: Reply<CommitAck>) {
        self.commit.lock().push_back(reply);
    }

    pub fn script_rollback(&self, reply: Reply<()>) {
        self.rollback.lock().push_back(reply);
    }

    /// Every call so far, in wire order. Entries look like `run:MATCH ...`
    /// or `pull(-1,50)`.
    pub fn calls(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    /// Operation names only, in wire order.
    pub fn ops(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|entry| {
                entry
                    .split(|c: char| c == ':' || c == '(')
                    .next()
                    .unwrap_or(entry)
                    .to_string()
            })
            .collect()
    }

    /// Number of calls of one operation.
    pub fn count(&self, op: &str) -> usize {
        self.ops().iter().filter(|name| *name == op).count()
    }

    fn respond<T: Send + 'static>(
        &self,
        entry: String,
        queue: &Mutex<VecDeque<Reply<T>>>,
        default: T,
    ) -> WireFuture<T> {
        self.log.lock().push(entry);
        match queue.lock().pop_front() {
            None => Box::pin(future::ready(Ok(default))),
            Some(Reply::Ok(value)) => Box::pin(future::ready(Ok(value))),
            Some(Reply::Err(err)) => Box::pin(future::ready(Err(err))),
            Some(Reply::Never) => Box::pin(future::pending()),
        }
    }
}

impl WireConnection for MockWire {
    fn begin(&self, _kind: TransactionKind, bookmarks: &[String], _flush: bool) -> WireFuture<()> {
        self.respond(format!("begin({})", bookmarks.len()), &self.begin, ())
    }

    fn run(&self, query: &str, _parameters: Params, _flush: bool) -> WireFuture<RunAck> {
        self.respond(
            format!("run:{query}"),
            &self.run,
            RunAck {
                query_id: 0,
                keys: Vec::new(),
            },
        )
    }

    fn pull(&self, target: StreamRef, n: i64) -> WireFuture<Page> {
        self.respond(
            format!("pull({},{n})", target.query_id()),
            &self.pull,
            Page::default(),
        )
    }

    fn discard(&self, target: StreamRef, n: i64, _flush: bool) -> WireFuture<DiscardAck> {
        self.respond(
            format!("discard({},{n})", target.query_id()),
            &self.discard,
            DiscardAck::default(),
        )
    }

    fn commit(&self) -> WireFuture<CommitAck> {
        self.respond("commit".into(), &self.commit, CommitAck::default())
    }

    fn rollback(&self) -> WireFuture<()> {
        self.respond("rollback".into(), &self.rollback, ())
    }

    fn reset(&self, _flush: bool) -> WireFuture<()> {
        self.respond("reset".into(), &self.reset, ())
    }

    fn close(&self) -> WireFuture<()> {
        self.log.lock().push("close".into());
        Box::pin(future::ready(Ok(())))
    }
}

/// A run acknowledgement with the given query id and column keys.
pub fn run_ack(query_id: i64, keys: &[&str]) -> RunAck {
    RunAck {
        query_id,
        keys: keys.iter().map(|k| (*k).to_string()).collect(),
    }
}

/// A page of single-column integer rows.
pub fn int_page(values: std::ops::Range<i64>, has_more: bool) -> Page {
    Page {
        rows: values.map(|v| Row::new(vec![Value::Integer(v)])).collect(),
        has_more,
        summary: (!has_more).then(ResultSummary::default),
    }
}

/// A page built from explicit rows.
pub fn page(rows: Vec<Vec<Value>>, has_more: bool, summary: Option<ResultSummary>) -> Page {
    Page {
        rows: rows.into_iter().map(Row::new).collect(),
        has_more,
        summary,
    }
}

/// A summary reporting `nodes_created` mutations.
pub fn update_summary(nodes_created: u64) -> ResultSummary {
    ResultSummary {
        counters: UpdateCounters {
            nodes_created,
            ..UpdateCounters::default()
        },
    }
}

/// A server failure, as the wire layer reports it.
pub fn server_error(code: &str, message: &str) -> WireError {
    WireError::Server {
        code: code.to_string(),
        message: message.to_string(),
    }
}

/// A socket failure, as the wire layer reports it.
pub fn io_error() -> WireError {
    WireError::Io(std::io::Error::new(
        std::io::ErrorKind::ConnectionReset,
        "connection reset by peer",
    ))
}
