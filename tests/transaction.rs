//! Transaction state machine and wire composition tests.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MockWire, Reply, int_page, io_error, run_ack, server_error};
use tokio::runtime::Runtime;
use zero_bolt::{
    Error, Params, Transaction, TransactionOptions, TransactionState, WireConnection,
};

fn runtime() -> Arc<Runtime> {
    Arc::new(
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap(),
    )
}

fn transaction(wire: &Arc<MockWire>, auto_commit: bool) -> Transaction {
    let wire = Arc::clone(wire) as Arc<dyn WireConnection>;
    Transaction::new(
        wire,
        runtime(),
        TransactionOptions {
            auto_commit,
            ..TransactionOptions::default()
        },
    )
}

#[test]
fn first_operation_joins_begin_run_and_pull() {
    let wire = MockWire::new();
    wire.script_run(Reply::Ok(run_ack(7, &["n"])));
    wire.script_pull(Reply::Ok(int_page(0..3, false)));

    let mut tx = transaction(&wire, false);
    assert_eq!(tx.state(), TransactionState::New);

    let result = tx.run_and_pull("RETURN 1", Params::new(), 50, None).unwrap();
    assert_eq!(tx.state(), TransactionState::Ready);
    assert_eq!(result.run.query_id, 7);
    assert_eq!(result.page.rows.len(), 3);

    // BEGIN is enqueued at construction; PULL targets the last submitted
    // stream because the RUN ack is not known when it is enqueued.
    assert_eq!(
        wire.calls(),
        vec!["begin(0)", "run:RETURN 1", "pull(-1,50)"]
    );
}

#[test]
fn begin_is_joined_only_once() {
    let wire = MockWire::new();
    let mut tx = transaction(&wire, false);
    tx.run_and_pull("RETURN 1", Params::new(), 10, None).unwrap();
    tx.run_and_pull("RETURN 2", Params::new(), 10, None).unwrap();
    assert_eq!(wire.count("begin"), 1);
    assert_eq!(wire.count("run"), 2);
}

#[test]
fn committed_is_terminal_without_network() {
    let wire = MockWire::new();
    let mut tx = transaction(&wire, false);
    tx.run_and_pull("RETURN 1", Params::new(), 10, None).unwrap();
    tx.commit().unwrap();
    assert_eq!(tx.state(), TransactionState::Committed);

    let calls_before = wire.calls().len();
    assert!(matches!(
        tx.run_and_pull("RETURN 2", Params::new(), 10, None),
        Err(Error::IllegalState(_))
    ));
    assert!(matches!(tx.commit(), Err(Error::IllegalState(_))));
    assert!(matches!(tx.rollback(), Err(Error::IllegalState(_))));
    assert_eq!(wire.calls().len(), calls_before);
}

#[test]
fn rolled_back_is_terminal() {
    let wire = MockWire::new();
    let mut tx = transaction(&wire, false);
    tx.rollback().unwrap();
    assert_eq!(tx.state(), TransactionState::RolledBack);
    assert!(matches!(tx.rollback(), Err(Error::IllegalState(_))));
}

#[test]
fn server_failure_fails_autocommit_transaction() {
    let wire = MockWire::new();
    wire.script_run(Reply::Err(server_error(
        "Neo.ClientError.Statement.SyntaxError",
        "bad query",
    )));

    let mut tx = transaction(&wire, true);
    let err = tx
        .run_and_pull("RETRN 1", Params::new(), 10, None)
        .unwrap_err();
    assert!(matches!(err, Error::TransactionFailed { .. }));
    assert_eq!(tx.state(), TransactionState::Failed);

    // The stored failure replays without touching the wire again.
    let calls_before = wire.calls().len();
    let replayed = tx
        .run_and_pull("RETURN 1", Params::new(), 10, None)
        .unwrap_err();
    assert!(matches!(replayed, Error::TransactionFailed { .. }));
    assert_eq!(wire.calls().len(), calls_before);
}

#[test]
fn server_failure_in_explicit_transaction_requires_rollback() {
    let wire = MockWire::new();
    wire.script_run(Reply::Err(server_error(
        "Neo.ClientError.Statement.SyntaxError",
        "bad query",
    )));

    let mut tx = transaction(&wire, false);
    tx.run_and_pull("RETRN 1", Params::new(), 10, None)
        .unwrap_err();
    assert_eq!(tx.state(), TransactionState::OpenFailed);

    // Commit replays the stored failure; rollback completes locally.
    assert!(matches!(tx.commit(), Err(Error::TransactionFailed { .. })));
    let calls_before = wire.calls().len();
    tx.rollback().unwrap();
    assert_eq!(tx.state(), TransactionState::Failed);
    assert_eq!(wire.calls().len(), calls_before);
}

#[test]
fn io_failure_is_connection_fatal() {
    let wire = MockWire::new();
    wire.script_pull(Reply::Err(io_error()));

    let mut tx = transaction(&wire, true);
    let err = tx
        .run_and_pull("RETURN 1", Params::new(), 10, None)
        .unwrap_err();
    assert!(matches!(err, Error::ConnectionFatal(_)));
    assert!(err.is_connection_broken());
}

#[test]
fn timeout_fails_transaction_with_distinct_error() {
    let wire = MockWire::new();
    wire.script_pull(Reply::Never);

    let mut tx = transaction(&wire, true);
    let err = tx
        .run_and_pull(
            "RETURN 1",
            Params::new(),
            10,
            Some(Duration::from_millis(50)),
        )
        .unwrap_err();
    assert!(matches!(err, Error::QueryTimeout));
    assert_eq!(tx.state(), TransactionState::Failed);
    assert!(matches!(tx.commit(), Err(Error::QueryTimeout)));
}

#[test]
fn rollback_drains_open_stream_first() {
    let wire = MockWire::new();
    wire.script_run(Reply::Ok(run_ack(3, &["n"])));
    wire.script_pull(Reply::Ok(int_page(0..2, true)));

    let mut tx = transaction(&wire, false);
    tx.run_and_pull("MATCH (n) RETURN n", Params::new(), 2, None)
        .unwrap();
    tx.rollback().unwrap();

    assert_eq!(
        wire.ops(),
        vec!["begin", "run", "pull", "discard", "rollback"]
    );
    assert!(wire.calls().contains(&"discard(3,-1)".to_string()));
}

#[test]
fn commit_drains_open_stream_first() {
    let wire = MockWire::new();
    wire.script_run(Reply::Ok(run_ack(4, &["n"])));
    wire.script_pull(Reply::Ok(int_page(0..2, true)));

    let mut tx = transaction(&wire, false);
    tx.run_and_pull("MATCH (n) RETURN n", Params::new(), 2, None)
        .unwrap();
    tx.commit().unwrap();

    assert_eq!(wire.ops(), vec!["begin", "run", "pull", "discard", "commit"]);
}

#[test]
fn reset_precedes_begin_when_requested() {
    let wire = MockWire::new();
    let as_wire = Arc::clone(&wire) as Arc<dyn WireConnection>;
    let mut tx = Transaction::new(
        as_wire,
        runtime(),
        TransactionOptions {
            auto_commit: false,
            reset_first: true,
            ..TransactionOptions::default()
        },
    );
    tx.run_and_pull("RETURN 1", Params::new(), 10, None).unwrap();
    assert_eq!(wire.ops(), vec!["reset", "begin", "run", "pull"]);
}

#[test]
fn run_and_discard_with_commit_is_one_round_trip() {
    let wire = MockWire::new();
    let mut tx = transaction(&wire, true);
    tx.run_and_discard("CREATE (n)", Params::new(), None, true)
        .unwrap();
    assert_eq!(tx.state(), TransactionState::Committed);
    assert_eq!(wire.ops(), vec!["begin", "run", "discard", "commit"]);
}

#[test]
fn run_and_discard_without_commit_stays_ready() {
    let wire = MockWire::new();
    let mut tx = transaction(&wire, false);
    tx.run_and_discard("CREATE (n)", Params::new(), None, false)
        .unwrap();
    assert_eq!(tx.state(), TransactionState::Ready);
    assert_eq!(wire.count("commit"), 0);
}

#[test]
fn explicit_fail_marks_transaction() {
    let wire = MockWire::new();
    let mut tx = transaction(&wire, false);
    tx.fail(&Error::TransactionFailed {
        code: None,
        message: "abandoned by caller".into(),
    })
    .unwrap();
    assert_eq!(tx.state(), TransactionState::OpenFailed);
    assert!(matches!(
        tx.run_and_pull("RETURN 1", Params::new(), 10, None),
        Err(Error::TransactionFailed { .. })
    ));
}
