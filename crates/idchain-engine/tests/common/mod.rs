#![allow(dead_code)]

use idchain_core::OperationState;
use idchain_engine::{ErrorKind, ErrorReport, OperationOutcome};

pub const HOUR: i64 = 60 * 60 * 1000;
pub const DAY: i64 = 24 * HOUR;

/// Kind of a failed outcome.
pub fn failure_kind(outcome: &OperationOutcome) -> ErrorKind {
    assert_eq!(outcome.state, OperationState::Failed, "{outcome:?}");
    let report: ErrorReport =
        serde_json::from_value(outcome.result.clone().expect("failure carries a report"))
            .expect("report decodes");
    report.kind
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
