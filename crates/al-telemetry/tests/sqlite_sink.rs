//! SQLite sink integration tests.

use al_common::{
    AuditEntry, CorrelationId, LocationRecord, Outcome, ResponseEntry, Tags, Timing,
};
use al_telemetry::record::LOCATION_KEY;
use al_telemetry::{BulkSink, Record, RowQuery, SinkError, SqliteSink, Value};
use chrono::DateTime;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn ts(s: &str) -> al_common::Timestamp {
    DateTime::parse_from_rfc3339(s).expect("timestamp")
}

fn audit(id: &str, at: &str, app: &str) -> AuditEntry {
    let mut entry = AuditEntry::new(id, "ItemAdded", CorrelationId::from("corr-1"))
        .with_tags(Tags::new(app, "test"));
    entry.timestamp = ts(at);
    entry
}

#[test]
fn test_ensure_table_is_idempotent_and_concurrent() {
    let dir = TempDir::new().expect("tempdir");
    let sink = Arc::new(SqliteSink::open(dir.path().join("audit.db")).expect("open"));
    let schema = AuditEntry::schema("Audits");

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let sink = Arc::clone(&sink);
            let schema = schema.clone();
            thread::spawn(move || sink.ensure_table(&schema))
        })
        .collect();
    for handle in handles {
        handle.join().expect("join").expect("ensure_table");
    }
    sink.ensure_table(&schema).expect("again");
    assert_eq!(sink.count(&schema).expect("count"), 0);
}

#[test]
fn test_write_and_query_newest_first() {
    let sink = SqliteSink::open_in_memory().expect("open");
    let schema = AuditEntry::schema("Audits");
    sink.ensure_table(&schema).expect("ensure");

    let rows: Vec<_> = [
        audit("e1", "2024-03-01T10:00:00+00:00", "shop"),
        audit("e2", "2024-03-01T12:30:00+02:00", "shop"),
        audit("e3", "2024-03-01T11:00:00+00:00", "billing"),
    ]
    .iter()
    .map(Record::project)
    .collect();
    assert_eq!(sink.write_batch(&schema, &rows).expect("write"), 3);

    // e2 is 10:30 UTC, so ordering must compare instants, not text.
    let all = sink.query(&schema, &RowQuery::default()).expect("query");
    let ids: Vec<_> = all.iter().map(|r| r[0].clone()).collect();
    assert_eq!(
        ids,
        vec![Value::from("e3"), Value::from("e2"), Value::from("e1")]
    );
    assert_eq!(all[1][6], Value::Timestamp(ts("2024-03-01T12:30:00+02:00")));

    let shop = sink
        .query(
            &schema,
            &RowQuery::default()
                .for_application("shop")
                .between(Some(ts("2024-03-01T10:15:00Z")), None),
        )
        .expect("query");
    assert_eq!(shop.len(), 1);
    assert_eq!(shop[0][0], Value::from("e2"));

    let limited = sink
        .query(&schema, &RowQuery::default().with_limit(1))
        .expect("query");
    assert_eq!(limited.len(), 1);
}

#[test]
fn test_bad_row_rejects_batch_without_partial_write() {
    let sink = SqliteSink::open_in_memory().expect("open");
    let schema = AuditEntry::schema("Audits");
    sink.ensure_table(&schema).expect("ensure");

    let good = audit("e1", "2024-03-01T10:00:00Z", "shop").project();
    let mut short = good.clone();
    short.pop();

    let err = sink.write_batch(&schema, &[good, short]).unwrap_err();
    assert!(matches!(err, SinkError::Schema(_)));
    assert_eq!(sink.count(&schema).expect("count"), 0);
}

#[test]
fn test_write_to_missing_table_fails() {
    let sink = SqliteSink::open_in_memory().expect("open");
    let schema = AuditEntry::schema("Audits");
    let rows = vec![audit("e1", "2024-03-01T10:00:00Z", "shop").project()];
    assert!(matches!(
        sink.write_batch(&schema, &rows),
        Err(SinkError::Sqlite(_))
    ));
}

#[test]
fn test_response_round_trip_preserves_elapsed() {
    let sink = SqliteSink::open_in_memory().expect("open");
    let schema = ResponseEntry::schema("Responses");
    sink.ensure_table(&schema).expect("ensure");

    let entry = ResponseEntry::new(
        "resp-1",
        "req-1",
        "/items",
        CorrelationId::new(),
        Timing::between(ts("2024-03-01T10:00:00Z"), ts("2024-03-01T10:00:01.5Z")),
        Outcome::failure("timeout"),
    );
    sink.write_batch(&schema, &[entry.project()]).expect("write");

    let rows = sink.query(&schema, &RowQuery::default()).expect("query");
    assert_eq!(rows, vec![entry.project()]);
}

#[test]
fn test_distinct_locations() {
    let sink = SqliteSink::open_in_memory().expect("open");
    let schema = LocationRecord::schema("Locations");
    assert!(sink
        .distinct_values(&schema, LOCATION_KEY)
        .expect("missing table")
        .is_empty());

    sink.ensure_table(&schema).expect("ensure");
    let rows: Vec<_> = ["10.0.0.2", "10.0.0.1", "10.0.0.2"]
        .iter()
        .map(|a| LocationRecord::unresolved(*a).project())
        .collect();
    sink.write_batch(&schema, &rows).expect("write");

    assert_eq!(
        sink.distinct_values(&schema, LOCATION_KEY).expect("distinct"),
        vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()]
    );
    assert!(matches!(
        sink.distinct_values(&schema, "Nope"),
        Err(SinkError::Schema(_))
    ));
}
