use spans_metrics_lib::models::QueryRequest;
use spans_metrics_lib::query::{Dataset, InMemoryIndexer, TopEvents};
use spans_metrics_lib::settings::QuerySettings;
use spans_metrics_lib::{plan_query, PlanMode};
use std::path::PathBuf;
use std::process::Command;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn request() -> QueryRequest {
    let raw = std::fs::read_to_string(fixture("spans-request.json")).expect("read fixture");
    serde_json::from_str(&raw).expect("parse fixture")
}

#[test]
fn aggregate_plan_uses_light_self_time_and_splits_by_day() {
    let plan = plan_query(
        Dataset::SpansMetrics,
        PlanMode::Aggregate,
        InMemoryIndexer::new(true),
        request(),
        QuerySettings::default(),
    )
    .expect("plan");

    let json = serde_json::to_value(&plan).expect("serialize");
    assert_eq!(json["dataset"], "spansMetrics");
    assert_eq!(json["granularity"], "day");
    assert_eq!(json["limit"], 25);
    assert_eq!(json["hasTransaction"], false);
    assert_eq!(json["edges"].as_array().map(Vec::len), Some(2));
    assert_eq!(json["groupby"].as_array().map(Vec::len), Some(2));

    let mris: Vec<&str> = json["select"]
        .as_array()
        .expect("select")
        .iter()
        .filter_map(|item| item["metricMri"].as_str())
        .collect();
    assert_eq!(
        mris,
        vec![
            "d:spans/exclusive_time_light@millisecond",
            "d:spans/exclusive_time_light@millisecond"
        ]
    );
}

#[test]
fn transaction_filter_keeps_full_self_time() {
    let mut request = request();
    request.query = "transaction:/checkout span.op:db".to_string();
    let plan = plan_query(
        Dataset::SpansMetrics,
        PlanMode::Aggregate,
        InMemoryIndexer::new(true),
        request,
        QuerySettings::default(),
    )
    .expect("plan");
    let json = serde_json::to_value(&plan).expect("serialize");
    assert_eq!(json["hasTransaction"], true);
    assert!(json["select"]
        .as_array()
        .expect("select")
        .iter()
        .filter_map(|item| item["metricMri"].as_str())
        .all(|mri| mri == "d:spans/exclusive_time@millisecond"));
}

#[test]
fn top_events_timeseries_keeps_hourly_buckets() {
    let mut request = request();
    request.interval_seconds = Some(3_600);
    request.orderby.clear();
    let raw = std::fs::read_to_string(fixture("top-events.json")).expect("read fixture");
    let top: TopEvents = serde_json::from_str(&raw).expect("parse fixture");

    let plan = plan_query(
        Dataset::SpansMetrics,
        PlanMode::Top(top),
        InMemoryIndexer::new(true),
        request,
        QuerySettings::default(),
    )
    .expect("plan");
    let json = serde_json::to_value(&plan).expect("serialize");
    assert_eq!(json["granularity"], "hour");
    assert_eq!(json["intervalSeconds"], 3_600);
    assert!(json["edges"].as_array().expect("edges").is_empty());
    assert!(json["where"]
        .as_array()
        .expect("where")
        .iter()
        .any(|condition| condition.get("or").is_some()));
}

#[test]
fn profile_functions_reject_span_fields() {
    let err = plan_query(
        Dataset::ProfileFunctionsMetrics,
        PlanMode::Aggregate,
        InMemoryIndexer::new(true),
        request(),
        QuerySettings::default(),
    )
    .expect_err("span fields are unknown to profile functions");
    assert!(err.to_string().starts_with("INVALID_SEARCH_QUERY"));
}

#[test]
fn cli_migrates_and_plans() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = dir.path().join("views.db");
    let migrate = Command::new(env!("CARGO_BIN_EXE_spans-metrics"))
        .arg("migrate")
        .arg("--db")
        .arg(&db)
        .output()
        .expect("run migrate");
    assert!(migrate.status.success(), "{}", String::from_utf8_lossy(&migrate.stderr));
    let applied: Vec<String> = serde_json::from_slice(&migrate.stdout).expect("applied list");
    assert_eq!(applied.len(), 3);

    let plan = Command::new(env!("CARGO_BIN_EXE_spans-metrics"))
        .arg("plan")
        .arg("--request")
        .arg(fixture("spans-request.json"))
        .output()
        .expect("run plan");
    assert!(plan.status.success(), "{}", String::from_utf8_lossy(&plan.stderr));
    let json: serde_json::Value = serde_json::from_slice(&plan.stdout).expect("plan json");
    assert_eq!(json["dataset"], "spansMetrics");
}
