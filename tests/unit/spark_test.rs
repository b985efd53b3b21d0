mod support;

use s3tables_query::arn::TableReference;
use s3tables_query::config::SparkConfig;
use s3tables_query::engine::{Engine, EngineKind, SparkEngine};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use support::*;
use tokio_util::sync::CancellationToken;

fn table() -> TableReference {
    TableReference::parse(TABLE_ARN).unwrap()
}

fn config() -> SparkConfig {
    SparkConfig {
        execution_role_arn: Some("arn:aws:iam::111122223333:role/emr-job".to_string()),
        poll_interval: Duration::from_millis(1),
        ..SparkConfig::new("app-1")
    }
}

fn factory_with_batch(batch: MockBatch) -> Arc<MockFactory> {
    Arc::new(MockFactory::new(
        MockCatalog::with_tables(vec![orders_table()]),
        MockObjectStore::default(),
        MockQueryService::succeeding(Vec::new()),
        batch,
    ))
}

#[tokio::test]
async fn test_successful_job_reports_no_rows() {
    let factory = factory_with_batch(MockBatch::new(&["SUBMITTED", "RUNNING", "SUCCESS"]));
    let engine = SparkEngine::new(config(), factory.clone()).unwrap();

    let result = engine.execute(&table(), "SELECT * FROM orders", Some(5)).await;

    assert!(result.is_success(), "{:?}", result.message);
    assert_eq!(result.engine_used, EngineKind::Spark);
    assert_eq!(result.rows_returned, 0);
    assert_eq!(result.rows, Some(Vec::new()));
    assert_eq!(
        result.message.as_deref(),
        Some("Query executed successfully on EMR Serverless")
    );
    assert_eq!(result.metadata["job_run_id"], json!("jr-0001"));
    assert_eq!(
        result.metadata["log_group"],
        json!("/aws/emr-serverless/s3tables-query")
    );
}

#[tokio::test]
async fn test_script_is_uploaded_and_submitted() {
    let factory = factory_with_batch(MockBatch::new(&["SUCCESS"]));
    let engine = SparkEngine::new(config(), factory.clone()).unwrap();

    let result = engine.execute(&table(), "SELECT * FROM orders", Some(5)).await;

    let submissions = factory.batch.submissions.lock().clone();
    assert_eq!(submissions.len(), 1);
    let job = &submissions[0];
    assert_eq!(job.application_id, "app-1");
    assert_eq!(job.execution_role_arn, "arn:aws:iam::111122223333:role/emr-job");
    assert!(job.spark_submit_parameters.contains("spark.executor.cores=2"));

    let bucket = "s3tables-query-scripts-111122223333-us-west-2";
    assert!(job.entry_point.starts_with(&format!("s3://{}/jobs/", bucket)));
    assert_eq!(result.metadata["entry_point"], json!(job.entry_point));

    let key = job
        .entry_point
        .trim_start_matches(&format!("s3://{}/", bucket))
        .to_string();
    let script = factory.store.object_text(bucket, &key).unwrap();
    assert!(script.contains(r#"query = "SELECT * FROM s3tables.sales.orders LIMIT 5""#));
    assert!(script.contains("arn:aws:s3tables:us-west-2:111122223333:bucket/lake"));
}

#[tokio::test]
async fn test_failed_job_surfaces_state_details() {
    let mut batch = MockBatch::new(&["RUNNING", "FAILED"]);
    batch.state_details = Some("Job failed with exit code 1".to_string());
    let engine = SparkEngine::new(config(), factory_with_batch(batch)).unwrap();

    let result = engine.execute(&table(), "SELECT * FROM orders", None).await;

    assert!(!result.is_success());
    assert_eq!(
        result.message.as_deref(),
        Some("EMR Serverless execution failed: EMR Serverless job failed: Job failed with exit code 1")
    );
}

#[tokio::test]
async fn test_cancelled_job_without_details_names_state() {
    let engine =
        SparkEngine::new(config(), factory_with_batch(MockBatch::new(&["CANCELLED"]))).unwrap();

    let result = engine.execute(&table(), "SELECT * FROM orders", None).await;

    assert!(result.message.unwrap().ends_with("job ended in state CANCELLED"));
}

#[tokio::test]
async fn test_missing_job_role_fails_before_upload() {
    let factory = factory_with_batch(MockBatch::new(&["SUCCESS"]));
    let engine = SparkEngine::new(SparkConfig::new("app-1"), factory.clone()).unwrap();

    let result = engine.execute(&table(), "SELECT * FROM orders", None).await;

    assert!(!result.is_success());
    assert!(result.message.unwrap().contains("EMR_SERVERLESS_JOB_ROLE_ARN is not set"));
    assert!(factory.store.objects.lock().is_empty());
    assert!(factory.batch.submissions.lock().is_empty());
}

#[tokio::test]
async fn test_upload_failure_is_an_error_result() {
    let factory = Arc::new(MockFactory::new(
        MockCatalog::with_tables(vec![orders_table()]),
        MockObjectStore::failing(),
        MockQueryService::succeeding(Vec::new()),
        MockBatch::new(&["SUCCESS"]),
    ));
    let engine = SparkEngine::new(config(), factory.clone()).unwrap();

    let result = engine.execute(&table(), "SELECT * FROM orders", None).await;

    assert!(!result.is_success());
    assert!(factory.batch.submissions.lock().is_empty());
}

#[tokio::test]
async fn test_cancellation_abandons_the_poll() {
    let factory = factory_with_batch(MockBatch::new(&["RUNNING"]));
    let token = CancellationToken::new();
    token.cancel();
    let engine = SparkEngine::new(config(), factory.clone())
        .unwrap()
        .with_cancellation(token);

    let result = engine.execute(&table(), "SELECT * FROM orders", None).await;

    assert!(result.message.unwrap().contains("polling cancelled"));
    // The job was submitted and is left running.
    assert_eq!(factory.batch.submissions.lock().len(), 1);
}

#[tokio::test]
async fn test_connection_probe_lists_applications() {
    let engine = SparkEngine::new(config(), factory_with_batch(MockBatch::new(&["SUCCESS"]))).unwrap();
    assert!(engine.test_connection().await);

    let mut batch = MockBatch::new(&["SUCCESS"]);
    batch.reachable = false;
    let engine = SparkEngine::new(config(), factory_with_batch(batch)).unwrap();
    assert!(!engine.test_connection().await);
}

#[test]
fn test_core_bounds_are_validated() {
    let config = SparkConfig {
        executor_cores: 16,
        ..config()
    };
    assert!(SparkEngine::new(config, factory_with_batch(MockBatch::new(&["SUCCESS"]))).is_err());
}
