//! Capability contracts for the upstream services the engines talk to.
//!
//! Adapters only ever see these traits; `crate::aws` implements them on top
//! of the AWS SDK, and tests implement them in memory.

use crate::engine::poll::RunState;
use crate::error::TablesError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

/// One table as reported by the table-catalog listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSummary {
    pub name: String,
    pub namespace: Vec<String>,
    pub table_arn: String,
}

/// Table-catalog control service (bucket-scoped listing).
#[async_trait]
pub trait TableCatalog: Send + Sync {
    /// Every table in the bucket, across all pages.
    async fn list_tables(&self, bucket_arn: &str) -> Result<Vec<TableSummary>, TablesError>;
}

/// Object store used for result locations and job scripts.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create `bucket` in `region` unless it already exists. Returns true if it was created.
    async fn ensure_bucket(&self, bucket: &str, region: &str) -> Result<bool, TablesError>;

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), TablesError>;
}

/// Everything needed to start one interactive query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySubmission {
    pub query: String,
    pub catalog: Option<String>,
    pub database: Option<String>,
    pub workgroup: Option<String>,
    pub output_location: Option<String>,
    pub client_request_token: Option<String>,
}

/// Snapshot of an interactive query's execution status.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryExecutionInfo {
    pub query_execution_id: String,
    pub state: RunState,
    /// The service's own state name (e.g. `QUEUED`, `FAILED`).
    pub state_name: String,
    pub state_change_reason: Option<String>,
    pub error_category: Option<i32>,
    pub error_type: Option<i32>,
    pub retryable: Option<bool>,
    /// Filtered execution details surfaced in result metadata.
    pub details: Map<String, Value>,
}

/// One page of tabular results. Each row is positional; `None` is a missing cell.
/// The first page's first row is the header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultPage {
    pub rows: Vec<Vec<Option<String>>>,
    pub next_token: Option<String>,
}

/// Serverless interactive query service.
#[async_trait]
pub trait QueryService: Send + Sync {
    async fn start_query(&self, submission: &QuerySubmission) -> Result<String, TablesError>;

    async fn get_execution(&self, query_execution_id: &str)
    -> Result<QueryExecutionInfo, TablesError>;

    async fn get_results(
        &self,
        query_execution_id: &str,
        next_token: Option<&str>,
    ) -> Result<ResultPage, TablesError>;

    /// Output location currently configured on the workgroup, if any.
    async fn workgroup_output_location(&self, workgroup: &str)
    -> Result<Option<String>, TablesError>;

    async fn set_workgroup_output_location(
        &self,
        workgroup: &str,
        location: &str,
    ) -> Result<(), TablesError>;

    /// Cheap reachability probe.
    async fn list_workgroups(&self) -> Result<Vec<String>, TablesError>;
}

/// Parameters for one batch job run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSubmission {
    pub application_id: String,
    pub execution_role_arn: String,
    pub entry_point: String,
    pub spark_submit_parameters: String,
    pub log_group: String,
    pub client_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRunInfo {
    pub job_run_id: String,
    pub state: RunState,
    pub state_name: String,
    pub state_details: Option<String>,
}

/// Batch compute service running scripted jobs.
#[async_trait]
pub trait BatchJobService: Send + Sync {
    async fn start_job_run(&self, job: &JobSubmission) -> Result<String, TablesError>;

    async fn get_job_run(&self, application_id: &str, job_run_id: &str)
    -> Result<JobRunInfo, TablesError>;

    async fn list_applications(&self) -> Result<Vec<String>, TablesError>;
}

/// One column of a table-format table schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    /// Engine type name, uppercase (e.g. `BIGINT`, `VARCHAR`, `DECIMAL(10,2)`).
    pub data_type: String,
    pub required: bool,
}

/// Columns plus structured rows, as returned by structured backends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TabularData {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// An in-process analytical database. Implementations serialize access to
/// their connection; callers may share one instance across tasks.
#[async_trait]
pub trait EmbeddedDatabase: Send + Sync {
    /// Run one or more statements that return no rows.
    async fn execute_batch(&self, sql: &str) -> Result<(), TablesError>;

    /// Run `sql` inside one transaction, rolled back if any statement fails.
    /// Nothing else runs on the connection until it commits or rolls back.
    async fn execute_transaction(&self, sql: &str) -> Result<(), TablesError>;

    /// Run a query and collect its column names and rows.
    async fn query(&self, sql: &str) -> Result<TabularData, TablesError>;
}

/// A REST-backed table-format catalog session.
#[async_trait]
pub trait TableFormatCatalog: Send + Sync {
    async fn sql(&self, query: &str) -> Result<TabularData, TablesError>;

    async fn list_namespaces(&self) -> Result<Vec<String>, TablesError>;

    async fn table_schema(&self, namespace: &str, table: &str)
    -> Result<Vec<ColumnSchema>, TablesError>;

    /// Append already-coerced rows (one SQL literal per schema column) atomically.
    async fn append(
        &self,
        namespace: &str,
        table: &str,
        columns: &[String],
        literal_rows: &[Vec<String>],
    ) -> Result<usize, TablesError>;
}

/// Hands out region-scoped clients. Client construction is the factory's concern.
pub trait ClientFactory: Send + Sync {
    fn table_catalog(&self, region: &str) -> Arc<dyn TableCatalog>;
    fn object_store(&self, region: &str) -> Arc<dyn ObjectStore>;
    fn query_service(&self, region: &str) -> Arc<dyn QueryService>;
    fn batch_service(&self, region: &str) -> Arc<dyn BatchJobService>;
}
