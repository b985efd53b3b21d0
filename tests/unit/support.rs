#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use s3tables_query::clients::{
    BatchJobService, ClientFactory, ColumnSchema, EmbeddedDatabase, JobRunInfo, JobSubmission,
    ObjectStore, QueryExecutionInfo, QueryService, QuerySubmission, ResultPage, TableCatalog,
    TableFormatCatalog, TableSummary, TabularData,
};
use s3tables_query::engine::poll::RunState;
use s3tables_query::error::TablesError;
use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const TABLE_ARN: &str = "arn:aws:s3tables:us-west-2:111122223333:bucket/lake/table/tbl-0001";
pub const BUCKET_ARN: &str = "arn:aws:s3tables:us-west-2:111122223333:bucket/lake";

pub fn orders_table() -> TableSummary {
    TableSummary {
        name: "orders".into(),
        namespace: vec!["sales".into()],
        table_arn: TABLE_ARN.into(),
    }
}

// --- table catalog ---

#[derive(Default)]
pub struct MockCatalog {
    pub tables: Vec<TableSummary>,
    pub fail: bool,
    pub list_calls: AtomicUsize,
}

impl MockCatalog {
    pub fn with_tables(tables: Vec<TableSummary>) -> Self {
        Self {
            tables,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl TableCatalog for MockCatalog {
    async fn list_tables(&self, _bucket_arn: &str) -> Result<Vec<TableSummary>, TablesError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(TablesError::connection("catalog unreachable"));
        }
        Ok(self.tables.clone())
    }
}

// --- object store ---

#[derive(Default)]
pub struct MockObjectStore {
    pub buckets: Mutex<HashSet<String>>,
    pub objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    pub ensure_calls: AtomicUsize,
    pub fail: bool,
}

impl MockObjectStore {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn object_text(&self, bucket: &str, key: &str) -> Option<String> {
        self.objects
            .lock()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    async fn ensure_bucket(&self, bucket: &str, _region: &str) -> Result<bool, TablesError> {
        self.ensure_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(TablesError::connection("access denied"));
        }
        Ok(self.buckets.lock().insert(bucket.to_string()))
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), TablesError> {
        if self.fail {
            return Err(TablesError::connection("access denied"));
        }
        self.objects
            .lock()
            .insert((bucket.to_string(), key.to_string()), body);
        Ok(())
    }
}

// --- interactive query service ---

pub struct MockQueryService {
    /// State names returned by successive `get_execution` calls; the last one repeats.
    pub states: Mutex<VecDeque<String>>,
    pub failure_reason: Option<String>,
    pub pages: Vec<ResultPage>,
    pub submissions: Mutex<Vec<QuerySubmission>>,
    pub result_requests: Mutex<Vec<Option<String>>>,
    pub execution_calls: AtomicUsize,
    pub workgroup_location: Mutex<Option<String>>,
    pub workgroup_updates: AtomicUsize,
    pub reachable: bool,
}

impl MockQueryService {
    pub fn new(states: &[&str], pages: Vec<ResultPage>) -> Self {
        Self {
            states: Mutex::new(states.iter().map(|s| s.to_string()).collect()),
            failure_reason: None,
            pages,
            submissions: Mutex::new(Vec::new()),
            result_requests: Mutex::new(Vec::new()),
            execution_calls: AtomicUsize::new(0),
            workgroup_location: Mutex::new(None),
            workgroup_updates: AtomicUsize::new(0),
            reachable: true,
        }
    }

    pub fn succeeding(pages: Vec<ResultPage>) -> Self {
        Self::new(&["RUNNING", "SUCCEEDED"], pages)
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            failure_reason: Some(reason.to_string()),
            ..Self::new(&["FAILED"], Vec::new())
        }
    }

    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::new(&["SUCCEEDED"], Vec::new())
        }
    }

    pub fn last_submission(&self) -> Option<QuerySubmission> {
        self.submissions.lock().last().cloned()
    }
}

/// A header row followed by data rows, as a single page.
pub fn page(rows: &[&[&str]], next_token: Option<&str>) -> ResultPage {
    ResultPage {
        rows: rows
            .iter()
            .map(|row| row.iter().map(|cell| Some(cell.to_string())).collect())
            .collect(),
        next_token: next_token.map(str::to_string),
    }
}

#[async_trait]
impl QueryService for MockQueryService {
    async fn start_query(&self, submission: &QuerySubmission) -> Result<String, TablesError> {
        self.submissions.lock().push(submission.clone());
        Ok(format!("qe-{}", self.submissions.lock().len()))
    }

    async fn get_execution(&self, query_execution_id: &str) -> Result<QueryExecutionInfo, TablesError> {
        self.execution_calls.fetch_add(1, Ordering::SeqCst);
        let state_name = {
            let mut states = self.states.lock();
            if states.len() > 1 {
                states.pop_front().unwrap_or_default()
            } else {
                states.front().cloned().unwrap_or_else(|| "SUCCEEDED".to_string())
            }
        };
        let failed = state_name == "FAILED";
        let mut details = Map::new();
        details.insert("QueryExecutionId".into(), json!(query_execution_id));
        details.insert("State".into(), json!(state_name));
        Ok(QueryExecutionInfo {
            query_execution_id: query_execution_id.to_string(),
            state: RunState::from_query_state(&state_name),
            state_change_reason: if failed { self.failure_reason.clone() } else { None },
            error_category: failed.then_some(2),
            error_type: failed.then_some(1006),
            retryable: failed.then_some(false),
            state_name,
            details,
        })
    }

    async fn get_results(
        &self,
        _query_execution_id: &str,
        next_token: Option<&str>,
    ) -> Result<ResultPage, TablesError> {
        self.result_requests.lock().push(next_token.map(str::to_string));
        let index = match next_token {
            None => 0,
            Some(token) => token
                .trim_start_matches("page-")
                .parse::<usize>()
                .map_err(|_| TablesError::execution("bad token"))?,
        };
        Ok(self.pages.get(index).cloned().unwrap_or_default())
    }

    async fn workgroup_output_location(&self, _workgroup: &str) -> Result<Option<String>, TablesError> {
        Ok(self.workgroup_location.lock().clone())
    }

    async fn set_workgroup_output_location(
        &self,
        _workgroup: &str,
        location: &str,
    ) -> Result<(), TablesError> {
        self.workgroup_updates.fetch_add(1, Ordering::SeqCst);
        *self.workgroup_location.lock() = Some(location.to_string());
        Ok(())
    }

    async fn list_workgroups(&self) -> Result<Vec<String>, TablesError> {
        if self.reachable {
            Ok(vec!["primary".to_string()])
        } else {
            Err(TablesError::connection("could not reach endpoint"))
        }
    }
}

// --- batch job service ---

pub struct MockBatch {
    pub states: Mutex<VecDeque<String>>,
    pub state_details: Option<String>,
    pub submissions: Mutex<Vec<JobSubmission>>,
    pub reachable: bool,
}

impl MockBatch {
    pub fn new(states: &[&str]) -> Self {
        Self {
            states: Mutex::new(states.iter().map(|s| s.to_string()).collect()),
            state_details: None,
            submissions: Mutex::new(Vec::new()),
            reachable: true,
        }
    }
}

#[async_trait]
impl BatchJobService for MockBatch {
    async fn start_job_run(&self, job: &JobSubmission) -> Result<String, TablesError> {
        self.submissions.lock().push(job.clone());
        Ok("jr-0001".to_string())
    }

    async fn get_job_run(&self, _application_id: &str, job_run_id: &str) -> Result<JobRunInfo, TablesError> {
        let state_name = {
            let mut states = self.states.lock();
            if states.len() > 1 {
                states.pop_front().unwrap_or_default()
            } else {
                states.front().cloned().unwrap_or_else(|| "SUCCESS".to_string())
            }
        };
        Ok(JobRunInfo {
            job_run_id: job_run_id.to_string(),
            state: RunState::from_job_state(&state_name),
            state_name,
            state_details: self.state_details.clone(),
        })
    }

    async fn list_applications(&self) -> Result<Vec<String>, TablesError> {
        if self.reachable {
            Ok(vec!["app-1".to_string()])
        } else {
            Err(TablesError::connection("could not reach endpoint"))
        }
    }
}

// --- embedded database ---

#[derive(Default)]
pub struct MockEmbeddedDatabase {
    pub statements: Mutex<Vec<String>>,
    pub queries: Mutex<Vec<String>>,
    pub result: TabularData,
    /// Any statement containing this text fails.
    pub fail_on: Option<String>,
}

impl MockEmbeddedDatabase {
    pub fn returning(result: TabularData) -> Self {
        Self {
            result,
            ..Self::default()
        }
    }

    pub fn failing_on(fragment: &str) -> Self {
        Self {
            fail_on: Some(fragment.to_string()),
            ..Self::default()
        }
    }

    fn check(&self, sql: &str) -> Result<(), TablesError> {
        match &self.fail_on {
            Some(fragment) if sql.contains(fragment.as_str()) => {
                Err(TablesError::execution(format!("statement failed: {}", fragment)))
            }
            _ => Ok(()),
        }
    }

    pub fn count_matching(&self, fragment: &str) -> usize {
        self.statements
            .lock()
            .iter()
            .filter(|s| s.contains(fragment))
            .count()
    }
}

#[async_trait]
impl EmbeddedDatabase for MockEmbeddedDatabase {
    async fn execute_batch(&self, sql: &str) -> Result<(), TablesError> {
        self.statements.lock().push(sql.to_string());
        self.check(sql)
    }

    async fn execute_transaction(&self, sql: &str) -> Result<(), TablesError> {
        let mut statements = self.statements.lock();
        statements.push("BEGIN TRANSACTION".to_string());
        statements.push(sql.to_string());
        match self.check(sql) {
            Ok(()) => {
                statements.push("COMMIT".to_string());
                Ok(())
            }
            Err(e) => {
                statements.push("ROLLBACK".to_string());
                Err(e)
            }
        }
    }

    async fn query(&self, sql: &str) -> Result<TabularData, TablesError> {
        self.queries.lock().push(sql.to_string());
        self.check(sql)?;
        Ok(self.result.clone())
    }
}

// --- table-format catalog ---

#[derive(Default)]
pub struct MockFormatCatalog {
    pub schema: Vec<ColumnSchema>,
    pub result: TabularData,
    pub queries: Mutex<Vec<String>>,
    pub appended: Mutex<Vec<(String, String, Vec<String>, Vec<Vec<String>>)>>,
    pub fail: bool,
}

impl MockFormatCatalog {
    pub fn with_schema(schema: Vec<ColumnSchema>) -> Self {
        Self {
            schema,
            ..Self::default()
        }
    }
}

#[async_trait]
impl TableFormatCatalog for MockFormatCatalog {
    async fn sql(&self, query: &str) -> Result<TabularData, TablesError> {
        self.queries.lock().push(query.to_string());
        if self.fail {
            return Err(TablesError::connection("No active catalog session"));
        }
        Ok(self.result.clone())
    }

    async fn list_namespaces(&self) -> Result<Vec<String>, TablesError> {
        if self.fail {
            return Err(TablesError::connection("No active catalog session"));
        }
        Ok(vec!["sales".to_string()])
    }

    async fn table_schema(&self, _namespace: &str, _table: &str) -> Result<Vec<ColumnSchema>, TablesError> {
        if self.fail {
            return Err(TablesError::connection("No active catalog session"));
        }
        Ok(self.schema.clone())
    }

    async fn append(
        &self,
        namespace: &str,
        table: &str,
        columns: &[String],
        literal_rows: &[Vec<String>],
    ) -> Result<usize, TablesError> {
        self.appended.lock().push((
            namespace.to_string(),
            table.to_string(),
            columns.to_vec(),
            literal_rows.to_vec(),
        ));
        Ok(literal_rows.len())
    }
}

pub fn column(name: &str, data_type: &str, required: bool) -> ColumnSchema {
    ColumnSchema {
        name: name.into(),
        data_type: data_type.into(),
        required,
    }
}

pub fn tabular(columns: &[&str], rows: Vec<Vec<Value>>) -> TabularData {
    TabularData {
        columns: columns.iter().map(|c| c.to_string()).collect(),
        rows,
    }
}

// --- factory ---

pub struct MockFactory {
    pub catalog: Arc<MockCatalog>,
    pub store: Arc<MockObjectStore>,
    pub query: Arc<MockQueryService>,
    pub batch: Arc<MockBatch>,
    pub regions: Mutex<Vec<String>>,
}

impl MockFactory {
    pub fn new(
        catalog: MockCatalog,
        store: MockObjectStore,
        query: MockQueryService,
        batch: MockBatch,
    ) -> Self {
        Self {
            catalog: Arc::new(catalog),
            store: Arc::new(store),
            query: Arc::new(query),
            batch: Arc::new(batch),
            regions: Mutex::new(Vec::new()),
        }
    }

    /// Catalog knows `orders`; every service succeeds with no rows.
    pub fn standard() -> Self {
        Self::with_query(MockQueryService::succeeding(vec![page(&[&["id"]], None)]))
    }

    pub fn with_query(query: MockQueryService) -> Self {
        Self::new(
            MockCatalog::with_tables(vec![orders_table()]),
            MockObjectStore::default(),
            query,
            MockBatch::new(&["SUCCESS"]),
        )
    }
}

impl ClientFactory for MockFactory {
    fn table_catalog(&self, region: &str) -> Arc<dyn TableCatalog> {
        self.regions.lock().push(region.to_string());
        self.catalog.clone()
    }

    fn object_store(&self, region: &str) -> Arc<dyn ObjectStore> {
        self.regions.lock().push(region.to_string());
        self.store.clone()
    }

    fn query_service(&self, region: &str) -> Arc<dyn QueryService> {
        self.regions.lock().push(region.to_string());
        self.query.clone()
    }

    fn batch_service(&self, region: &str) -> Arc<dyn BatchJobService> {
        self.regions.lock().push(region.to_string());
        self.batch.clone()
    }
}
