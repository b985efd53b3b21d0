//! Interactive-serverless adapter.
//!
//! Submits SQL against the `s3tablescatalog/<bucket>` catalog with the
//! table's namespace as database, polls the execution once per interval and
//! reads the paginated text result (first row is the header).

use crate::arn::{BucketReference, TableReference};
use crate::clients::{ClientFactory, QueryExecutionInfo, QueryService, QuerySubmission};
use crate::config::AthenaConfig;
use crate::engine::normalize;
use crate::engine::poll::{self, PollOptions, RunState};
use crate::engine::resolve::{self, ResolvedTable};
use crate::engine::{Engine, EngineKind, QueryResult, apply_limit};
use crate::error::TablesError;
use crate::logging::Timer;
use regex::{NoExpand, Regex};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Version comment prepended to bucket/namespace queries.
pub const QUERY_COMMENT: &str = concat!("/* s3tables-query/", env!("CARGO_PKG_VERSION"), " */");

/// Catalog name the interactive service uses for a table bucket.
pub fn catalog_name(bucket: &str) -> String {
    format!("s3tablescatalog/{}", bucket)
}

/// Per-account default result location.
pub fn default_result_location(account_id: &str, region: &str) -> String {
    format!("s3://{}/", default_result_bucket(account_id, region))
}

fn default_result_bucket(account_id: &str, region: &str) -> String {
    format!("aws-athena-query-results-{}-{}", account_id, region)
}

/// Replace `FROM table` or `FROM <name>` (case-insensitive) with `FROM <target>`.
pub fn rewrite_table_reference(sql: &str, name: &str, target: &str) -> String {
    let mut rewritten = sql.to_string();
    for pattern in [
        r"(?i)\bFROM\s+table\b".to_string(),
        format!(r"(?i)\bFROM\s+{}\b", regex::escape(name)),
    ] {
        // Both patterns are built from escaped input, so compilation cannot fail.
        if let Ok(re) = Regex::new(&pattern) {
            let replacement = format!("FROM {}", target);
            rewritten = re.replace_all(&rewritten, NoExpand(&replacement)).into_owned();
        }
    }
    rewritten
}

/// What a failure diagnostic may mention.
#[derive(Debug, Clone)]
pub struct FailureContext {
    pub bucket_arn: String,
    pub account_id: String,
    pub catalog: String,
    pub namespace: String,
    pub query: String,
    pub output_location: String,
}

/// Status, reason and error fields of a failed execution, plus at most one hint.
pub fn describe_failure(info: &QueryExecutionInfo, ctx: &FailureContext) -> String {
    let mut parts = vec![format!(
        "Athena query failed with status: {}",
        info.state_name
    )];
    let reason = info
        .state_change_reason
        .as_deref()
        .filter(|r| !r.trim().is_empty());
    if let Some(reason) = reason {
        parts.push(format!("Reason: {}", reason));
    }
    if let Some(category) = info.error_category {
        parts.push(format!("Category: {}", category));
    }
    if let Some(error_type) = info.error_type {
        parts.push(format!("Type: {}", error_type));
    }
    if let Some(retryable) = info.retryable {
        parts.push(format!("Retryable: {}", retryable));
    }

    let mut message = parts.join(". ");
    if let Some(hint) = reason.and_then(|r| remediation_hint(&r.to_lowercase(), ctx)) {
        message.push_str(". ");
        message.push_str(&hint);
    }
    message
}

fn remediation_hint(reason: &str, ctx: &FailureContext) -> Option<String> {
    let hint = if reason.contains("catalog") && reason.contains("does not exist") {
        format!(
            "SETUP REQUIRED: table bucket {} is not registered with the data catalog. \
             Enable analytics integration for the bucket and grant Lake Formation permissions \
             on catalog {}:{}",
            ctx.bucket_arn, ctx.account_id, ctx.catalog
        )
    } else if reason.contains("database") && reason.contains("does not exist") {
        format!(
            "SUGGESTION: database \"{}\" does not exist in catalog \"{}\". \
             Create it first with: CREATE DATABASE `{}`",
            ctx.namespace, ctx.catalog, ctx.namespace
        )
    } else if reason.contains("does not exist") || reason.contains("table not found") {
        format!(
            "SUGGESTION: the table exists in the bucket but is not visible in catalog \"{}\". \
             Enable analytics integration",
            ctx.catalog
        )
    } else if reason.contains("access denied") || reason.contains("permission") {
        format!(
            "SUGGESTION: grant Lake Formation permissions on catalog \"{}\" and database \"{}\"",
            ctx.catalog, ctx.namespace
        )
    } else if reason.contains("workgroup") {
        "SUGGESTION: check the workgroup configuration and its result location".to_string()
    } else if reason.contains("syntax") || reason.contains("parse") {
        format!("SUGGESTION: check SQL syntax. Query was: {}", ctx.query)
    } else if reason.contains("query result location") || reason.contains("output location") {
        format!(
            "RESULT LOCATION: results go to {}. Check the bucket's permissions",
            ctx.output_location
        )
    } else {
        return None;
    };
    Some(hint)
}

/// A successfully finished execution and its rows.
#[derive(Debug)]
pub struct CompletedQuery {
    pub execution: QueryExecutionInfo,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub next_token: Option<String>,
}

/// Submit, poll to a terminal state, then fetch results page by page.
///
/// With a `limit`, fetching stops once that many rows are collected and the
/// continuation token of the last page read is handed back.
pub async fn run_to_completion(
    service: &dyn QueryService,
    submission: &QuerySubmission,
    options: &PollOptions,
    limit: Option<usize>,
    ctx: &FailureContext,
) -> Result<CompletedQuery, TablesError> {
    let id = service.start_query(submission).await?;
    info!(query_execution_id = %id, "query submitted");

    let execution = poll::poll_until_terminal(options, || service.get_execution(&id)).await?;
    if execution.state != RunState::Succeeded {
        let message = describe_failure(&execution, ctx);
        error!(query_execution_id = %id, %message, "query did not succeed");
        return Err(TablesError::execution(message));
    }

    let first = service.get_results(&id, None).await?;
    let (columns, header_rows) = normalize::split_header(first.rows);
    let mut raw_rows = header_rows;
    let mut next_token = first.next_token;

    while let Some(token) = next_token.clone() {
        if limit.is_some_and(|n| raw_rows.len() >= n) {
            break;
        }
        let page = service.get_results(&id, Some(&token)).await?;
        raw_rows.extend(page.rows);
        next_token = page.next_token;
    }

    // A token points past the rows just dropped, so it cannot resume after them.
    if let Some(n) = limit
        && raw_rows.len() > n
    {
        raw_rows.truncate(n);
        next_token = None;
    }

    let rows = normalize::text_rows(columns.len(), raw_rows);
    debug!(query_execution_id = %id, rows = rows.len(), "results fetched");

    Ok(CompletedQuery {
        execution,
        columns,
        rows,
        next_token,
    })
}

pub struct AthenaEngine {
    config: AthenaConfig,
    clients: Arc<dyn ClientFactory>,
    cancel: CancellationToken,
    /// Result locations already bootstrapped, keyed by `<account>-<region>`.
    result_locations: Mutex<HashMap<String, String>>,
}

impl AthenaEngine {
    pub fn new(config: AthenaConfig, clients: Arc<dyn ClientFactory>) -> Result<Self, TablesError> {
        config.validate()?;
        Ok(Self {
            config,
            clients,
            cancel: CancellationToken::new(),
            result_locations: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &AthenaConfig {
        &self.config
    }

    fn poll_options(&self) -> PollOptions {
        PollOptions::new(self.config.poll_interval, self.cancel.clone())
    }

    /// Make sure the result bucket exists and the workgroup points at it.
    ///
    /// Memoized per account and region after the first success. A failed
    /// bootstrap still returns the default location but is retried next time.
    pub async fn ensure_result_location(&self, account_id: &str, region: &str) -> String {
        if let Some(location) = &self.config.result_location {
            return location.clone();
        }

        let key = format!("{}-{}", account_id, region);
        let mut cache = self.result_locations.lock().await;
        if let Some(location) = cache.get(&key) {
            return location.clone();
        }

        let bucket = default_result_bucket(account_id, region);
        let location = default_result_location(account_id, region);
        let store = self.clients.object_store(region);
        match store.ensure_bucket(&bucket, region).await {
            Ok(created) => {
                if created {
                    info!(%bucket, "created result bucket");
                }
                self.align_workgroup(region, &location).await;
                cache.insert(key, location.clone());
            }
            Err(e) => {
                warn!(%bucket, error = %e, "could not ensure result bucket, using default location");
            }
        }
        location
    }

    async fn align_workgroup(&self, region: &str, location: &str) {
        let service = self.clients.query_service(region);
        let workgroup = &self.config.workgroup;
        match service.workgroup_output_location(workgroup).await {
            Ok(Some(current)) if current == location => {
                debug!(%workgroup, "workgroup already uses the result location");
            }
            Ok(_) => match service.set_workgroup_output_location(workgroup, location).await {
                Ok(()) => info!(%workgroup, %location, "updated workgroup result location"),
                Err(e) => warn!(%workgroup, error = %e, "could not update workgroup result location"),
            },
            Err(e) => warn!(%workgroup, error = %e, "could not read workgroup configuration"),
        }
    }

    async fn run(
        &self,
        table: &TableReference,
        sql: &str,
        limit: Option<usize>,
        timer: &Timer,
    ) -> Result<QueryResult, TablesError> {
        let catalog_client = self.clients.table_catalog(&table.region);
        let service = self.clients.query_service(&table.region);

        let output_location = self
            .ensure_result_location(&table.account_id, &table.region)
            .await;
        let ResolvedTable {
            namespace, name, ..
        } = resolve::resolve_table(catalog_client.as_ref(), table).await?;

        let catalog = catalog_name(&table.bucket);
        let target = format!("\"{}\".{}.{}", catalog, namespace, name);
        let query = apply_limit(&rewrite_table_reference(sql, &name, &target), limit);
        debug!(%catalog, %namespace, %query, "rewritten query");

        let submission = QuerySubmission {
            query: query.clone(),
            catalog: Some(catalog.clone()),
            database: Some(namespace.clone()),
            workgroup: Some(self.config.workgroup.clone()),
            output_location: Some(output_location.clone()),
            client_request_token: Some(Uuid::new_v4().to_string()),
        };
        let ctx = FailureContext {
            bucket_arn: table.bucket_arn(),
            account_id: table.account_id.clone(),
            catalog: catalog.clone(),
            namespace: namespace.clone(),
            query,
            output_location: output_location.clone(),
        };

        let completed =
            run_to_completion(service.as_ref(), &submission, &self.poll_options(), limit, &ctx)
                .await?;

        let columns_meta = json!(completed.columns);
        Ok(QueryResult::success(
            EngineKind::Athena,
            completed.columns,
            completed.rows,
            timer.elapsed_ms(),
        )
        .with_metadata("columns", columns_meta)
        .with_metadata(
            "query_execution_id",
            Value::String(completed.execution.query_execution_id),
        )
        .with_metadata("output_location", Value::String(output_location))
        .with_next_token(completed.next_token))
    }
}

impl Engine for AthenaEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Athena
    }

    async fn execute(&self, table: &TableReference, sql: &str, limit: Option<usize>) -> QueryResult {
        let timer = Timer::start();
        match self.run(table, sql, limit, &timer).await {
            Ok(result) => {
                info!(
                    rows = result.rows_returned,
                    elapsed_ms = result.execution_time_ms,
                    "athena query completed"
                );
                result
            }
            Err(e) => {
                error!(error = %e, "athena query failed");
                QueryResult::error(
                    EngineKind::Athena,
                    format!("Athena execution failed: {}", e.detail()),
                    timer.elapsed_ms(),
                )
            }
        }
    }

    async fn test_connection(&self) -> bool {
        match self
            .clients
            .query_service(&self.config.region)
            .list_workgroups()
            .await
        {
            Ok(_) => true,
            Err(e) => {
                error!(error = %e, "athena connection test failed");
                false
            }
        }
    }
}

/// A query scoped to a bucket and namespace rather than a single table.
#[derive(Debug, Clone)]
pub struct DatabaseQuery {
    pub bucket: BucketReference,
    pub namespace: String,
    pub sql: String,
    pub region: String,
    pub output_location: Option<String>,
    pub workgroup: Option<String>,
}

/// Run a bucket/namespace query on the interactive service.
///
/// The SQL runs as given (no table rewriting) behind a version comment.
/// Execution failures come back as an error result.
pub async fn run_database_query(
    service: &dyn QueryService,
    request: &DatabaseQuery,
    options: &PollOptions,
) -> QueryResult {
    let timer = Timer::start();
    let catalog = catalog_name(&request.bucket.bucket);
    let output_location = request
        .output_location
        .clone()
        .unwrap_or_else(|| default_result_location(&request.bucket.account_id, &request.region));
    let query = format!("{}\n{}", QUERY_COMMENT, request.sql);

    let submission = QuerySubmission {
        query: query.clone(),
        catalog: Some(catalog.clone()),
        database: Some(request.namespace.clone()),
        workgroup: Some(
            request
                .workgroup
                .clone()
                .unwrap_or_else(|| "primary".to_string()),
        ),
        output_location: Some(output_location.clone()),
        client_request_token: None,
    };
    let ctx = FailureContext {
        bucket_arn: request.bucket.arn(),
        account_id: request.bucket.account_id.clone(),
        catalog,
        namespace: request.namespace.clone(),
        query,
        output_location: output_location.clone(),
    };

    match run_to_completion(service, &submission, options, None, &ctx).await {
        Ok(completed) => QueryResult::success(
            EngineKind::Athena,
            completed.columns,
            completed.rows,
            timer.elapsed_ms(),
        )
        .with_metadata("output_location", Value::String(output_location))
        .with_metadata("query_execution", Value::Object(completed.execution.details))
        .with_next_token(completed.next_token),
        Err(e) => {
            error!(error = %e, namespace = %request.namespace, "database query failed");
            QueryResult::error(
                EngineKind::Athena,
                format!("Error executing query: {}", e.detail()),
                timer.elapsed_ms(),
            )
        }
    }
}
