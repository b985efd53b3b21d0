//! Data-access entry points.
//!
//! Each entry point composes its gates explicitly: reference parsing, then the
//! server write switch (mutating paths only), then the SQL policy check, and
//! only then the backend call. Validation and policy failures are returned as
//! errors; backend failures arrive as error results.

use crate::arn::{BucketReference, TableReference};
use crate::clients::ClientFactory;
use crate::config::AppConfig;
use crate::engine::athena::{self, DatabaseQuery};
use crate::engine::poll::PollOptions;
use crate::engine::resolve;
use crate::engine::{EngineKind, EngineManager, QueryResult};
use crate::error::TablesError;
use crate::logging::Timer;
use crate::policy::{self, AccessMode, WriteGate};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A query against one table, routed through the engine manager.
#[derive(Debug, Clone)]
pub struct TableQuery {
    pub table_arn: String,
    pub sql: String,
    pub engine: Option<EngineKind>,
    pub limit: Option<usize>,
}

/// A query against a bucket namespace on the interactive service.
#[derive(Debug, Clone)]
pub struct DatabaseRequest {
    pub bucket_arn: String,
    pub namespace: String,
    pub sql: String,
    pub output_location: Option<String>,
    pub workgroup: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub allow_write: bool,
    pub region: Option<String>,
    pub default_row_limit: Option<usize>,
    pub database_poll_interval: Duration,
}

impl ServiceOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            allow_write: config.allow_write,
            region: config.region.clone(),
            default_row_limit: config.default_row_limit,
            database_poll_interval: config.engines.athena.poll_interval,
        }
    }
}

pub struct TablesService {
    manager: EngineManager,
    clients: Arc<dyn ClientFactory>,
    write_gate: WriteGate,
    options: ServiceOptions,
}

impl TablesService {
    pub fn new(manager: EngineManager, clients: Arc<dyn ClientFactory>, options: ServiceOptions) -> Self {
        Self {
            manager,
            clients,
            write_gate: WriteGate::new(options.allow_write),
            options,
        }
    }

    pub fn manager(&self) -> &EngineManager {
        &self.manager
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.manager.cancellation_token()
    }

    /// Read-only table query.
    pub async fn query_table(&self, request: &TableQuery) -> Result<QueryResult, TablesError> {
        let table = TableReference::parse(&request.table_arn)?;
        let limit = request.limit.or(self.options.default_row_limit);
        policy::guarded(&request.sql, AccessMode::ReadOnly, |_| {
            self.run_table_query(&table, request, limit)
        })
        .await
    }

    /// Table query that may write but not destroy. Requires the write switch.
    /// The configured default row limit does not apply here.
    pub async fn modify_table(&self, request: &TableQuery) -> Result<QueryResult, TablesError> {
        let table = TableReference::parse(&request.table_arn)?;
        self.write_gate
            .guard("modify_table", || {
                policy::guarded(&request.sql, AccessMode::ReadWrite, |_| {
                    self.run_table_query(&table, request, request.limit)
                })
            })
            .await
    }

    async fn run_table_query(
        &self,
        table: &TableReference,
        request: &TableQuery,
        limit: Option<usize>,
    ) -> Result<QueryResult, TablesError> {
        Ok(self
            .manager
            .execute_query(table, &request.sql, request.engine, limit)
            .await)
    }

    /// Read-only bucket/namespace query.
    pub async fn query_database(&self, request: &DatabaseRequest) -> Result<QueryResult, TablesError> {
        let (bucket, region) = self.database_target(request)?;
        policy::guarded(&request.sql, AccessMode::ReadOnly, |_| {
            self.run_database_query(bucket, region, request)
        })
        .await
    }

    /// Bucket/namespace query that may write but not destroy. Requires the write switch.
    pub async fn modify_database(&self, request: &DatabaseRequest) -> Result<QueryResult, TablesError> {
        let (bucket, region) = self.database_target(request)?;
        self.write_gate
            .guard("modify_database", || {
                policy::guarded(&request.sql, AccessMode::ReadWrite, |_| {
                    self.run_database_query(bucket, region, request)
                })
            })
            .await
    }

    fn database_target(&self, request: &DatabaseRequest) -> Result<(BucketReference, String), TablesError> {
        let bucket = BucketReference::parse(&request.bucket_arn)?;
        if request.namespace.trim().is_empty() {
            return Err(TablesError::validation("namespace must not be empty"));
        }
        let region = request
            .region
            .clone()
            .or_else(|| self.options.region.clone())
            .ok_or_else(|| {
                TablesError::validation("a region is required: pass --region or set AWS_REGION")
            })?;
        Ok((bucket, region))
    }

    async fn run_database_query(
        &self,
        bucket: BucketReference,
        region: String,
        request: &DatabaseRequest,
    ) -> Result<QueryResult, TablesError> {
        let service = self.clients.query_service(&region);
        service.list_workgroups().await.map_err(|e| {
            TablesError::connection(format!("Failed to connect to Athena: {}", e.detail()))
        })?;

        let query = DatabaseQuery {
            bucket,
            namespace: request.namespace.clone(),
            sql: request.sql.clone(),
            region,
            output_location: request.output_location.clone(),
            workgroup: request.workgroup.clone(),
        };
        let options = PollOptions::new(
            self.options.database_poll_interval,
            self.manager.cancellation_token(),
        );
        Ok(athena::run_database_query(service.as_ref(), &query, &options).await)
    }

    /// Append JSON rows to a table through the catalog engine. Requires the write switch.
    pub async fn append_rows(
        &self,
        table_arn: &str,
        rows: &[Map<String, Value>],
    ) -> Result<QueryResult, TablesError> {
        let table = TableReference::parse(table_arn)?;
        self.write_gate
            .guard("append_rows", || async {
                let timer = Timer::start();
                let engine = self.manager.iceberg().ok_or_else(|| TablesError::Unsupported {
                    message: "the iceberg engine is not configured; add an [engines.iceberg] section"
                        .to_string(),
                })?;
                if engine.config().warehouse != table.bucket_arn() {
                    return Err(TablesError::validation(format!(
                        "table bucket {} is not the configured warehouse {}",
                        table.bucket_arn(),
                        engine.config().warehouse
                    )));
                }

                let catalog = self.clients.table_catalog(&table.region);
                let resolved = resolve::resolve_table(catalog.as_ref(), &table).await?;
                let appended = engine
                    .append_rows(&resolved.namespace, &resolved.name, rows)
                    .await?;

                Ok::<QueryResult, TablesError>(
                    QueryResult::success(EngineKind::Iceberg, Vec::new(), Vec::new(), timer.elapsed_ms())
                        .with_message(format!(
                            "Appended {} rows to {}.{}",
                            appended, resolved.namespace, resolved.name
                        ))
                        .with_metadata("rows_appended", Value::from(appended)),
                )
            })
            .await
    }

    /// Reachability of every registered engine.
    pub async fn test_engines(&self) -> BTreeMap<EngineKind, bool> {
        let results = self.manager.test_engines().await;
        for (kind, ok) in &results {
            if *ok {
                info!(engine = %kind, "engine reachable");
            } else {
                warn!(engine = %kind, "engine unreachable");
            }
        }
        results
    }
}
