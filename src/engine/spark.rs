//! Batch-distributed adapter: one generated PySpark job per query.
//!
//! The job prints `QUERY_SUCCESS:`, `DATA_ROW:` and `QUERY_ERROR:` markers to
//! its log stream. Row data is not read back from the logs; a successful run
//! reports zero rows.

use crate::arn::TableReference;
use crate::clients::{ClientFactory, JobSubmission};
use crate::config::SparkConfig;
use crate::engine::athena::rewrite_table_reference;
use crate::engine::poll::{self, PollOptions, RunState};
use crate::engine::resolve::{self, ResolvedTable};
use crate::engine::{Engine, EngineKind, QueryResult, apply_limit};
use crate::error::TablesError;
use crate::logging::Timer;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Catalog name the generated job registers the table bucket under.
pub const SPARK_CATALOG: &str = "s3tables";

/// Most rows a job echoes as `DATA_ROW` lines.
const MAX_ECHOED_ROWS: usize = 1000;

pub fn default_script_bucket(account_id: &str, region: &str) -> String {
    format!("s3tables-query-scripts-{}-{}", account_id, region)
}

/// Render the job script for one query. `sql` must already reference `<catalog>.<ns>.<table>`.
pub fn generate_script(
    table: &TableReference,
    sql: &str,
    job_id: &str,
    config: &SparkConfig,
) -> String {
    // A JSON string literal is also a valid Python string literal.
    let query_literal = serde_json::to_string(sql).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        r#"import json
import sys
from pyspark.sql import SparkSession

spark = (
    SparkSession.builder.appName("s3tables-query-{job_id}")
    .config("spark.sql.extensions", "org.apache.iceberg.spark.extensions.IcebergSparkSessionExtensions")
    .config("spark.sql.catalog.{catalog}", "org.apache.iceberg.spark.SparkCatalog")
    .config("spark.sql.catalog.{catalog}.type", "rest")
    .config("spark.sql.catalog.{catalog}.uri", "https://s3tables.{region}.amazonaws.com/iceberg")
    .config("spark.sql.catalog.{catalog}.warehouse", "{warehouse}")
    .config("spark.sql.catalog.{catalog}.rest.sigv4-enabled", "true")
    .config("spark.sql.catalog.{catalog}.rest.signing-name", "s3tables")
    .config("spark.sql.catalog.{catalog}.rest.signing-region", "{region}")
    .config("spark.executor.memory", "{executor_memory}")
    .config("spark.executor.cores", "{executor_cores}")
    .config("spark.driver.memory", "{driver_memory}")
    .getOrCreate()
)

try:
    query = {query_literal}
    df = spark.sql(query)
    results = df.toJSON().collect()
    print("QUERY_SUCCESS: " + json.dumps({{"row_count": len(results), "schema": df.schema.json()}}))
    for row in results[:{max_rows}]:
        print("DATA_ROW: " + row)
except Exception as e:
    print("QUERY_ERROR: " + str(e))
    sys.exit(1)
finally:
    spark.stop()
"#,
        job_id = job_id,
        catalog = SPARK_CATALOG,
        region = table.region,
        warehouse = table.bucket_arn(),
        executor_memory = config.executor_memory,
        executor_cores = config.executor_cores,
        driver_memory = config.driver_memory,
        query_literal = query_literal,
        max_rows = MAX_ECHOED_ROWS,
    )
}

pub fn spark_submit_parameters(config: &SparkConfig) -> String {
    format!(
        "--conf spark.executor.memory={} --conf spark.executor.cores={} --conf spark.driver.memory={}",
        config.executor_memory, config.executor_cores, config.driver_memory
    )
}

pub struct SparkEngine {
    config: SparkConfig,
    clients: Arc<dyn ClientFactory>,
    cancel: CancellationToken,
}

impl SparkEngine {
    pub fn new(config: SparkConfig, clients: Arc<dyn ClientFactory>) -> Result<Self, TablesError> {
        config.validate()?;
        Ok(Self {
            config,
            clients,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    async fn run(
        &self,
        table: &TableReference,
        sql: &str,
        limit: Option<usize>,
        timer: &Timer,
    ) -> Result<QueryResult, TablesError> {
        let role = self.config.execution_role_arn.clone().ok_or_else(|| TablesError::Config {
            message: "EMR_SERVERLESS_JOB_ROLE_ARN is not set".to_string(),
        })?;

        let catalog = self.clients.table_catalog(&table.region);
        let ResolvedTable {
            namespace, name, ..
        } = resolve::resolve_table(catalog.as_ref(), table).await?;
        let target = format!("{}.{}.{}", SPARK_CATALOG, namespace, name);
        let query = apply_limit(&rewrite_table_reference(sql, &name, &target), limit);

        let job_id: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
        let script = generate_script(table, &query, &job_id, &self.config);
        let bucket = self
            .config
            .script_bucket
            .clone()
            .unwrap_or_else(|| default_script_bucket(&table.account_id, &table.region));
        let key = format!("jobs/{}.py", job_id);

        let store = self.clients.object_store(&table.region);
        store.ensure_bucket(&bucket, &table.region).await?;
        store.put_object(&bucket, &key, script.into_bytes()).await?;
        let entry_point = format!("s3://{}/{}", bucket, key);
        debug!(%entry_point, %query, "uploaded job script");

        let service = self.clients.batch_service(&table.region);
        let submission = JobSubmission {
            application_id: self.config.application_id.clone(),
            execution_role_arn: role,
            entry_point: entry_point.clone(),
            spark_submit_parameters: spark_submit_parameters(&self.config),
            log_group: self.config.log_group.clone(),
            client_token: Uuid::new_v4().to_string(),
        };
        let job_run_id = service.start_job_run(&submission).await?;
        info!(%job_run_id, "started batch job");

        let options = PollOptions::new(self.config.poll_interval, self.cancel.clone());
        let application_id = &self.config.application_id;
        let run = poll::poll_until_terminal(&options, || {
            service.get_job_run(application_id, &job_run_id)
        })
        .await?;

        if run.state != RunState::Succeeded {
            return Err(TablesError::execution(format!(
                "EMR Serverless job failed: {}",
                run.state_details
                    .unwrap_or_else(|| format!("job ended in state {}", run.state_name))
            )));
        }

        Ok(
            QueryResult::success(EngineKind::Spark, Vec::new(), Vec::new(), timer.elapsed_ms())
                .with_message("Query executed successfully on EMR Serverless")
                .with_metadata("job_run_id", Value::String(job_run_id))
                .with_metadata("entry_point", Value::String(entry_point))
                .with_metadata("log_group", Value::String(self.config.log_group.clone())),
        )
    }
}

impl Engine for SparkEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Spark
    }

    async fn execute(&self, table: &TableReference, sql: &str, limit: Option<usize>) -> QueryResult {
        let timer = Timer::start();
        match self.run(table, sql, limit, &timer).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "batch query failed");
                QueryResult::error(
                    EngineKind::Spark,
                    format!("EMR Serverless execution failed: {}", e.detail()),
                    timer.elapsed_ms(),
                )
            }
        }
    }

    async fn test_connection(&self) -> bool {
        match self
            .clients
            .batch_service(&self.config.region)
            .list_applications()
            .await
        {
            Ok(_) => true,
            Err(e) => {
                error!(error = %e, "batch service connection test failed");
                false
            }
        }
    }
}
