//! Embedded-analytical adapter backed by an in-process DuckDB.
//!
//! The table bucket is attached once as an Iceberg database named
//! `s3tables_<bucket>` and the query's table reference is rewritten to
//! `<db>.<namespace>.<table>`.

use crate::arn::TableReference;
use crate::classify;
use crate::clients::{ClientFactory, EmbeddedDatabase, TabularData};
use crate::config::{DuckDbConfig, S3Credentials};
use crate::engine::athena::rewrite_table_reference;
use crate::engine::resolve::{self, ResolvedTable};
use crate::engine::{Engine, EngineKind, QueryResult, apply_limit, normalize};
use crate::error::TablesError;
use crate::logging::Timer;
use crate::masking;
use async_trait::async_trait;
use duckdb::Connection;
use duckdb::types::{TimeUnit, Value as DuckValue};
use parking_lot::Mutex;
use secrecy::ExposeSecret;
use serde_json::{Number, Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OnceCell};
use tracing::{debug, error, info, warn};

/// Quote a string as a SQL literal.
pub fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Local database name for an attached table bucket.
pub fn attached_db_name(bucket: &str) -> String {
    format!("s3tables_{}", bucket.replace(['-', '.'], "_"))
}

/// Session settings and extensions, in execution order.
pub fn setup_statements(config: &DuckDbConfig) -> Vec<String> {
    let work_dir = config.work_dir.display().to_string();
    let mut statements = vec![
        format!("SET memory_limit={}", sql_literal(&config.memory_limit)),
        format!("SET threads={}", config.threads),
        format!("SET home_directory={}", sql_literal(&work_dir)),
        format!("SET secret_directory={}", sql_literal(&format!("{}/secrets", work_dir))),
        format!(
            "SET extension_directory={}",
            sql_literal(&format!("{}/extensions", work_dir))
        ),
    ];
    for extension in ["aws", "httpfs", "iceberg"] {
        statements.push(format!("INSTALL {}", extension));
    }
    for extension in ["aws", "httpfs", "iceberg"] {
        statements.push(format!("LOAD {}", extension));
    }
    statements
}

fn explicit_secret_statement(credentials: &S3Credentials, region: &str) -> String {
    let session_token = credentials
        .session_token
        .as_ref()
        .map(|t| format!(", SESSION_TOKEN {}", sql_literal(t.expose_secret())))
        .unwrap_or_default();
    format!(
        "CREATE SECRET (TYPE s3, KEY_ID {}, SECRET {}{}, REGION {})",
        sql_literal(&credentials.access_key_id),
        sql_literal(credentials.secret_access_key.expose_secret()),
        session_token,
        sql_literal(region)
    )
}

fn credential_chain_statement(region: &str) -> String {
    format!(
        "CREATE SECRET (TYPE s3, PROVIDER credential_chain, REGION {})",
        sql_literal(region)
    )
}

pub fn attach_statement(bucket_arn: &str, db_name: &str) -> String {
    format!(
        "ATTACH {} AS {} (TYPE iceberg, ENDPOINT_TYPE s3_tables)",
        sql_literal(bucket_arn),
        db_name
    )
}

/// Rewrite the table reference to `target`, adding a FROM clause when there is none,
/// then apply the row limit.
///
/// A write with no FROM clause is refused rather than replaced by a scan.
pub fn build_query(
    sql: &str,
    name: &str,
    target: &str,
    limit: Option<usize>,
) -> Result<String, TablesError> {
    let trimmed = sql.trim().trim_end_matches(';').trim_end();
    let mut query = rewrite_table_reference(trimmed, name, target);
    if !contains_word(&query, "FROM") {
        if classify::leading_word(&query).as_deref() == Some("SELECT") {
            query = format!("{} FROM {}", query, target);
        } else {
            let writes: Vec<String> = classify::operations(&query)
                .into_iter()
                .filter(|op| classify::is_write(op))
                .collect();
            if !writes.is_empty() {
                return Err(TablesError::Unsupported {
                    message: format!(
                        "the duckdb engine only reads; run {} on the athena engine",
                        writes.join(", ")
                    ),
                });
            }
            query = format!("SELECT * FROM {}", target);
        }
    }
    Ok(apply_limit(&query, limit))
}

fn contains_word(sql: &str, word: &str) -> bool {
    sql.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .any(|w| w.eq_ignore_ascii_case(word))
}

pub struct DuckDbEngine {
    config: DuckDbConfig,
    clients: Arc<dyn ClientFactory>,
    database: Arc<dyn EmbeddedDatabase>,
    initialized: OnceCell<()>,
    /// Bucket ARN to attached database name.
    attached: AsyncMutex<HashMap<String, String>>,
}

impl DuckDbEngine {
    pub fn new(
        config: DuckDbConfig,
        clients: Arc<dyn ClientFactory>,
        database: Arc<dyn EmbeddedDatabase>,
    ) -> Result<Self, TablesError> {
        config.validate()?;
        Ok(Self {
            config,
            clients,
            database,
            initialized: OnceCell::new(),
            attached: AsyncMutex::new(HashMap::new()),
        })
    }

    /// Configure the session on first use. A failed setup is retried on the next call.
    async fn ensure_initialized(&self) -> Result<(), TablesError> {
        self.initialized
            .get_or_try_init(|| async {
                for statement in setup_statements(&self.config) {
                    self.database
                        .execute_batch(&statement)
                        .await
                        .map_err(|e| TablesError::connection(format!("duckdb setup failed: {}", e.detail())))?;
                }
                self.configure_credentials().await?;
                info!("duckdb session initialized");
                Ok::<(), TablesError>(())
            })
            .await
            .map(|_| ())
    }

    async fn configure_credentials(&self) -> Result<(), TablesError> {
        if let Some(credentials) = &self.config.credentials {
            let statement = explicit_secret_statement(credentials, &self.config.region);
            match self.database.execute_batch(&statement).await {
                Ok(()) => {
                    debug!(
                        statement = %masking::redact_in(&statement, &credentials.secret_access_key, false),
                        "configured explicit S3 credentials"
                    );
                    return Ok(());
                }
                Err(e) => warn!(error = %e, "explicit S3 credentials rejected, falling back to credential chain"),
            }
        }

        self.database
            .execute_batch(&credential_chain_statement(&self.config.region))
            .await
            .map_err(|e| {
                TablesError::connection(format!(
                    "unable to configure S3 credentials for duckdb: {}",
                    e.detail()
                ))
            })?;
        debug!("configured credential chain provider");
        Ok(())
    }

    /// Attach the table's bucket unless it already is. Returns the database name.
    async fn ensure_attached(&self, table: &TableReference) -> Result<String, TablesError> {
        let bucket_arn = table.bucket_arn();
        let mut attached = self.attached.lock().await;
        if let Some(db_name) = attached.get(&bucket_arn) {
            return Ok(db_name.clone());
        }

        let db_name = attached_db_name(&table.bucket);
        self.database
            .execute_batch(&attach_statement(&bucket_arn, &db_name))
            .await?;
        info!(bucket = %bucket_arn, %db_name, "attached table bucket");
        attached.insert(bucket_arn, db_name.clone());
        Ok(db_name)
    }

    /// Number of buckets attached so far.
    pub async fn attached_count(&self) -> usize {
        self.attached.lock().await.len()
    }

    async fn run(
        &self,
        table: &TableReference,
        sql: &str,
        limit: Option<usize>,
        timer: &Timer,
    ) -> Result<QueryResult, TablesError> {
        self.ensure_initialized().await?;

        let catalog = self.clients.table_catalog(&table.region);
        let ResolvedTable {
            namespace, name, ..
        } = resolve::resolve_table(catalog.as_ref(), table).await?;

        let db_name = self.ensure_attached(table).await?;
        let target = format!("{}.{}.{}", db_name, namespace, name);
        let query = build_query(sql, &name, &target, limit)?;
        debug!(%query, "executing duckdb query");

        let TabularData { columns, rows } = self.database.query(&query).await?;
        let rows = normalize::structured_rows(columns.len(), rows);
        let columns_meta = json!(columns);
        Ok(
            QueryResult::success(EngineKind::DuckDb, columns, rows, timer.elapsed_ms())
                .with_metadata("columns", columns_meta),
        )
    }
}

impl Engine for DuckDbEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::DuckDb
    }

    async fn execute(&self, table: &TableReference, sql: &str, limit: Option<usize>) -> QueryResult {
        let timer = Timer::start();
        match self.run(table, sql, limit, &timer).await {
            Ok(result) => {
                info!(
                    rows = result.rows_returned,
                    elapsed_ms = result.execution_time_ms,
                    "duckdb query completed"
                );
                result
            }
            Err(e) => {
                error!(error = %e, "duckdb query failed");
                QueryResult::error(
                    EngineKind::DuckDb,
                    format!("DuckDB execution failed: {}", e.detail()),
                    timer.elapsed_ms(),
                )
            }
        }
    }

    async fn test_connection(&self) -> bool {
        let probe = async {
            self.ensure_initialized().await?;
            self.database.query("SELECT 1").await
        };
        match probe.await {
            Ok(_) => true,
            Err(e) => {
                error!(error = %e, "duckdb connection test failed");
                false
            }
        }
    }
}

/// A lazily opened in-memory DuckDB connection.
///
/// The connection is not safe for concurrent use, so every call takes the
/// lock on a blocking thread and holds it for the whole statement.
#[derive(Clone, Default)]
pub struct LocalDuckDb {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl LocalDuckDb {
    pub fn new() -> Self {
        Self::default()
    }

    async fn with_connection<T, F>(&self, work: F) -> Result<T, TablesError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, TablesError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            if guard.is_none() {
                let opened = Connection::open_in_memory()
                    .map_err(|e| TablesError::connection(format!("cannot open duckdb: {}", e)))?;
                *guard = Some(opened);
            }
            match guard.as_ref() {
                Some(connection) => work(connection),
                None => Err(TablesError::connection("duckdb connection unavailable")),
            }
        })
        .await
        .map_err(|e| TablesError::execution(format!("duckdb worker failed: {}", e)))?
    }
}

#[async_trait]
impl EmbeddedDatabase for LocalDuckDb {
    async fn execute_batch(&self, sql: &str) -> Result<(), TablesError> {
        let sql = sql.to_string();
        self.with_connection(move |conn| {
            conn.execute_batch(&sql)
                .map_err(|e| TablesError::execution(e.to_string()))
        })
        .await
    }

    async fn execute_transaction(&self, sql: &str) -> Result<(), TablesError> {
        let sql = sql.to_string();
        self.with_connection(move |conn| {
            conn.execute_batch("BEGIN TRANSACTION")
                .map_err(|e| TablesError::execution(e.to_string()))?;
            match conn.execute_batch(&sql) {
                Ok(()) => conn
                    .execute_batch("COMMIT")
                    .map_err(|e| TablesError::execution(e.to_string())),
                Err(e) => {
                    if let Err(rollback) = conn.execute_batch("ROLLBACK") {
                        warn!(error = %rollback, "rollback after failed transaction also failed");
                    }
                    Err(TablesError::execution(e.to_string()))
                }
            }
        })
        .await
    }

    async fn query(&self, sql: &str) -> Result<TabularData, TablesError> {
        let sql = sql.to_string();
        self.with_connection(move |conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| TablesError::execution(e.to_string()))?;
            let mut rows = stmt
                .query([])
                .map_err(|e| TablesError::execution(e.to_string()))?;
            let columns = rows.as_ref().map(|s| s.column_names()).unwrap_or_default();

            let mut out = Vec::new();
            while let Some(row) = rows
                .next()
                .map_err(|e| TablesError::execution(e.to_string()))?
            {
                let mut cells = Vec::with_capacity(columns.len());
                for i in 0..columns.len() {
                    let value: DuckValue = row
                        .get(i)
                        .map_err(|e| TablesError::execution(format!("column {}: {}", i, e)))?;
                    cells.push(to_json(value));
                }
                out.push(cells);
            }
            Ok(TabularData { columns, rows: out })
        })
        .await
    }
}

/// Native DuckDB value to JSON; nulls stay `null`.
pub fn to_json(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(b) => Value::Bool(b),
        DuckValue::TinyInt(n) => Value::from(n),
        DuckValue::SmallInt(n) => Value::from(n),
        DuckValue::Int(n) => Value::from(n),
        DuckValue::BigInt(n) => Value::from(n),
        DuckValue::UTinyInt(n) => Value::from(n),
        DuckValue::USmallInt(n) => Value::from(n),
        DuckValue::UInt(n) => Value::from(n),
        DuckValue::UBigInt(n) => Value::from(n),
        DuckValue::HugeInt(n) => i64::try_from(n)
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(n.to_string())),
        DuckValue::Float(f) => float_json(f64::from(f)),
        DuckValue::Double(f) => float_json(f),
        DuckValue::Decimal(d) => Value::String(d.to_string()),
        DuckValue::Text(s) | DuckValue::Enum(s) => Value::String(s),
        DuckValue::Date32(days) => Value::String(format_date(i64::from(days))),
        DuckValue::Timestamp(unit, raw) => Value::String(format_timestamp(to_micros(unit, raw))),
        DuckValue::List(items) | DuckValue::Array(items) => {
            Value::Array(items.into_iter().map(to_json).collect())
        }
        other => Value::String(format!("{:?}", other)),
    }
}

fn float_json(f: f64) -> Value {
    Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(f.to_string()))
}

fn to_micros(unit: TimeUnit, raw: i64) -> i64 {
    match unit {
        TimeUnit::Second => raw.saturating_mul(1_000_000),
        TimeUnit::Millisecond => raw.saturating_mul(1_000),
        TimeUnit::Microsecond => raw,
        TimeUnit::Nanosecond => raw / 1_000,
    }
}

/// Days since the Unix epoch to `YYYY-MM-DD` (proleptic Gregorian).
fn format_date(days: i64) -> String {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);
    format!("{:04}-{:02}-{:02}", year, month, day)
}

fn format_timestamp(micros: i64) -> String {
    let days = micros.div_euclid(86_400_000_000);
    let rem = micros.rem_euclid(86_400_000_000);
    let secs = rem / 1_000_000;
    let frac = rem % 1_000_000;
    let base = format!(
        "{} {:02}:{:02}:{:02}",
        format_date(days),
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60
    );
    if frac == 0 {
        base
    } else {
        format!("{}.{:06}", base, frac)
    }
}
