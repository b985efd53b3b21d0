pub mod athena;
pub mod duckdb;
pub mod iceberg;
pub mod manager;
pub mod normalize;
pub mod poll;
pub mod resolve;
pub mod spark;

use crate::arn::TableReference;
use crate::classify;
use crate::error::TablesError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

pub use athena::AthenaEngine;
pub use duckdb::DuckDbEngine;
pub use iceberg::IcebergEngine;
pub use manager::EngineManager;
pub use spark::SparkEngine;

/// Discriminator for the four adapter variants. Ordering drives registry iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    DuckDb,
    Athena,
    Spark,
    Iceberg,
}

impl EngineKind {
    pub const ALL: [EngineKind; 4] = [
        EngineKind::DuckDb,
        EngineKind::Athena,
        EngineKind::Spark,
        EngineKind::Iceberg,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::DuckDb => "duckdb",
            EngineKind::Athena => "athena",
            EngineKind::Spark => "spark",
            EngineKind::Iceberg => "iceberg",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = TablesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "duckdb" => Ok(EngineKind::DuckDb),
            "athena" => Ok(EngineKind::Athena),
            "spark" | "emr" => Ok(EngineKind::Spark),
            "iceberg" | "pyiceberg" => Ok(EngineKind::Iceberg),
            other => Err(TablesError::validation(format!(
                "unknown engine '{}' (expected auto, duckdb, athena, spark or iceberg)",
                other
            ))),
        }
    }
}

/// Parse an engine preference; `auto` means no preference.
pub fn parse_preference(s: &str) -> Result<Option<EngineKind>, TablesError> {
    if s.trim().eq_ignore_ascii_case("auto") {
        Ok(None)
    } else {
        s.parse().map(Some)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Success,
    Error,
}

/// Normalized outcome of one query, whatever engine ran it.
///
/// On success `rows` is present and `rows_returned == rows.len()`.
/// On error `rows` is absent and `message` carries the diagnostic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub status: QueryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub rows_returned: usize,
    pub execution_time_ms: f64,
    pub engine_used: EngineKind,
    pub columns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Vec<Value>>>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

impl QueryResult {
    pub fn success(
        engine: EngineKind,
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
        execution_time_ms: f64,
    ) -> Self {
        Self {
            status: QueryStatus::Success,
            message: None,
            rows_returned: rows.len(),
            execution_time_ms,
            engine_used: engine,
            columns,
            rows: Some(rows),
            metadata: Map::new(),
            next_token: None,
        }
    }

    pub fn error(engine: EngineKind, message: impl Into<String>, execution_time_ms: f64) -> Self {
        Self {
            status: QueryStatus::Error,
            message: Some(message.into()),
            rows_returned: 0,
            execution_time_ms,
            engine_used: engine,
            columns: Vec::new(),
            rows: None,
            metadata: Map::new(),
            next_token: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn with_next_token(mut self, token: Option<String>) -> Self {
        self.next_token = token;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }
}

/// Contract every adapter implements.
///
/// `execute` never fails: backend-side failures come back as an error
/// [`QueryResult`].
pub trait Engine {
    fn kind(&self) -> EngineKind;

    fn execute(
        &self,
        table: &TableReference,
        sql: &str,
        limit: Option<usize>,
    ) -> impl std::future::Future<Output = QueryResult> + Send;

    fn test_connection(&self) -> impl std::future::Future<Output = bool> + Send;
}

/// The registered adapter variants, dispatched by kind.
pub enum EngineAdapter {
    DuckDb(DuckDbEngine),
    Athena(AthenaEngine),
    Spark(SparkEngine),
    Iceberg(IcebergEngine),
}

impl EngineAdapter {
    pub fn kind(&self) -> EngineKind {
        match self {
            EngineAdapter::DuckDb(e) => e.kind(),
            EngineAdapter::Athena(e) => e.kind(),
            EngineAdapter::Spark(e) => e.kind(),
            EngineAdapter::Iceberg(e) => e.kind(),
        }
    }

    pub async fn execute(
        &self,
        table: &TableReference,
        sql: &str,
        limit: Option<usize>,
    ) -> QueryResult {
        match self {
            EngineAdapter::DuckDb(e) => e.execute(table, sql, limit).await,
            EngineAdapter::Athena(e) => e.execute(table, sql, limit).await,
            EngineAdapter::Spark(e) => e.execute(table, sql, limit).await,
            EngineAdapter::Iceberg(e) => e.execute(table, sql, limit).await,
        }
    }

    pub async fn test_connection(&self) -> bool {
        match self {
            EngineAdapter::DuckDb(e) => e.test_connection().await,
            EngineAdapter::Athena(e) => e.test_connection().await,
            EngineAdapter::Spark(e) => e.test_connection().await,
            EngineAdapter::Iceberg(e) => e.test_connection().await,
        }
    }
}

/// Statement kinds a row limit can be attached to.
const ROW_RETURNING: &[&str] = &["SELECT", "WITH", "VALUES", "SHOW", "DESCRIBE"];

/// Append ` LIMIT n` to a row-returning statement without a top-level LIMIT.
///
/// Writes and DDL are returned unchanged.
pub fn apply_limit(sql: &str, limit: Option<usize>) -> String {
    let trimmed = sql.trim_end().trim_end_matches(';').trim_end();
    match limit {
        Some(n) if returns_rows(trimmed) && !has_limit(trimmed) => {
            format!("{} LIMIT {}", trimmed, n)
        }
        _ => trimmed.to_string(),
    }
}

/// Leads with a row-returning keyword and carries no write at the top level.
/// `VALUES` on its own is a row constructor, not a write.
pub fn returns_rows(sql: &str) -> bool {
    let leads_with_query = classify::leading_word(sql)
        .is_some_and(|word| ROW_RETURNING.contains(&word.as_str()));
    leads_with_query
        && !classify::operations(sql)
            .iter()
            .any(|op| op != "VALUES" && classify::is_write(op))
}

fn has_limit(sql: &str) -> bool {
    classify::top_level_words(sql).contains("LIMIT")
}
