//! Direct-catalog adapter.
//!
//! SQL runs as written against a catalog session scoped to one warehouse and
//! namespace; there is no table-reference rewriting. Also the only adapter
//! that can append rows.

use crate::arn::TableReference;
use crate::clients::{ColumnSchema, EmbeddedDatabase, TableFormatCatalog, TabularData};
use crate::config::IcebergConfig;
use crate::engine::duckdb::{LocalDuckDb, sql_literal};
use crate::engine::{Engine, EngineKind, QueryResult, apply_limit, normalize};
use crate::error::TablesError;
use crate::logging::Timer;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

/// Quote an identifier for the embedded engine.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Coerce one JSON value to a SQL literal of the column's type.
pub fn coerce_literal(value: Option<&Value>, column: &ColumnSchema) -> Result<String, TablesError> {
    let value = match value {
        None | Some(Value::Null) => {
            if column.required {
                return Err(TablesError::validation(format!(
                    "column '{}' is required",
                    column.name
                )));
            }
            return Ok("NULL".to_string());
        }
        Some(v) => v,
    };

    let data_type = column.data_type.to_ascii_uppercase();
    let base = data_type.split('(').next().unwrap_or_default().trim();
    let mismatch = || {
        TablesError::validation(format!(
            "column '{}' expects {} but got {}",
            column.name, data_type, value
        ))
    };

    match base {
        "BOOLEAN" | "BOOL" => match value {
            Value::Bool(b) => Ok(if *b { "TRUE" } else { "FALSE" }.to_string()),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Ok("TRUE".to_string()),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Ok("FALSE".to_string()),
            _ => Err(mismatch()),
        },
        "TINYINT" | "SMALLINT" | "INTEGER" | "INT" | "BIGINT" | "HUGEINT" | "UTINYINT"
        | "USMALLINT" | "UINTEGER" | "UBIGINT" => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
            Value::String(s) => s
                .trim()
                .parse::<i128>()
                .map(|n| n.to_string())
                .map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        "FLOAT" | "REAL" | "DOUBLE" | "DECIMAL" | "NUMERIC" => match value {
            Value::Number(n) => Ok(n.to_string()),
            Value::String(s) => {
                let trimmed = s.trim();
                match trimmed.parse::<f64>() {
                    Ok(f) if f.is_finite() => Ok(trimmed.to_string()),
                    _ => Err(mismatch()),
                }
            }
            _ => Err(mismatch()),
        },
        "VARCHAR" | "TEXT" | "STRING" | "CHAR" | "UUID" => match value {
            Value::String(s) => Ok(sql_literal(s)),
            Value::Number(_) | Value::Bool(_) => Ok(sql_literal(&value.to_string())),
            _ => Err(mismatch()),
        },
        "DATE" | "TIME" | "TIMESTAMP" | "TIMESTAMPTZ" | "TIMESTAMP WITH TIME ZONE" => match value {
            Value::String(s) => Ok(format!("CAST({} AS {})", sql_literal(s), data_type)),
            _ => Err(mismatch()),
        },
        _ => Ok(format!(
            "CAST({} AS {})",
            sql_literal(&value.to_string()),
            data_type
        )),
    }
}

/// Check rows against the schema and render each as one literal per schema column.
///
/// Unknown keys are rejected; missing optional columns become NULL.
pub fn coerce_rows(
    schema: &[ColumnSchema],
    rows: &[Map<String, Value>],
) -> Result<Vec<Vec<String>>, TablesError> {
    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            if let Some(unknown) = row
                .keys()
                .find(|key| !schema.iter().any(|c| &c.name == *key))
            {
                return Err(TablesError::validation(format!(
                    "row {}: unknown column '{}'",
                    i, unknown
                )));
            }
            schema
                .iter()
                .map(|column| {
                    coerce_literal(row.get(&column.name), column).map_err(|e| {
                        TablesError::validation(format!("row {}: {}", i, e.detail()))
                    })
                })
                .collect()
        })
        .collect()
}

pub struct IcebergEngine {
    config: IcebergConfig,
    session: Arc<dyn TableFormatCatalog>,
}

impl IcebergEngine {
    pub fn new(config: IcebergConfig, session: Arc<dyn TableFormatCatalog>) -> Result<Self, TablesError> {
        config.validate()?;
        Ok(Self { config, session })
    }

    pub fn config(&self) -> &IcebergConfig {
        &self.config
    }

    /// Validate `rows` against the table schema and append them in one transaction.
    pub async fn append_rows(
        &self,
        namespace: &str,
        table: &str,
        rows: &[Map<String, Value>],
    ) -> Result<usize, TablesError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let schema = self
            .session
            .table_schema(namespace, table)
            .await
            .map_err(|e| TablesError::execution(format!("Error appending rows: {}", e.detail())))?;
        let literal_rows = coerce_rows(&schema, rows)?;
        let columns: Vec<String> = schema.iter().map(|c| c.name.clone()).collect();

        let appended = self
            .session
            .append(namespace, table, &columns, &literal_rows)
            .await
            .map_err(|e| TablesError::execution(format!("Error appending rows: {}", e.detail())))?;
        info!(%namespace, %table, rows = appended, "rows appended");
        Ok(appended)
    }
}

impl Engine for IcebergEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Iceberg
    }

    async fn execute(&self, table: &TableReference, sql: &str, limit: Option<usize>) -> QueryResult {
        let timer = Timer::start();
        let query = apply_limit(sql, limit);
        debug!(table = %table, %query, namespace = %self.config.namespace, "executing catalog query");

        match self.session.sql(&query).await {
            Ok(TabularData { columns, rows }) => {
                let rows = normalize::structured_rows(columns.len(), rows);
                QueryResult::success(EngineKind::Iceberg, columns, rows, timer.elapsed_ms())
            }
            Err(e) => {
                error!(error = %e, "catalog query failed");
                QueryResult::error(
                    EngineKind::Iceberg,
                    format!("Error executing query: {}", e.detail()),
                    timer.elapsed_ms(),
                )
            }
        }
    }

    async fn test_connection(&self) -> bool {
        match self.session.list_namespaces().await {
            Ok(_) => true,
            Err(e) => {
                error!(error = %e, "catalog connection test failed");
                false
            }
        }
    }
}

/// ATTACH options for the configured catalog endpoint.
pub fn catalog_attach_statement(config: &IcebergConfig) -> String {
    let options = if !config.sigv4_enabled {
        format!(
            "TYPE iceberg, ENDPOINT {}, AUTHORIZATION_TYPE 'none'",
            sql_literal(&config.uri)
        )
    } else {
        match config.signing_name.as_str() {
            // Managed endpoints are resolved from the warehouse itself.
            "s3tables" => "TYPE iceberg, ENDPOINT_TYPE s3_tables".to_string(),
            "glue" => "TYPE iceberg, ENDPOINT_TYPE glue".to_string(),
            _ => format!(
                "TYPE iceberg, ENDPOINT {}, AUTHORIZATION_TYPE 'sigv4'",
                sql_literal(&config.uri)
            ),
        }
    };
    format!(
        "ATTACH {} AS {} ({})",
        sql_literal(&config.warehouse),
        quote_ident(&config.catalog_name),
        options
    )
}

/// A REST catalog session opened through the embedded engine's Iceberg support.
pub struct RestCatalogSession {
    config: IcebergConfig,
    database: Arc<dyn EmbeddedDatabase>,
    attached: OnceCell<()>,
}

impl RestCatalogSession {
    pub fn new(config: IcebergConfig) -> Self {
        Self::with_database(config, Arc::new(LocalDuckDb::new()))
    }

    pub fn with_database(config: IcebergConfig, database: Arc<dyn EmbeddedDatabase>) -> Self {
        Self {
            config,
            database,
            attached: OnceCell::new(),
        }
    }

    fn table_path(&self, namespace: &str, table: &str) -> String {
        format!(
            "{}.{}.{}",
            quote_ident(&self.config.catalog_name),
            quote_ident(namespace),
            quote_ident(table)
        )
    }

    async fn ensure_attached(&self) -> Result<(), TablesError> {
        self.attached
            .get_or_try_init(|| async {
                let mut statements = Vec::new();
                for extension in ["aws", "httpfs", "iceberg"] {
                    statements.push(format!("INSTALL {}", extension));
                    statements.push(format!("LOAD {}", extension));
                }
                statements.push(format!(
                    "CREATE SECRET (TYPE s3, PROVIDER credential_chain, REGION {})",
                    sql_literal(&self.config.region)
                ));
                statements.push(catalog_attach_statement(&self.config));
                statements.push(format!(
                    "USE {}.{}",
                    quote_ident(&self.config.catalog_name),
                    quote_ident(&self.config.namespace)
                ));

                for statement in &statements {
                    self.database.execute_batch(statement).await.map_err(|e| {
                        TablesError::connection(format!(
                            "No active catalog session: {}",
                            e.detail()
                        ))
                    })?;
                }
                info!(warehouse = %self.config.warehouse, namespace = %self.config.namespace, "catalog session attached");
                Ok::<(), TablesError>(())
            })
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl TableFormatCatalog for RestCatalogSession {
    async fn sql(&self, query: &str) -> Result<TabularData, TablesError> {
        self.ensure_attached().await?;
        self.database.query(query).await
    }

    async fn list_namespaces(&self) -> Result<Vec<String>, TablesError> {
        self.ensure_attached().await?;
        let data = self
            .database
            .query(&format!(
                "SELECT schema_name FROM information_schema.schemata WHERE catalog_name = {} ORDER BY schema_name",
                sql_literal(&self.config.catalog_name)
            ))
            .await?;
        Ok(data
            .rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect())
    }

    async fn table_schema(&self, namespace: &str, table: &str) -> Result<Vec<ColumnSchema>, TablesError> {
        self.ensure_attached().await?;
        let data = self
            .database
            .query(&format!("DESCRIBE {}", self.table_path(namespace, table)))
            .await?;

        let position = |name: &str| data.columns.iter().position(|c| c == name);
        let (Some(name_at), Some(type_at)) = (position("column_name"), position("column_type")) else {
            return Err(TablesError::execution(format!(
                "unexpected DESCRIBE output for {}.{}",
                namespace, table
            )));
        };
        let null_at = position("null");

        Ok(data
            .rows
            .iter()
            .map(|row| {
                let text = |i: usize| row.get(i).and_then(Value::as_str).unwrap_or_default();
                ColumnSchema {
                    name: text(name_at).to_string(),
                    data_type: text(type_at).to_ascii_uppercase(),
                    required: null_at.is_some_and(|i| text(i).eq_ignore_ascii_case("NO")),
                }
            })
            .collect())
    }

    async fn append(
        &self,
        namespace: &str,
        table: &str,
        columns: &[String],
        literal_rows: &[Vec<String>],
    ) -> Result<usize, TablesError> {
        self.ensure_attached().await?;
        let column_list = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let values = literal_rows
            .iter()
            .map(|row| format!("({})", row.join(", ")))
            .collect::<Vec<_>>()
            .join(", ");
        let statement = format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.table_path(namespace, table),
            column_list,
            values
        );

        self.database.execute_transaction(&statement).await?;
        Ok(literal_rows.len())
    }
}
