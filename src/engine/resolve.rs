use crate::arn::TableReference;
use crate::clients::TableCatalog;
use crate::error::TablesError;
use tracing::debug;

/// A table located in its bucket's catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTable {
    pub namespace: String,
    pub name: String,
    pub table_arn: String,
}

/// Map a table reference to its namespace and human name by listing the bucket.
///
/// Matches by full ARN first, then by the id segment of the listed ARN, then by name.
/// Tables without a namespace land in `default`.
pub async fn resolve_table(
    catalog: &dyn TableCatalog,
    table: &TableReference,
) -> Result<ResolvedTable, TablesError> {
    let bucket_arn = table.bucket_arn();
    let tables = catalog.list_tables(&bucket_arn).await?;
    debug!(bucket = %bucket_arn, count = tables.len(), "listed tables for resolution");

    let id_suffix = format!("/table/{}", table.table);
    let found = tables
        .iter()
        .find(|t| t.table_arn == table.as_str())
        .or_else(|| tables.iter().find(|t| t.table_arn.ends_with(&id_suffix)))
        .or_else(|| tables.iter().find(|t| t.name == table.table));

    match found {
        Some(t) => Ok(ResolvedTable {
            namespace: t
                .namespace
                .first()
                .cloned()
                .unwrap_or_else(|| "default".to_string()),
            name: t.name.clone(),
            table_arn: t.table_arn.clone(),
        }),
        None => Err(TablesError::execution(format!(
            "table '{}' not found in bucket '{}'",
            table.table, table.bucket
        ))),
    }
}
