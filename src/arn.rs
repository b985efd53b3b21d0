use crate::error::TablesError;
use std::fmt;

const TABLE_FORMAT: &str = "arn:<partition>:s3tables:<region>:<account>:bucket/<bucket-name>/table/<table-id>";
const BUCKET_FORMAT: &str = "arn:<partition>:s3tables:<region>:<account>:bucket/<bucket-name>";

/// A parsed table ARN.
///
/// `table` is whatever the ARN carries in its last segment: a table name
/// for some callers, the opaque table id for ARNs returned by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableReference {
    pub partition: String,
    pub service: String,
    pub region: String,
    pub account_id: String,
    pub bucket: String,
    pub table: String,
    raw: String,
}

impl TableReference {
    /// Parse `arn:partition:service:region:account:bucket/<name>/table/<id>`.
    ///
    /// Pure; performs no I/O.
    pub fn parse(arn: &str) -> Result<Self, TablesError> {
        let arn = arn.trim();
        let parts: Vec<&str> = arn.splitn(6, ':').collect();
        if parts.len() < 6 || parts[0] != "arn" {
            return Err(TablesError::validation(format!(
                "invalid table ARN format: '{}' (expected {})",
                arn, TABLE_FORMAT
            )));
        }

        let resource: Vec<&str> = parts[5].split('/').collect();
        if resource.len() != 4 || resource[0] != "bucket" || resource[2] != "table" {
            return Err(TablesError::validation(format!(
                "invalid table ARN resource format: '{}' (expected {})",
                arn, TABLE_FORMAT
            )));
        }
        if resource[1].is_empty() || resource[3].is_empty() {
            return Err(TablesError::validation(format!(
                "table ARN has an empty bucket or table segment: '{}' (expected {})",
                arn, TABLE_FORMAT
            )));
        }

        Ok(Self {
            partition: parts[1].to_string(),
            service: parts[2].to_string(),
            region: parts[3].to_string(),
            account_id: parts[4].to_string(),
            bucket: resource[1].to_string(),
            table: resource[3].to_string(),
            raw: arn.to_string(),
        })
    }

    /// The ARN of the table bucket containing this table.
    pub fn bucket_arn(&self) -> String {
        format!(
            "arn:{}:{}:{}:{}:bucket/{}",
            self.partition, self.service, self.region, self.account_id, self.bucket
        )
    }

    pub fn bucket_ref(&self) -> BucketReference {
        BucketReference {
            partition: self.partition.clone(),
            service: self.service.clone(),
            region: self.region.clone(),
            account_id: self.account_id.clone(),
            bucket: self.bucket.clone(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for TableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A parsed table-bucket ARN (`...:bucket/<name>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketReference {
    pub partition: String,
    pub service: String,
    pub region: String,
    pub account_id: String,
    pub bucket: String,
}

impl BucketReference {
    pub fn parse(arn: &str) -> Result<Self, TablesError> {
        let arn = arn.trim();
        let parts: Vec<&str> = arn.splitn(6, ':').collect();
        if parts.len() < 6 || parts[0] != "arn" {
            return Err(TablesError::validation(format!(
                "invalid table bucket ARN format: '{}' (expected {})",
                arn, BUCKET_FORMAT
            )));
        }
        if parts[4].is_empty() {
            return Err(TablesError::validation(format!(
                "table bucket ARN has no account id: '{}'",
                arn
            )));
        }

        let resource: Vec<&str> = parts[5].split('/').collect();
        if resource.len() != 2 || resource[0] != "bucket" || resource[1].is_empty() {
            return Err(TablesError::validation(format!(
                "invalid table bucket ARN resource format: '{}' (expected {})",
                arn, BUCKET_FORMAT
            )));
        }

        Ok(Self {
            partition: parts[1].to_string(),
            service: parts[2].to_string(),
            region: parts[3].to_string(),
            account_id: parts[4].to_string(),
            bucket: resource[1].to_string(),
        })
    }

    pub fn arn(&self) -> String {
        format!(
            "arn:{}:{}:{}:{}:bucket/{}",
            self.partition, self.service, self.region, self.account_id, self.bucket
        )
    }
}

impl fmt::Display for BucketReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.arn())
    }
}
