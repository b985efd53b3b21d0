use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "s3tables-query",
    version,
    about = "Multi-engine SQL access to S3 Tables with a read/write policy gate"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short = 'c', long, global = true, env = "S3TQ_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit diagnostics to stderr
    #[arg(short = 'v', long, global = true, env = "S3TQ_VERBOSE")]
    pub verbose: bool,

    /// Disable credential masking in diagnostics
    #[arg(long, global = true, env = "S3TQ_SHOW_SECRETS")]
    pub show_secrets: bool,

    /// Enable mutating operations (modify, modify-database, append)
    #[arg(long, global = true)]
    pub allow_write: bool,

    /// AWS region for clients and the database path
    #[arg(long, global = true)]
    pub region: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a read-only query against one table
    Query(TableArgs),

    /// Run a query that may write but not destroy (requires --allow-write)
    Modify(TableArgs),

    /// Run a read-only query against a bucket namespace
    #[command(name = "query-database")]
    QueryDatabase(DatabaseArgs),

    /// Run a namespace query that may write but not destroy (requires --allow-write)
    #[command(name = "modify-database")]
    ModifyDatabase(DatabaseArgs),

    /// Append JSON rows to a table (requires --allow-write)
    Append(AppendArgs),

    /// Check which engines are reachable
    #[command(name = "test-engines")]
    TestEngines,
}

#[derive(Args, Debug)]
pub struct SqlInput {
    /// SQL query text
    pub sql: Option<String>,

    /// Read SQL from file
    #[arg(short = 'f', long = "file", conflicts_with = "sql")]
    pub sql_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct TableArgs {
    /// Table ARN: arn:aws:s3tables:<region>:<account>:bucket/<bucket>/table/<table>
    #[arg(long, env = "S3TQ_TABLE_ARN")]
    pub table_arn: String,

    /// Engine: auto, duckdb, athena, spark or iceberg
    #[arg(short = 'e', long, default_value = "auto", env = "S3TQ_ENGINE")]
    pub engine: String,

    /// Max rows to return
    #[arg(short = 'l', long)]
    pub limit: Option<usize>,

    #[command(flatten)]
    pub input: SqlInput,
}

#[derive(Args, Debug)]
pub struct DatabaseArgs {
    /// Table bucket ARN: arn:aws:s3tables:<region>:<account>:bucket/<bucket>
    #[arg(long, env = "S3TQ_BUCKET_ARN")]
    pub bucket_arn: String,

    /// Namespace to use as the query database
    #[arg(short = 'n', long)]
    pub namespace: String,

    /// Result location (s3://...)
    #[arg(long)]
    pub output_location: Option<String>,

    /// Workgroup (default: primary)
    #[arg(long)]
    pub workgroup: Option<String>,

    #[command(flatten)]
    pub input: SqlInput,
}

#[derive(Args, Debug)]
pub struct AppendArgs {
    /// Table ARN: arn:aws:s3tables:<region>:<account>:bucket/<bucket>/table/<table>
    #[arg(long, env = "S3TQ_TABLE_ARN")]
    pub table_arn: String,

    /// JSON file holding an array of row objects
    #[arg(long)]
    pub rows: PathBuf,
}
