use clap::Parser;
use s3tables_query::aws::AwsClientFactory;
use s3tables_query::cli::{AppendArgs, Cli, Command, DatabaseArgs, SqlInput, TableArgs};
use s3tables_query::config::{self, AppConfig, Overrides};
use s3tables_query::engine::{self, EngineManager, QueryResult};
use s3tables_query::error::TablesError;
use s3tables_query::masking::format_optional_secret;
use s3tables_query::service::{DatabaseRequest, ServiceOptions, TableQuery, TablesService};
use s3tables_query::{logging, output};
use serde_json::{Map, Value};
use std::process;
use std::sync::Arc;
use tracing::{debug, warn};

#[tokio::main]
async fn main() {
    // Load .env file (optional, ignore if missing)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(err) => {
            output::print_error(&err);
            process::exit(1);
        }
    }
}

/// Returns whether the command succeeded. Raised errors are validation,
/// policy, and configuration failures; backend failures come back as results.
async fn run(cli: Cli) -> Result<bool, TablesError> {
    let app_config = config::load(&Overrides {
        config_path: cli.config.clone(),
        allow_write: cli.allow_write,
        region: cli.region.clone(),
        verbose: cli.verbose,
        show_secrets: cli.show_secrets,
    })?;
    logging::init(app_config.verbose);
    log_config(&app_config);

    let clients = Arc::new(AwsClientFactory::load(app_config.region.as_deref()).await);
    let manager = EngineManager::from_settings(&app_config.engines, clients.clone());
    let service = TablesService::new(manager, clients, ServiceOptions::from_config(&app_config));

    let cancel = service.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; abandoning in-flight polls");
            cancel.cancel();
        }
    });

    match cli.command {
        Command::Query(ref args) => {
            let request = table_query(args)?;
            emit(&service.query_table(&request).await?)
        }
        Command::Modify(ref args) => {
            let request = table_query(args)?;
            emit(&service.modify_table(&request).await?)
        }
        Command::QueryDatabase(ref args) => {
            let request = database_request(args, &app_config)?;
            emit(&service.query_database(&request).await?)
        }
        Command::ModifyDatabase(ref args) => {
            let request = database_request(args, &app_config)?;
            emit(&service.modify_database(&request).await?)
        }
        Command::Append(ref args) => {
            let rows = read_rows(args)?;
            emit(&service.append_rows(&args.table_arn, &rows).await?)
        }
        Command::TestEngines => {
            let status = service.test_engines().await;
            output::print_result(&output::render_engine_status(&status)?);
            Ok(status.values().all(|ok| *ok))
        }
    }
}

fn log_config(config: &AppConfig) {
    let show = config.show_secrets;
    debug!(
        allow_write = config.allow_write,
        region = config.client_region(),
        row_limit = ?config.default_row_limit,
        "configuration loaded"
    );
    let duckdb = &config.engines.duckdb;
    debug!(
        memory_limit = %duckdb.memory_limit,
        threads = duckdb.threads,
        access_key_id = duckdb.credentials.as_ref().map(|c| c.access_key_id.as_str()).unwrap_or("(not set)"),
        secret_access_key = %format_optional_secret(duckdb.credentials.as_ref().map(|c| &c.secret_access_key), show),
        session_token = %format_optional_secret(duckdb.credentials.as_ref().and_then(|c| c.session_token.as_ref()), show),
        "duckdb engine settings"
    );
    let athena = &config.engines.athena;
    debug!(
        workgroup = %athena.workgroup,
        result_location = athena.result_location.as_deref().unwrap_or("(auto)"),
        "athena engine settings"
    );
    match &config.engines.spark {
        Some(spark) => debug!(
            application_id = %spark.application_id,
            job_role = spark.execution_role_arn.as_deref().unwrap_or("(not set)"),
            "spark engine settings"
        ),
        None => debug!("spark engine not configured"),
    }
    match &config.engines.iceberg {
        Some(iceberg) => debug!(
            warehouse = %iceberg.warehouse,
            uri = %iceberg.uri,
            namespace = %iceberg.namespace,
            "iceberg engine settings"
        ),
        None => debug!("iceberg engine not configured"),
    }
}

fn emit(result: &QueryResult) -> Result<bool, TablesError> {
    output::print_result(&output::render_result(result)?);
    Ok(result.is_success())
}

fn table_query(args: &TableArgs) -> Result<TableQuery, TablesError> {
    Ok(TableQuery {
        table_arn: args.table_arn.clone(),
        sql: resolve_sql(&args.input)?,
        engine: engine::parse_preference(&args.engine)?,
        limit: args.limit,
    })
}

fn database_request(args: &DatabaseArgs, config: &AppConfig) -> Result<DatabaseRequest, TablesError> {
    Ok(DatabaseRequest {
        bucket_arn: args.bucket_arn.clone(),
        namespace: args.namespace.clone(),
        sql: resolve_sql(&args.input)?,
        output_location: args.output_location.clone(),
        workgroup: args.workgroup.clone(),
        region: config.region.clone(),
    })
}

fn resolve_sql(input: &SqlInput) -> Result<String, TablesError> {
    if let Some(ref sql) = input.sql {
        return Ok(sql.clone());
    }
    if let Some(ref path) = input.sql_file {
        return std::fs::read_to_string(path).map_err(|e| TablesError::Config {
            message: format!("cannot read SQL file {}: {}", path.display(), e),
        });
    }
    Err(TablesError::validation(
        "no SQL provided: use the positional argument or --file",
    ))
}

fn read_rows(args: &AppendArgs) -> Result<Vec<Map<String, Value>>, TablesError> {
    let text = std::fs::read_to_string(&args.rows).map_err(|e| TablesError::Config {
        message: format!("cannot read rows file {}: {}", args.rows.display(), e),
    })?;
    serde_json::from_str(&text).map_err(|e| TablesError::Format {
        message: format!(
            "rows file {} must hold a JSON array of objects: {}",
            args.rows.display(),
            e
        ),
    })
}
