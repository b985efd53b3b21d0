use crate::error::TablesError;
use directories::ProjectDirs;
use secrecy::SecretString;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Region used for clients when nothing else names one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Top-level application configuration. Built once at startup, immutable afterwards.
#[derive(Debug)]
pub struct AppConfig {
    pub allow_write: bool,
    /// Explicitly configured region (flag, `AWS_REGION`, or config file).
    pub region: Option<String>,
    pub default_row_limit: Option<usize>,
    pub verbose: bool,
    pub show_secrets: bool,
    pub engines: EngineSettings,
}

impl AppConfig {
    /// Region to build clients for when the request itself carries none.
    pub fn client_region(&self) -> &str {
        self.region.as_deref().unwrap_or(DEFAULT_REGION)
    }
}

/// Settings shared by every engine kind.
///
/// `max_retries` is advisory: no adapter loops on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommon {
    pub timeout_seconds: u64,
    pub max_retries: u32,
}

impl Default for EngineCommon {
    fn default() -> Self {
        Self {
            timeout_seconds: 300,
            max_retries: 3,
        }
    }
}

impl EngineCommon {
    pub fn validate(&self) -> Result<(), TablesError> {
        if !(1..=3600).contains(&self.timeout_seconds) {
            return Err(config_error(format!(
                "timeout_seconds must be between 1 and 3600, got {}",
                self.timeout_seconds
            )));
        }
        if self.max_retries > 10 {
            return Err(config_error(format!(
                "max_retries must be between 0 and 10, got {}",
                self.max_retries
            )));
        }
        Ok(())
    }
}

/// Explicit object-store credentials for the embedded engine.
#[derive(Debug, Clone)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
    pub session_token: Option<SecretString>,
}

#[derive(Debug, Clone)]
pub struct DuckDbConfig {
    pub common: EngineCommon,
    pub memory_limit: String,
    pub threads: u32,
    pub region: String,
    /// `None` means the engine's credential chain provider.
    pub credentials: Option<S3Credentials>,
    /// Home, secret and extension directories live under here.
    pub work_dir: PathBuf,
}

impl Default for DuckDbConfig {
    fn default() -> Self {
        Self {
            common: EngineCommon::default(),
            memory_limit: "2GB".to_string(),
            threads: 4,
            region: DEFAULT_REGION.to_string(),
            credentials: None,
            work_dir: std::env::temp_dir().join("s3tables-query-duckdb"),
        }
    }
}

impl DuckDbConfig {
    pub fn validate(&self) -> Result<(), TablesError> {
        self.common.validate()?;
        if !(1..=32).contains(&self.threads) {
            return Err(config_error(format!(
                "duckdb threads must be between 1 and 32, got {}",
                self.threads
            )));
        }
        if self.memory_limit.trim().is_empty() {
            return Err(config_error("duckdb memory_limit must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AthenaConfig {
    pub common: EngineCommon,
    pub region: String,
    pub workgroup: String,
    /// Overrides the per-account default result bucket.
    pub result_location: Option<String>,
    pub poll_interval: Duration,
}

impl Default for AthenaConfig {
    fn default() -> Self {
        Self {
            common: EngineCommon::default(),
            region: DEFAULT_REGION.to_string(),
            workgroup: "primary".to_string(),
            result_location: None,
            poll_interval: Duration::from_millis(1000),
        }
    }
}

impl AthenaConfig {
    pub fn validate(&self) -> Result<(), TablesError> {
        self.common.validate()?;
        if self.workgroup.trim().is_empty() {
            return Err(config_error("athena workgroup must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SparkConfig {
    pub common: EngineCommon,
    pub region: String,
    pub application_id: String,
    pub execution_role_arn: Option<String>,
    pub executor_memory: String,
    pub executor_cores: u32,
    pub driver_memory: String,
    pub log_group: String,
    /// Overrides the per-account default script bucket.
    pub script_bucket: Option<String>,
    pub poll_interval: Duration,
}

impl SparkConfig {
    pub fn new(application_id: impl Into<String>) -> Self {
        Self {
            common: EngineCommon::default(),
            region: DEFAULT_REGION.to_string(),
            application_id: application_id.into(),
            execution_role_arn: None,
            executor_memory: "4g".to_string(),
            executor_cores: 2,
            driver_memory: "2g".to_string(),
            log_group: "/aws/emr-serverless/s3tables-query".to_string(),
            script_bucket: None,
            poll_interval: Duration::from_millis(10_000),
        }
    }

    pub fn validate(&self) -> Result<(), TablesError> {
        self.common.validate()?;
        if self.application_id.trim().is_empty() {
            return Err(config_error("spark application_id must not be empty"));
        }
        if !(1..=8).contains(&self.executor_cores) {
            return Err(config_error(format!(
                "spark executor_cores must be between 1 and 8, got {}",
                self.executor_cores
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct IcebergConfig {
    pub common: EngineCommon,
    pub warehouse: String,
    pub uri: String,
    pub region: String,
    pub namespace: String,
    pub catalog_name: String,
    pub signing_name: String,
    pub sigv4_enabled: bool,
}

impl IcebergConfig {
    pub fn new(
        warehouse: impl Into<String>,
        uri: impl Into<String>,
        region: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            common: EngineCommon::default(),
            warehouse: warehouse.into(),
            uri: uri.into(),
            region: region.into(),
            namespace: namespace.into(),
            catalog_name: "s3tablescatalog".to_string(),
            signing_name: "s3tables".to_string(),
            sigv4_enabled: true,
        }
    }

    pub fn validate(&self) -> Result<(), TablesError> {
        self.common.validate()?;
        for (field, value) in [
            ("warehouse", &self.warehouse),
            ("uri", &self.uri),
            ("region", &self.region),
            ("catalog_name", &self.catalog_name),
        ] {
            if value.trim().is_empty() {
                return Err(config_error(format!("iceberg {} must not be empty", field)));
            }
        }
        Ok(())
    }
}

/// One configuration record per engine kind. Optional kinds are absent unless configured.
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    pub duckdb: DuckDbConfig,
    pub athena: AthenaConfig,
    pub spark: Option<SparkConfig>,
    pub iceberg: Option<IcebergConfig>,
}

/// Values taken from the command line. Everything else comes from env or file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub config_path: Option<PathBuf>,
    pub allow_write: bool,
    pub region: Option<String>,
    pub verbose: bool,
    pub show_secrets: bool,
}

// --- TOML config file structs ---

#[derive(Debug, Deserialize, Default)]
struct TomlConfig {
    #[serde(default)]
    defaults: TomlDefaults,
    #[serde(default)]
    engines: TomlEngines,
}

#[derive(Debug, Deserialize, Default)]
struct TomlDefaults {
    allow_write: Option<bool>,
    region: Option<String>,
    row_limit: Option<usize>,
    verbose: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlEngines {
    #[serde(default)]
    duckdb: TomlDuckDb,
    #[serde(default)]
    athena: TomlAthena,
    #[serde(default)]
    spark: TomlSpark,
    iceberg: Option<TomlIceberg>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlCommon {
    timeout_seconds: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlDuckDb {
    #[serde(flatten)]
    common: TomlCommon,
    memory_limit: Option<String>,
    threads: Option<u32>,
    work_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlAthena {
    #[serde(flatten)]
    common: TomlCommon,
    workgroup: Option<String>,
    result_location: Option<String>,
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlSpark {
    #[serde(flatten)]
    common: TomlCommon,
    application_id: Option<String>,
    execution_role_arn: Option<String>,
    executor_memory: Option<String>,
    executor_cores: Option<u32>,
    driver_memory: Option<String>,
    log_group: Option<String>,
    script_bucket: Option<String>,
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlIceberg {
    #[serde(flatten)]
    common: TomlCommon,
    warehouse: Option<String>,
    uri: Option<String>,
    region: Option<String>,
    namespace: Option<String>,
    catalog_name: Option<String>,
    signing_name: Option<String>,
    sigv4_enabled: Option<bool>,
}

impl TomlCommon {
    fn resolve(&self) -> EngineCommon {
        let defaults = EngineCommon::default();
        EngineCommon {
            timeout_seconds: self.timeout_seconds.unwrap_or(defaults.timeout_seconds),
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
        }
    }
}

/// Config path resolution result; distinguishes explicit vs auto-resolved paths.
struct ResolvedConfigPath {
    path: PathBuf,
    /// true if given via --config or S3TQ_CONFIG
    explicit: bool,
}

/// Resolve the config file path: --config flag > env var > platform default.
fn resolve_config_path(cli_config: Option<&PathBuf>) -> Option<ResolvedConfigPath> {
    if let Some(path) = cli_config {
        return Some(ResolvedConfigPath {
            path: path.clone(),
            explicit: true,
        });
    }
    if let Ok(path) = std::env::var("S3TQ_CONFIG") {
        return Some(ResolvedConfigPath {
            path: PathBuf::from(path),
            explicit: true,
        });
    }
    ProjectDirs::from("", "", "s3tables-query").map(|dirs| ResolvedConfigPath {
        path: dirs.config_dir().join("config.toml"),
        explicit: false,
    })
}

/// Load and parse the TOML config file (if it exists).
fn load_toml_config(resolved: Option<&ResolvedConfigPath>) -> Result<TomlConfig, TablesError> {
    let resolved = match resolved {
        Some(r) => r,
        None => return Ok(TomlConfig::default()),
    };

    if !resolved.path.exists() {
        if resolved.explicit {
            return Err(config_error(format!(
                "config file not found: {}",
                resolved.path.display()
            )));
        }
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(&resolved.path).map_err(|e| {
        config_error(format!(
            "cannot read config file {}: {}",
            resolved.path.display(),
            e
        ))
    })?;

    toml::from_str(&content).map_err(|e| {
        config_error(format!(
            "invalid config file {}: {}",
            resolved.path.display(),
            e
        ))
    })
}

/// Non-empty value of an environment variable.
fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_flag(key: &str) -> Option<bool> {
    env_value(key).map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

/// Explicit S3 credentials from the standard AWS environment variables, if both halves are set.
fn resolve_s3_credentials() -> Option<S3Credentials> {
    let access_key_id = env_value("AWS_ACCESS_KEY_ID")?;
    let secret_access_key = env_value("AWS_SECRET_ACCESS_KEY").map(SecretString::from)?;
    Some(S3Credentials {
        access_key_id,
        secret_access_key,
        session_token: env_value("AWS_SESSION_TOKEN").map(SecretString::from),
    })
}

/// Build the application config: CLI > env > TOML > defaults.
pub fn load(overrides: &Overrides) -> Result<AppConfig, TablesError> {
    let resolved_path = resolve_config_path(overrides.config_path.as_ref());
    let toml_config = load_toml_config(resolved_path.as_ref())?;
    let defaults = &toml_config.defaults;

    let allow_write = overrides.allow_write
        || env_flag("S3TQ_ALLOW_WRITE")
            .unwrap_or_else(|| defaults.allow_write.unwrap_or(false));

    let region = overrides
        .region
        .clone()
        .or_else(|| env_value("AWS_REGION"))
        .or_else(|| defaults.region.clone());
    let client_region = region.clone().unwrap_or_else(|| DEFAULT_REGION.to_string());

    let verbose = overrides.verbose || defaults.verbose.unwrap_or(false);

    let engines = build_engine_settings(&toml_config.engines, &client_region)?;

    Ok(AppConfig {
        allow_write,
        region,
        default_row_limit: defaults.row_limit,
        verbose,
        show_secrets: overrides.show_secrets,
        engines,
    })
}

fn build_engine_settings(
    engines: &TomlEngines,
    region: &str,
) -> Result<EngineSettings, TablesError> {
    let duck_defaults = DuckDbConfig::default();
    let duckdb = DuckDbConfig {
        common: engines.duckdb.common.resolve(),
        memory_limit: engines
            .duckdb
            .memory_limit
            .clone()
            .unwrap_or(duck_defaults.memory_limit),
        threads: engines.duckdb.threads.unwrap_or(duck_defaults.threads),
        region: region.to_string(),
        credentials: resolve_s3_credentials(),
        work_dir: engines
            .duckdb
            .work_dir
            .clone()
            .unwrap_or(duck_defaults.work_dir),
    };

    let athena_defaults = AthenaConfig::default();
    let athena = AthenaConfig {
        common: engines.athena.common.resolve(),
        region: region.to_string(),
        workgroup: env_value("S3TQ_ATHENA_WORKGROUP")
            .or_else(|| engines.athena.workgroup.clone())
            .unwrap_or(athena_defaults.workgroup),
        result_location: env_value("S3TQ_ATHENA_RESULT_LOCATION")
            .or_else(|| engines.athena.result_location.clone()),
        poll_interval: engines
            .athena
            .poll_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(athena_defaults.poll_interval),
    };

    // Spark is only registered when an application id is known.
    let spark = env_value("EMR_SERVERLESS_APPLICATION_ID")
        .or_else(|| engines.spark.application_id.clone())
        .map(|application_id| {
            let toml = &engines.spark;
            let base = SparkConfig::new(application_id);
            SparkConfig {
                common: toml.common.resolve(),
                region: region.to_string(),
                execution_role_arn: env_value("EMR_SERVERLESS_JOB_ROLE_ARN")
                    .or_else(|| toml.execution_role_arn.clone()),
                executor_memory: toml.executor_memory.clone().unwrap_or(base.executor_memory),
                executor_cores: toml.executor_cores.unwrap_or(base.executor_cores),
                driver_memory: toml.driver_memory.clone().unwrap_or(base.driver_memory),
                log_group: toml.log_group.clone().unwrap_or(base.log_group),
                script_bucket: toml.script_bucket.clone(),
                poll_interval: toml
                    .poll_interval_ms
                    .map(Duration::from_millis)
                    .unwrap_or(base.poll_interval),
                application_id: base.application_id,
            }
        });

    let iceberg = engines
        .iceberg
        .as_ref()
        .map(|toml| -> Result<IcebergConfig, TablesError> {
            let warehouse = toml.warehouse.clone().ok_or_else(|| {
                config_error("[engines.iceberg] requires a warehouse (table bucket ARN)")
            })?;
            let iceberg_region = toml.region.clone().unwrap_or_else(|| region.to_string());
            let uri = toml
                .uri
                .clone()
                .unwrap_or_else(|| format!("https://s3tables.{}.amazonaws.com/iceberg", iceberg_region));
            let mut config = IcebergConfig::new(
                warehouse,
                uri,
                iceberg_region,
                toml.namespace.clone().unwrap_or_else(|| "default".to_string()),
            );
            config.common = toml.common.resolve();
            if let Some(name) = &toml.catalog_name {
                config.catalog_name = name.clone();
            }
            if let Some(name) = &toml.signing_name {
                config.signing_name = name.clone();
            }
            if let Some(enabled) = toml.sigv4_enabled {
                config.sigv4_enabled = enabled;
            }
            Ok(config)
        })
        .transpose()?;

    Ok(EngineSettings {
        duckdb,
        athena,
        spark,
        iceberg,
    })
}

fn config_error(message: impl Into<String>) -> TablesError {
    TablesError::Config {
        message: message.into(),
    }
}
