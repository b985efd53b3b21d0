use s3tables_query::config::{self, DEFAULT_REGION, Overrides};
use secrecy::ExposeSecret;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

// --- Env var test infrastructure ---

/// Static mutex to serialize tests that touch process env vars.
static ENV_MUTEX: Mutex<()> = Mutex::new(());

/// Every variable the loader reads.
const MANAGED_VARS: &[&str] = &[
    "S3TQ_CONFIG",
    "S3TQ_ALLOW_WRITE",
    "S3TQ_ATHENA_WORKGROUP",
    "S3TQ_ATHENA_RESULT_LOCATION",
    "AWS_REGION",
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_SESSION_TOKEN",
    "EMR_SERVERLESS_APPLICATION_ID",
    "EMR_SERVERLESS_JOB_ROLE_ARN",
];

/// RAII guard: clears the managed env vars, sets the given ones, and
/// clears them all again on Drop. Holds ENV_MUTEX for its lifetime.
struct EnvGuard {
    _lock: std::sync::MutexGuard<'static, ()>,
}

impl EnvGuard {
    fn new(vars: &[(&str, &str)]) -> Self {
        let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_managed();
        for (key, val) in vars {
            // SAFETY: env var access is serialized by ENV_MUTEX
            unsafe {
                std::env::set_var(key, val);
            }
        }
        EnvGuard { _lock: lock }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        clear_managed();
    }
}

fn clear_managed() {
    for key in MANAGED_VARS {
        // SAFETY: env var access is serialized by ENV_MUTEX
        unsafe {
            std::env::remove_var(key);
        }
    }
}

/// A config file holding `content`; kept alive by the returned handle.
fn config_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

fn overrides_for(file: &tempfile::NamedTempFile) -> Overrides {
    Overrides {
        config_path: Some(file.path().to_path_buf()),
        ..Overrides::default()
    }
}

// --- defaults ---

#[test]
fn test_empty_file_gives_defaults() {
    let _env = EnvGuard::new(&[]);
    let file = config_file("");

    let config = config::load(&overrides_for(&file)).unwrap();

    assert!(!config.allow_write);
    assert_eq!(config.region, None);
    assert_eq!(config.client_region(), DEFAULT_REGION);
    assert_eq!(config.default_row_limit, None);
    assert_eq!(config.engines.duckdb.memory_limit, "2GB");
    assert_eq!(config.engines.duckdb.threads, 4);
    assert!(config.engines.duckdb.credentials.is_none());
    assert_eq!(config.engines.athena.workgroup, "primary");
    assert_eq!(config.engines.athena.poll_interval, Duration::from_millis(1000));
    assert_eq!(config.engines.athena.common.timeout_seconds, 300);
    assert_eq!(config.engines.athena.common.max_retries, 3);
    assert!(config.engines.spark.is_none());
    assert!(config.engines.iceberg.is_none());
}

#[test]
fn test_missing_explicit_config_is_an_error() {
    let _env = EnvGuard::new(&[]);
    let overrides = Overrides {
        config_path: Some(PathBuf::from("/nonexistent/s3tables-query.toml")),
        ..Overrides::default()
    };

    let err = config::load(&overrides).unwrap_err();

    assert_eq!(err.kind(), "config");
    assert!(err.to_string().contains("config file not found"));
}

#[test]
fn test_config_path_from_env() {
    let file = config_file("[defaults]\nrow_limit = 25\n");
    let path = file.path().display().to_string();
    let _env = EnvGuard::new(&[("S3TQ_CONFIG", &path)]);

    let config = config::load(&Overrides::default()).unwrap();

    assert_eq!(config.default_row_limit, Some(25));
}

#[test]
fn test_invalid_toml_is_an_error() {
    let _env = EnvGuard::new(&[]);
    let file = config_file("[defaults\nregion = ");

    let err = config::load(&overrides_for(&file)).unwrap_err();

    assert!(err.to_string().starts_with("config: invalid config file"));
}

// --- precedence ---

#[test]
fn test_region_precedence_flag_env_file() {
    let file = config_file("[defaults]\nregion = \"eu-west-1\"\n");

    {
        let _env = EnvGuard::new(&[]);
        let config = config::load(&overrides_for(&file)).unwrap();
        assert_eq!(config.region.as_deref(), Some("eu-west-1"));
    }
    {
        let _env = EnvGuard::new(&[("AWS_REGION", "us-west-2")]);
        let config = config::load(&overrides_for(&file)).unwrap();
        assert_eq!(config.region.as_deref(), Some("us-west-2"));
        assert_eq!(config.engines.athena.region, "us-west-2");
    }
    {
        let _env = EnvGuard::new(&[("AWS_REGION", "us-west-2")]);
        let overrides = Overrides {
            region: Some("ap-south-1".to_string()),
            ..overrides_for(&file)
        };
        let config = config::load(&overrides).unwrap();
        assert_eq!(config.client_region(), "ap-south-1");
        assert_eq!(config.engines.duckdb.region, "ap-south-1");
    }
}

#[test]
fn test_allow_write_sources() {
    let enabled = config_file("[defaults]\nallow_write = true\n");
    let disabled = config_file("");

    {
        let _env = EnvGuard::new(&[]);
        assert!(config::load(&overrides_for(&enabled)).unwrap().allow_write);
        assert!(!config::load(&overrides_for(&disabled)).unwrap().allow_write);
    }
    {
        let _env = EnvGuard::new(&[("S3TQ_ALLOW_WRITE", "true")]);
        assert!(config::load(&overrides_for(&disabled)).unwrap().allow_write);
    }
    {
        let _env = EnvGuard::new(&[("S3TQ_ALLOW_WRITE", "false")]);
        assert!(!config::load(&overrides_for(&enabled)).unwrap().allow_write);
    }
    {
        let _env = EnvGuard::new(&[("S3TQ_ALLOW_WRITE", "false")]);
        let overrides = Overrides {
            allow_write: true,
            ..overrides_for(&disabled)
        };
        assert!(config::load(&overrides).unwrap().allow_write);
    }
}

// --- engine sections ---

#[test]
fn test_engine_sections_from_file() {
    let _env = EnvGuard::new(&[]);
    let file = config_file(
        r#"
[engines.duckdb]
memory_limit = "8GB"
threads = 16
timeout_seconds = 60

[engines.athena]
workgroup = "analysts"
result_location = "s3://results/"
poll_interval_ms = 250
max_retries = 5

[engines.spark]
application_id = "00fabc"
execution_role_arn = "arn:aws:iam::111122223333:role/job"
executor_cores = 4
"#,
    );

    let engines = config::load(&overrides_for(&file)).unwrap().engines;

    assert_eq!(engines.duckdb.memory_limit, "8GB");
    assert_eq!(engines.duckdb.threads, 16);
    assert_eq!(engines.duckdb.common.timeout_seconds, 60);
    assert_eq!(engines.athena.workgroup, "analysts");
    assert_eq!(engines.athena.result_location.as_deref(), Some("s3://results/"));
    assert_eq!(engines.athena.poll_interval, Duration::from_millis(250));
    assert_eq!(engines.athena.common.max_retries, 5);

    let spark = engines.spark.unwrap();
    assert_eq!(spark.application_id, "00fabc");
    assert_eq!(spark.execution_role_arn.as_deref(), Some("arn:aws:iam::111122223333:role/job"));
    assert_eq!(spark.executor_cores, 4);
    assert_eq!(spark.executor_memory, "4g");
    assert_eq!(spark.log_group, "/aws/emr-serverless/s3tables-query");
}

#[test]
fn test_engine_env_overrides() {
    let _env = EnvGuard::new(&[
        ("S3TQ_ATHENA_WORKGROUP", "etl"),
        ("S3TQ_ATHENA_RESULT_LOCATION", "s3://env-results/"),
        ("EMR_SERVERLESS_APPLICATION_ID", "app-env"),
        ("EMR_SERVERLESS_JOB_ROLE_ARN", "arn:aws:iam::1:role/env"),
    ]);
    let file = config_file("[engines.athena]\nworkgroup = \"file\"\n");

    let engines = config::load(&overrides_for(&file)).unwrap().engines;

    assert_eq!(engines.athena.workgroup, "etl");
    assert_eq!(engines.athena.result_location.as_deref(), Some("s3://env-results/"));
    let spark = engines.spark.unwrap();
    assert_eq!(spark.application_id, "app-env");
    assert_eq!(spark.execution_role_arn.as_deref(), Some("arn:aws:iam::1:role/env"));
}

#[test]
fn test_iceberg_section_fills_defaults() {
    let _env = EnvGuard::new(&[("AWS_REGION", "us-west-2")]);
    let file = config_file(
        "[engines.iceberg]\nwarehouse = \"arn:aws:s3tables:us-west-2:111122223333:bucket/lake\"\n",
    );

    let iceberg = config::load(&overrides_for(&file))
        .unwrap()
        .engines
        .iceberg
        .unwrap();

    assert_eq!(iceberg.uri, "https://s3tables.us-west-2.amazonaws.com/iceberg");
    assert_eq!(iceberg.region, "us-west-2");
    assert_eq!(iceberg.namespace, "default");
    assert_eq!(iceberg.catalog_name, "s3tablescatalog");
    assert_eq!(iceberg.signing_name, "s3tables");
    assert!(iceberg.sigv4_enabled);
}

#[test]
fn test_iceberg_section_requires_warehouse() {
    let _env = EnvGuard::new(&[]);
    let file = config_file("[engines.iceberg]\nnamespace = \"sales\"\n");

    let err = config::load(&overrides_for(&file)).unwrap_err();

    assert!(err.to_string().contains("requires a warehouse"));
}

#[test]
fn test_s3_credentials_from_env_are_secret() {
    let _env = EnvGuard::new(&[
        ("AWS_ACCESS_KEY_ID", "AKIAEXAMPLE"),
        ("AWS_SECRET_ACCESS_KEY", "wJalrXUtnFEMI"),
    ]);
    let file = config_file("");

    let config = config::load(&overrides_for(&file)).unwrap();

    let credentials = config.engines.duckdb.credentials.unwrap();
    assert_eq!(credentials.access_key_id, "AKIAEXAMPLE");
    assert_eq!(credentials.secret_access_key.expose_secret(), "wJalrXUtnFEMI");
    assert!(credentials.session_token.is_none());
    assert!(!format!("{:?}", credentials).contains("wJalrXUtnFEMI"));
}

#[test]
fn test_access_key_without_secret_uses_chain() {
    let _env = EnvGuard::new(&[("AWS_ACCESS_KEY_ID", "AKIAEXAMPLE")]);
    let file = config_file("");

    let config = config::load(&overrides_for(&file)).unwrap();

    assert!(config.engines.duckdb.credentials.is_none());
}
