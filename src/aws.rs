//! AWS SDK implementations of the client capability traits.

use crate::clients::{
    BatchJobService, ClientFactory, JobRunInfo, JobSubmission, ObjectStore, QueryExecutionInfo,
    QueryService, QuerySubmission, ResultPage, TableCatalog, TableSummary,
};
use crate::config::DEFAULT_REGION;
use crate::engine::poll::RunState;
use crate::error::TablesError;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_athena::types::{
    QueryExecutionContext, ResultConfiguration, ResultConfigurationUpdates,
    WorkGroupConfigurationUpdates,
};
use aws_sdk_emrserverless::types::{
    CloudWatchLoggingConfiguration, ConfigurationOverrides, JobDriver, MonitoringConfiguration,
    SparkSubmit,
};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use serde_json::{Map, Value};
use std::error::Error as StdError;
use std::sync::Arc;
use tracing::{debug, info};

fn sdk_error<E: StdError>(action: &str, err: E) -> TablesError {
    TablesError::connection(format!("{} failed: {}", action, DisplayErrorContext(&err)))
}

/// Region-scoped SDK clients sharing one credential chain.
#[derive(Clone)]
pub struct AwsClientFactory {
    sdk: SdkConfig,
}

impl AwsClientFactory {
    /// Load the default credential chain. `region` is only the fallback for
    /// clients created without an explicit region.
    pub async fn load(region: Option<&str>) -> Self {
        let region = region.unwrap_or(DEFAULT_REGION).to_string();
        let sdk = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region))
            .load()
            .await;
        Self { sdk }
    }

    pub fn from_sdk_config(sdk: SdkConfig) -> Self {
        Self { sdk }
    }
}

impl ClientFactory for AwsClientFactory {
    fn table_catalog(&self, region: &str) -> Arc<dyn TableCatalog> {
        let conf = aws_sdk_s3tables::config::Builder::from(&self.sdk)
            .region(Region::new(region.to_string()))
            .build();
        Arc::new(S3TablesCatalog {
            client: aws_sdk_s3tables::Client::from_conf(conf),
        })
    }

    fn object_store(&self, region: &str) -> Arc<dyn ObjectStore> {
        let conf = aws_sdk_s3::config::Builder::from(&self.sdk)
            .region(Region::new(region.to_string()))
            .build();
        Arc::new(S3ObjectStore {
            client: aws_sdk_s3::Client::from_conf(conf),
        })
    }

    fn query_service(&self, region: &str) -> Arc<dyn QueryService> {
        let conf = aws_sdk_athena::config::Builder::from(&self.sdk)
            .region(Region::new(region.to_string()))
            .build();
        Arc::new(AthenaService {
            client: aws_sdk_athena::Client::from_conf(conf),
        })
    }

    fn batch_service(&self, region: &str) -> Arc<dyn BatchJobService> {
        let conf = aws_sdk_emrserverless::config::Builder::from(&self.sdk)
            .region(Region::new(region.to_string()))
            .build();
        Arc::new(EmrServerlessService {
            client: aws_sdk_emrserverless::Client::from_conf(conf),
        })
    }
}

pub struct S3TablesCatalog {
    client: aws_sdk_s3tables::Client,
}

#[async_trait]
impl TableCatalog for S3TablesCatalog {
    async fn list_tables(&self, bucket_arn: &str) -> Result<Vec<TableSummary>, TablesError> {
        let mut tables = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self
                .client
                .list_tables()
                .table_bucket_arn(bucket_arn)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| sdk_error("ListTables", e))?;

            tables.extend(page.tables().iter().map(|t| TableSummary {
                name: t.name().to_string(),
                namespace: t.namespace().to_vec(),
                table_arn: t.table_arn().to_string(),
            }));

            match page.continuation_token() {
                Some(next) if !next.is_empty() => token = Some(next.to_string()),
                _ => break,
            }
        }
        debug!(bucket_arn, count = tables.len(), "listed tables");
        Ok(tables)
    }
}

pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn ensure_bucket(&self, bucket: &str, region: &str) -> Result<bool, TablesError> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => return Ok(false),
            Err(e) => {
                let missing = e.as_service_error().is_some_and(|se| se.is_not_found());
                if !missing {
                    return Err(sdk_error("HeadBucket", e));
                }
            }
        }

        let mut request = self.client.create_bucket().bucket(bucket);
        // us-east-1 rejects an explicit location constraint.
        if region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }
        match request.send().await {
            Ok(_) => {
                info!(bucket, region, "created bucket");
                Ok(true)
            }
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_bucket_already_owned_by_you()) =>
            {
                Ok(false)
            }
            Err(e) => Err(sdk_error("CreateBucket", e)),
        }
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), TablesError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| sdk_error("PutObject", e))?;
        Ok(())
    }
}

pub struct AthenaService {
    client: aws_sdk_athena::Client,
}

fn insert_str(map: &mut Map<String, Value>, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        map.insert(key.to_string(), Value::String(value.to_string()));
    }
}

#[async_trait]
impl QueryService for AthenaService {
    async fn start_query(&self, submission: &QuerySubmission) -> Result<String, TablesError> {
        let mut request = self
            .client
            .start_query_execution()
            .query_string(&submission.query)
            .set_work_group(submission.workgroup.clone())
            .set_client_request_token(submission.client_request_token.clone());

        if submission.catalog.is_some() || submission.database.is_some() {
            request = request.query_execution_context(
                QueryExecutionContext::builder()
                    .set_catalog(submission.catalog.clone())
                    .set_database(submission.database.clone())
                    .build(),
            );
        }
        if let Some(location) = &submission.output_location {
            request = request.result_configuration(
                ResultConfiguration::builder().output_location(location).build(),
            );
        }

        let output = request
            .send()
            .await
            .map_err(|e| sdk_error("StartQueryExecution", e))?;
        output
            .query_execution_id()
            .map(str::to_string)
            .ok_or_else(|| TablesError::execution("StartQueryExecution returned no execution id"))
    }

    async fn get_execution(
        &self,
        query_execution_id: &str,
    ) -> Result<QueryExecutionInfo, TablesError> {
        let output = self
            .client
            .get_query_execution()
            .query_execution_id(query_execution_id)
            .send()
            .await
            .map_err(|e| sdk_error("GetQueryExecution", e))?;
        let execution = output.query_execution().ok_or_else(|| {
            TablesError::execution(format!("no execution found for {}", query_execution_id))
        })?;

        let status = execution.status();
        let state_name = status
            .and_then(|s| s.state())
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|| "UNKNOWN".to_string());
        let athena_error = status.and_then(|s| s.athena_error());

        let mut details = Map::new();
        insert_str(&mut details, "QueryExecutionId", execution.query_execution_id());
        insert_str(&mut details, "Query", execution.query());
        insert_str(
            &mut details,
            "StatementType",
            execution.statement_type().map(|t| t.as_str()),
        );
        insert_str(&mut details, "SubstatementType", execution.substatement_type());
        insert_str(&mut details, "WorkGroup", execution.work_group());
        insert_str(
            &mut details,
            "OutputLocation",
            execution
                .result_configuration()
                .and_then(|r| r.output_location()),
        );
        if let Some(context) = execution.query_execution_context() {
            insert_str(&mut details, "Catalog", context.catalog());
            insert_str(&mut details, "Database", context.database());
        }
        insert_str(
            &mut details,
            "EngineVersion",
            execution
                .engine_version()
                .and_then(|v| v.effective_engine_version()),
        );
        insert_str(&mut details, "State", Some(&state_name));

        Ok(QueryExecutionInfo {
            query_execution_id: query_execution_id.to_string(),
            state: RunState::from_query_state(&state_name),
            state_change_reason: status
                .and_then(|s| s.state_change_reason())
                .map(str::to_string),
            error_category: athena_error.and_then(|e| e.error_category()),
            error_type: athena_error.and_then(|e| e.error_type()),
            retryable: athena_error.map(|e| e.retryable()),
            state_name,
            details,
        })
    }

    async fn get_results(
        &self,
        query_execution_id: &str,
        next_token: Option<&str>,
    ) -> Result<ResultPage, TablesError> {
        let output = self
            .client
            .get_query_results()
            .query_execution_id(query_execution_id)
            .set_next_token(next_token.map(str::to_string))
            .send()
            .await
            .map_err(|e| sdk_error("GetQueryResults", e))?;

        let rows = output
            .result_set()
            .map(|set| {
                set.rows()
                    .iter()
                    .map(|row| {
                        row.data()
                            .iter()
                            .map(|datum| datum.var_char_value().map(str::to_string))
                            .collect()
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(ResultPage {
            rows,
            next_token: output.next_token().map(str::to_string),
        })
    }

    async fn workgroup_output_location(
        &self,
        workgroup: &str,
    ) -> Result<Option<String>, TablesError> {
        let output = self
            .client
            .get_work_group()
            .work_group(workgroup)
            .send()
            .await
            .map_err(|e| sdk_error("GetWorkGroup", e))?;
        Ok(output
            .work_group()
            .and_then(|wg| wg.configuration())
            .and_then(|c| c.result_configuration())
            .and_then(|r| r.output_location())
            .map(str::to_string))
    }

    async fn set_workgroup_output_location(
        &self,
        workgroup: &str,
        location: &str,
    ) -> Result<(), TablesError> {
        self.client
            .update_work_group()
            .work_group(workgroup)
            .configuration_updates(
                WorkGroupConfigurationUpdates::builder()
                    .result_configuration_updates(
                        ResultConfigurationUpdates::builder()
                            .output_location(location)
                            .build(),
                    )
                    .build(),
            )
            .send()
            .await
            .map_err(|e| sdk_error("UpdateWorkGroup", e))?;
        Ok(())
    }

    async fn list_workgroups(&self) -> Result<Vec<String>, TablesError> {
        let output = self
            .client
            .list_work_groups()
            .max_results(1)
            .send()
            .await
            .map_err(|e| sdk_error("ListWorkGroups", e))?;
        Ok(output
            .work_groups()
            .iter()
            .filter_map(|wg| wg.name().map(str::to_string))
            .collect())
    }
}

pub struct EmrServerlessService {
    client: aws_sdk_emrserverless::Client,
}

#[async_trait]
impl BatchJobService for EmrServerlessService {
    async fn start_job_run(&self, job: &JobSubmission) -> Result<String, TablesError> {
        let spark_submit = SparkSubmit::builder()
            .entry_point(&job.entry_point)
            .spark_submit_parameters(&job.spark_submit_parameters)
            .build()
            .map_err(|e| TablesError::execution(format!("invalid job driver: {}", e)))?;
        let logging = CloudWatchLoggingConfiguration::builder()
            .enabled(true)
            .log_group_name(&job.log_group)
            .build()
            .map_err(|e| TablesError::execution(format!("invalid logging configuration: {}", e)))?;

        let output = self
            .client
            .start_job_run()
            .application_id(&job.application_id)
            .execution_role_arn(&job.execution_role_arn)
            .client_token(&job.client_token)
            .job_driver(JobDriver::SparkSubmit(spark_submit))
            .configuration_overrides(
                ConfigurationOverrides::builder()
                    .monitoring_configuration(
                        MonitoringConfiguration::builder()
                            .cloud_watch_logging_configuration(logging)
                            .build(),
                    )
                    .build(),
            )
            .send()
            .await
            .map_err(|e| sdk_error("StartJobRun", e))?;
        Ok(output.job_run_id().to_string())
    }

    async fn get_job_run(
        &self,
        application_id: &str,
        job_run_id: &str,
    ) -> Result<JobRunInfo, TablesError> {
        let output = self
            .client
            .get_job_run()
            .application_id(application_id)
            .job_run_id(job_run_id)
            .send()
            .await
            .map_err(|e| sdk_error("GetJobRun", e))?;
        let run = output
            .job_run()
            .ok_or_else(|| TablesError::execution(format!("no job run found for {}", job_run_id)))?;

        let state_name = run.state().as_str().to_string();
        let details = run.state_details();
        Ok(JobRunInfo {
            job_run_id: job_run_id.to_string(),
            state: RunState::from_job_state(&state_name),
            state_name,
            state_details: (!details.is_empty()).then(|| details.to_string()),
        })
    }

    async fn list_applications(&self) -> Result<Vec<String>, TablesError> {
        let output = self
            .client
            .list_applications()
            .max_results(1)
            .send()
            .await
            .map_err(|e| sdk_error("ListApplications", e))?;
        Ok(output
            .applications()
            .iter()
            .map(|app| app.id().to_string())
            .collect())
    }
}
