use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_textract::Client as TextractSdk;
use aws_sdk_textract::error::DisplayErrorContext;
use aws_sdk_textract::types::{DocumentLocation, OutputConfig, S3Object};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::services::context::GenericRateLimiter;

/// Errors returned by the OCR job service.
#[derive(Debug, Error)]
pub enum JobServiceError {
    #[error("rate limited: {message}")]
    RateLimited { message: String },

    #[error("Invalid job ID")]
    InvalidJobId { job_id: String },

    #[error("{op} failed: {message}")]
    Request { op: &'static str, message: String },
}

impl JobServiceError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, JobServiceError::RateLimited { .. })
    }

    fn request(op: &'static str, message: impl std::fmt::Display) -> Self {
        JobServiceError::Request {
            op,
            message: message.to_string(),
        }
    }
}

/// One asynchronous text-detection submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDetectionRequest {
    pub bucket: String,
    pub key: String,
    pub output_bucket: String,
    pub output_prefix: String,
}

#[async_trait]
pub trait TextDetectionClient: Send + Sync {
    /// Start a job; `Ok(None)` when the service accepted the call without
    /// returning a job id.
    async fn start_text_detection(
        &self,
        request: &TextDetectionRequest,
    ) -> Result<Option<String>, JobServiceError>;

    /// Job status without blocks, pagination token or response metadata.
    async fn job_status(&self, job_id: &str) -> Result<Value, JobServiceError>;
}

/// Textract-backed job client.
#[derive(Clone)]
pub struct TextractClient {
    client: TextractSdk,
    limiter: Option<Arc<GenericRateLimiter>>,
}

impl TextractClient {
    pub fn new(client: TextractSdk, limiter: Option<Arc<GenericRateLimiter>>) -> Self {
        Self { client, limiter }
    }

    pub fn from_sdk_config(
        sdk_config: &aws_config::SdkConfig,
        limiter: Option<Arc<GenericRateLimiter>>,
    ) -> Self {
        Self::new(TextractSdk::new(sdk_config), limiter)
    }
}

#[async_trait]
impl TextDetectionClient for TextractClient {
    async fn start_text_detection(
        &self,
        request: &TextDetectionRequest,
    ) -> Result<Option<String>, JobServiceError> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let location = DocumentLocation::builder()
            .s3_object(
                S3Object::builder()
                    .bucket(&request.bucket)
                    .name(&request.key)
                    .build(),
            )
            .build();
        let output_config = OutputConfig::builder()
            .s3_bucket(&request.output_bucket)
            .s3_prefix(&request.output_prefix)
            .build()
            .map_err(|err| JobServiceError::request("build output config", err))?;

        let output = self
            .client
            .start_document_text_detection()
            .document_location(location)
            .output_config(output_config)
            .send()
            .await
            .map_err(|err| {
                let throttled = err.as_service_error().is_some_and(|service| {
                    service.is_provisioned_throughput_exceeded_exception()
                        || service.is_limit_exceeded_exception()
                        || service.is_throttling_exception()
                });
                if throttled {
                    JobServiceError::RateLimited {
                        message: DisplayErrorContext(&err).to_string(),
                    }
                } else {
                    JobServiceError::request("StartDocumentTextDetection", DisplayErrorContext(&err))
                }
            })?;

        Ok(output.job_id().map(str::to_string))
    }

    async fn job_status(&self, job_id: &str) -> Result<Value, JobServiceError> {
        let output = self
            .client
            .get_document_text_detection()
            .job_id(job_id)
            .send()
            .await
            .map_err(|err| {
                if err
                    .as_service_error()
                    .is_some_and(|service| service.is_invalid_job_id_exception())
                {
                    JobServiceError::InvalidJobId {
                        job_id: job_id.to_string(),
                    }
                } else {
                    JobServiceError::request("GetDocumentTextDetection", DisplayErrorContext(&err))
                }
            })?;

        let mut status = Map::new();
        if let Some(metadata) = output.document_metadata() {
            status.insert(
                "DocumentMetadata".into(),
                json!({ "Pages": metadata.pages() }),
            );
        }
        if let Some(job_status) = output.job_status() {
            status.insert("JobStatus".into(), json!(job_status.as_str()));
        }
        if let Some(message) = output.status_message() {
            status.insert("StatusMessage".into(), json!(message));
        }
        if !output.warnings().is_empty() {
            let warnings: Vec<Value> = output
                .warnings()
                .iter()
                .map(|warning| json!({ "ErrorCode": warning.error_code(), "Pages": warning.pages() }))
                .collect();
            status.insert("Warnings".into(), Value::Array(warnings));
        }
        if let Some(version) = output.detect_document_text_model_version() {
            status.insert("DetectDocumentTextModelVersion".into(), json!(version));
        }
        Ok(Value::Object(status))
    }
}

/// Pretty-printed job status as shown by `inspect-job`.
pub async fn describe_job(
    client: &dyn TextDetectionClient,
    job_id: &str,
) -> Result<String, crate::services::ServiceError> {
    let status = client.job_status(job_id).await?;
    Ok(serde_json::to_string_pretty(&status)?)
}

/// Canned reply for [`ScriptedTextract`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedResponse {
    JobId(String),
    NoJobId,
    RateLimited,
    Failure(String),
}

/// In-process job client replaying scripted submission outcomes.
///
/// Once the script is exhausted every submission succeeds with
/// `job-<n>`, `n` counting submissions from 1.
#[derive(Debug, Default)]
pub struct ScriptedTextract {
    script: Mutex<VecDeque<ScriptedResponse>>,
    requests: Mutex<Vec<TextDetectionRequest>>,
    statuses: Mutex<BTreeMap<String, Value>>,
}

impl ScriptedTextract {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, response: ScriptedResponse) {
        self.script.lock().await.push_back(response);
    }

    pub async fn set_status(&self, job_id: impl Into<String>, status: Value) {
        self.statuses.lock().await.insert(job_id.into(), status);
    }

    /// Every submission attempt seen so far, retries included.
    pub async fn requests(&self) -> Vec<TextDetectionRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl TextDetectionClient for ScriptedTextract {
    async fn start_text_detection(
        &self,
        request: &TextDetectionRequest,
    ) -> Result<Option<String>, JobServiceError> {
        let attempt = {
            let mut requests = self.requests.lock().await;
            requests.push(request.clone());
            requests.len()
        };
        match self.script.lock().await.pop_front() {
            None => Ok(Some(format!("job-{attempt}"))),
            Some(ScriptedResponse::JobId(job_id)) => Ok(Some(job_id)),
            Some(ScriptedResponse::NoJobId) => Ok(None),
            Some(ScriptedResponse::RateLimited) => Err(JobServiceError::RateLimited {
                message: "ProvisionedThroughputExceededException".into(),
            }),
            Some(ScriptedResponse::Failure(message)) => {
                Err(JobServiceError::request("StartDocumentTextDetection", message))
            }
        }
    }

    async fn job_status(&self, job_id: &str) -> Result<Value, JobServiceError> {
        self.statuses
            .lock()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| JobServiceError::InvalidJobId {
                job_id: job_id.to_string(),
            })
    }
}
