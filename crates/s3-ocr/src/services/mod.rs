//! Orchestration layer for IO-bound reconciliation passes.
//!
//! Modules exposed here talk to the object store, the OCR job service and the
//! local index. Decisions about what to submit, dedupe or index live in
//! `crate::pipeline` so every pass can be tested without a network.

pub mod aws;
pub mod context;
pub mod dedupe;
pub mod indexer;
pub mod memory_store;
pub mod object_store;
pub mod results;
pub mod submitter;
pub mod textract;

pub use aws::{AwsConnection, load_sdk_config};
pub use context::{
    GenericRateLimiter, ReconcileContext, ServiceError, ServiceResult, build_limiter,
};
pub use dedupe::{DedupeReport, dedupe_markers};
pub use indexer::{IndexReport, build_index};
pub use memory_store::MemoryObjectStore;
pub use object_store::{
    ListPage, ObjectStore, ObjectStoreError, S3ObjectStore, StoredObject, fetch_marker,
    fetch_markers, list_all, load_listing, write_marker,
};
pub use results::{
    combined_for_document, download_parts, fetch_combined, list_output_parts, resolve_job_id,
};
pub use submitter::{SubmitEvent, SubmitOptions, SubmitReport, submit_pending};
pub use textract::{
    JobServiceError, ScriptedResponse, ScriptedTextract, TextDetectionClient,
    TextDetectionRequest, TextractClient, describe_job,
};
