use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::state::InMemoryState;
use governor::state::direct::NotKeyed;
use governor::{Quota, RateLimiter};
use thiserror::Error;

use crate::index::IndexError;
use crate::pipeline::layout::OutputLayout;
use crate::pipeline::marker::MarkerError;
use crate::services::object_store::{ObjectStore, ObjectStoreError};
use crate::services::textract::JobServiceError;

pub type GenericRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Direct limiter allowing `per_second` calls; `None` when zero.
pub fn build_limiter(per_second: u32) -> Option<Arc<GenericRateLimiter>> {
    let quota = Quota::per_second(NonZeroU32::new(per_second)?);
    Some(Arc::new(RateLimiter::direct(quota)))
}

/// Everything a command needs to reconcile one bucket.
#[derive(Clone)]
pub struct ReconcileContext {
    pub store: Arc<dyn ObjectStore>,
    pub bucket: String,
    pub layout: OutputLayout,
}

impl ReconcileContext {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>, layout: OutputLayout) -> Self {
        let bucket = bucket.into();
        debug_assert!(!bucket.is_empty());
        Self {
            store,
            bucket,
            layout,
        }
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Message(String),
    #[error("Key could not be found in bucket: {key}")]
    KeyNotFound { key: String },
    #[error(
        "rate limited while submitting {key} after {attempts} attempt(s); {submitted} document(s) submitted before aborting"
    )]
    RateLimitExhausted {
        key: String,
        attempts: u32,
        submitted: usize,
    },
    #[error(transparent)]
    Store(#[from] ObjectStoreError),
    #[error(transparent)]
    JobService(#[from] JobServiceError),
    #[error(transparent)]
    Marker(#[from] MarkerError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ServiceError {
    pub fn message(msg: impl Into<String>) -> Self {
        ServiceError::Message(msg.into())
    }
}
