use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::MARKER_SUFFIX;

/// Body of a `<document>.s3-ocr.json` side-car object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMarker {
    pub job_id: String,
    /// ETag of the source document when the job was submitted.
    pub etag: String,
}

/// A marker after it has been read back from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerRecord {
    /// Document key the marker belongs to (marker key without the suffix).
    pub key: String,
    pub job_id: String,
    pub etag: String,
    /// ETag of the marker object itself.
    pub s3_ocr_etag: String,
}

impl MarkerRecord {
    pub fn marker(&self) -> JobMarker {
        JobMarker {
            job_id: self.job_id.clone(),
            etag: self.etag.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum MarkerError {
    #[error("`{key}` is not a marker key")]
    NotAMarker { key: String },
    #[error("malformed marker `{key}`: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("marker `{key}` has an empty job_id")]
    EmptyJobId { key: String },
}

pub fn is_marker_key(key: &str) -> bool {
    key.ends_with(MARKER_SUFFIX)
}

pub fn marker_key(document_key: &str) -> String {
    format!("{document_key}{MARKER_SUFFIX}")
}

/// Strip the marker suffix, returning the owning document key.
pub fn strip_marker_suffix(key: &str) -> Option<&str> {
    key.strip_suffix(MARKER_SUFFIX)
}

impl JobMarker {
    pub fn new(job_id: impl Into<String>, etag: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            etag: etag.into(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(marker_key: &str, bytes: &[u8]) -> Result<Self, MarkerError> {
        let marker: JobMarker =
            serde_json::from_slice(bytes).map_err(|source| MarkerError::Malformed {
                key: marker_key.to_string(),
                source,
            })?;
        if marker.job_id.trim().is_empty() {
            return Err(MarkerError::EmptyJobId {
                key: marker_key.to_string(),
            });
        }
        Ok(marker)
    }

    /// Attach store metadata to a decoded marker.
    pub fn into_record(
        self,
        marker_key: &str,
        marker_etag: impl Into<String>,
    ) -> Result<MarkerRecord, MarkerError> {
        let key = strip_marker_suffix(marker_key).ok_or_else(|| MarkerError::NotAMarker {
            key: marker_key.to_string(),
        })?;
        Ok(MarkerRecord {
            key: key.to_string(),
            job_id: self.job_id,
            etag: self.etag,
            s3_ocr_etag: marker_etag.into(),
        })
    }
}
