use std::collections::HashSet;
use std::fmt::Display;
use std::path::Path;

use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream as S3Body;
use bytes::Bytes;
use indicatif::ProgressBar;
use thiserror::Error;
use tokio::fs;

use crate::pipeline::listing::{Listing, ListingScope, ObjectRecord};
use crate::pipeline::marker::{JobMarker, MarkerRecord, marker_key};

// Object storage abstractions.
//
// The reconciliation engine only needs flat key listings with prefix queries,
// whole-object reads and writes. Listings are paged by the backend and drained
// by `list_all`.

/// One page of a prefix listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub objects: Vec<ObjectRecord>,
    /// Continuation token for the next page, `None` on the last page.
    pub next_token: Option<String>,
}

/// Body and fingerprint of a fetched object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Bytes,
    pub etag: String,
}

/// Errors emitted by object storage operations.
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object `{key}` not found in bucket `{bucket}`")]
    NotFound { bucket: String, key: String },

    #[error("{op} failed for bucket `{bucket}`: {message}")]
    Request {
        op: &'static str,
        bucket: String,
        message: String,
    },

    #[error("listing of bucket `{bucket}` repeated continuation token `{token}`")]
    PaginationLoop { bucket: String, token: String },

    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ObjectStoreError {
    pub fn request(op: &'static str, bucket: &str, message: impl Display) -> Self {
        ObjectStoreError::Request {
            op,
            bucket: bucket.to_string(),
            message: message.to_string(),
        }
    }

    pub fn not_found(bucket: &str, key: &str) -> Self {
        ObjectStoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }
}

/// Trait abstracting over object storage backends.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Return one listing page for `prefix` (whole bucket when `None`),
    /// ordered by key.
    async fn list_page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        continuation: Option<String>,
    ) -> Result<ListPage, ObjectStoreError>;

    /// Fetch a whole object or `ObjectStoreError::NotFound`.
    async fn get(&self, bucket: &str, key: &str) -> Result<StoredObject, ObjectStoreError>;

    /// Create or overwrite an object, returning its new ETag.
    async fn put(&self, bucket: &str, key: &str, body: Bytes) -> Result<String, ObjectStoreError>;

    /// Copy an object to a local file, returning the number of bytes written.
    async fn download(&self, bucket: &str, key: &str, dest: &Path) -> Result<u64, ObjectStoreError> {
        let object = self.get(bucket, key).await?;
        fs::write(dest, &object.body)
            .await
            .map_err(|source| ObjectStoreError::Write {
                path: dest.display().to_string(),
                source,
            })?;
        Ok(object.body.len() as u64)
    }
}

/// Drain every page of a prefix listing.
pub async fn list_all(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: Option<&str>,
) -> Result<Vec<ObjectRecord>, ObjectStoreError> {
    let mut objects = Vec::new();
    let mut seen_tokens = HashSet::new();
    let mut token: Option<String> = None;
    let mut pages = 0_usize;

    loop {
        let page = store.list_page(bucket, prefix, token.take()).await?;
        pages = pages.saturating_add(1);
        objects.extend(page.objects);
        match page.next_token {
            Some(next) => {
                if !seen_tokens.insert(next.clone()) {
                    return Err(ObjectStoreError::PaginationLoop {
                        bucket: bucket.to_string(),
                        token: next,
                    });
                }
                token = Some(next);
            }
            None => break,
        }
    }

    tracing::debug!(bucket, prefix = ?prefix, pages, objects = objects.len(), "listing drained");
    Ok(objects)
}

/// Take the listing snapshot for a command.
pub async fn load_listing(
    store: &dyn ObjectStore,
    bucket: &str,
    scope: &ListingScope,
) -> Result<Listing, ObjectStoreError> {
    let objects = match scope {
        ListingScope::Bucket => list_all(store, bucket, None).await?,
        ListingScope::Prefix(prefix) => list_all(store, bucket, Some(prefix)).await?,
        ListingScope::Keys(keys) => {
            let mut seen = HashSet::new();
            let mut objects = Vec::new();
            for key in keys {
                if !seen.insert(key.as_str()) {
                    continue;
                }
                let candidates = list_all(store, bucket, Some(key)).await?;
                objects.extend(Listing::exact_key_matches(candidates, key));
            }
            objects
        }
    };
    Ok(Listing::new(objects))
}

/// Read and decode the marker stored at `marker_key`.
pub async fn fetch_marker(
    store: &dyn ObjectStore,
    bucket: &str,
    marker_key: &str,
) -> Result<MarkerRecord, crate::services::ServiceError> {
    let object = store.get(bucket, marker_key).await?;
    let record = JobMarker::decode(marker_key, &object.body)?.into_record(marker_key, object.etag)?;
    Ok(record)
}

/// Fetch every marker in `marker_keys`, in order.
///
/// Unreadable or malformed markers are logged and skipped.
pub async fn fetch_markers<'a>(
    store: &dyn ObjectStore,
    bucket: &str,
    marker_keys: impl Iterator<Item = &'a str>,
    progress: Option<&ProgressBar>,
) -> Vec<MarkerRecord> {
    let mut markers = Vec::new();
    for key in marker_keys {
        match fetch_marker(store, bucket, key).await {
            Ok(marker) => markers.push(marker),
            Err(err) => tracing::warn!(key, error = %err, "skipping unreadable marker"),
        }
        if let Some(pb) = progress {
            pb.inc(1);
        }
    }
    markers
}

/// Write the marker for `document_key`, returning the marker's ETag.
pub async fn write_marker(
    store: &dyn ObjectStore,
    bucket: &str,
    document_key: &str,
    marker: &JobMarker,
) -> Result<String, crate::services::ServiceError> {
    let key = marker_key(document_key);
    let body = Bytes::from(marker.encode()?);
    let etag = store.put(bucket, &key, body).await?;
    tracing::info!(
        event = "marker_written",
        bucket,
        key = %key,
        job_id = %marker.job_id,
        "marker written"
    );
    Ok(etag)
}

/// S3-backed object store.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    pub fn new(client: S3Client) -> Self {
        Self { client }
    }

    pub fn from_sdk_config(sdk_config: &aws_config::SdkConfig, force_path_style: bool) -> Self {
        let config = aws_sdk_s3::config::Builder::from(sdk_config)
            .force_path_style(force_path_style)
            .build();
        Self::new(S3Client::from_conf(config))
    }
}

#[async_trait::async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        continuation: Option<String>,
    ) -> Result<ListPage, ObjectStoreError> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .set_prefix(prefix.map(str::to_string))
            .set_continuation_token(continuation)
            .send()
            .await
            .map_err(|err| ObjectStoreError::request("list", bucket, DisplayErrorContext(&err)))?;

        let objects = output
            .contents()
            .iter()
            .filter_map(|object| {
                let key = object.key()?;
                Some(ObjectRecord::new(
                    key,
                    object.e_tag().unwrap_or_default(),
                    object.size().and_then(|size| u64::try_from(size).ok()).unwrap_or(0),
                ))
            })
            .collect();

        let next_token = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ListPage {
            objects,
            next_token,
        })
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<StoredObject, ObjectStoreError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if err
                    .as_service_error()
                    .is_some_and(|service| service.is_no_such_key())
                {
                    ObjectStoreError::not_found(bucket, key)
                } else {
                    ObjectStoreError::request("get", bucket, DisplayErrorContext(&err))
                }
            })?;

        let etag = output.e_tag().unwrap_or_default().to_string();
        let body = output
            .body
            .collect()
            .await
            .map_err(|err| ObjectStoreError::request("read body", bucket, err))?
            .into_bytes();

        Ok(StoredObject { body, etag })
    }

    async fn put(&self, bucket: &str, key: &str, body: Bytes) -> Result<String, ObjectStoreError> {
        let output = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type("application/json")
            .body(S3Body::from(body))
            .send()
            .await
            .map_err(|err| ObjectStoreError::request("put", bucket, DisplayErrorContext(&err)))?;
        Ok(output.e_tag().unwrap_or_default().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory_store::MemoryObjectStore;

    async fn seeded(page_size: usize, keys: &[&str]) -> MemoryObjectStore {
        let store = MemoryObjectStore::builder().page_size(page_size).build();
        for key in keys {
            store
                .put("bucket", key, Bytes::from(key.to_string()))
                .await
                .expect("seed");
        }
        store
    }

    #[tokio::test]
    async fn list_all_drains_every_page() {
        let keys: Vec<String> = (0..7).map(|i| format!("doc-{i}.pdf")).collect();
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let store = seeded(2, &refs).await;

        let listed = list_all(&store, "bucket", None).await.expect("list");
        let listed_keys: Vec<&str> = listed.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(listed_keys, refs);
        assert_eq!(store.list_calls(), 4);
    }

    #[tokio::test]
    async fn key_scope_lists_exact_matches_once() {
        let store = seeded(
            1,
            &["a.pdf", "a.pdf.s3-ocr.json", "a.pdf.old", "a.pdfx.pdf", "b.pdf"],
        )
        .await;
        let scope = ListingScope::Keys(vec!["a.pdf".into(), "a.pdf".into(), "missing.pdf".into()]);
        let listing = load_listing(&store, "bucket", &scope).await.expect("listing");
        let keys: Vec<&str> = listing.objects().iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["a.pdf", "a.pdf.s3-ocr.json"]);
    }

    #[tokio::test]
    async fn prefix_scope_limits_listing() {
        let store = seeded(10, &["in/a.pdf", "in/b.pdf", "out/c.pdf"]).await;
        let listing = load_listing(&store, "bucket", &ListingScope::Prefix("in/".into()))
            .await
            .expect("listing");
        assert_eq!(listing.len(), 2);
    }

    #[tokio::test]
    async fn markers_round_trip_through_store() {
        let store = MemoryObjectStore::default();
        let marker = JobMarker::new("job-1", "\"etag\"");
        let etag = write_marker(&store, "bucket", "x/a.pdf", &marker)
            .await
            .expect("write");
        let record = fetch_marker(&store, "bucket", "x/a.pdf.s3-ocr.json")
            .await
            .expect("fetch");
        assert_eq!(record.key, "x/a.pdf");
        assert_eq!(record.job_id, "job-1");
        assert_eq!(record.s3_ocr_etag, etag);
    }

    #[tokio::test]
    async fn download_writes_object_bytes() {
        let store = seeded(10, &["textract-output/j/1"]).await;
        let dir = tempfile::TempDir::new().expect("tempdir");
        let dest = dir.path().join("j-1.json");
        let written = store
            .download("bucket", "textract-output/j/1", &dest)
            .await
            .expect("download");
        assert_eq!(written, "textract-output/j/1".len() as u64);
        assert_eq!(
            std::fs::read_to_string(&dest).expect("read"),
            "textract-output/j/1"
        );
    }
}
