use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use tokio::sync::Mutex;

use crate::pipeline::listing::ObjectRecord;
use crate::services::object_store::{ListPage, ObjectStore, ObjectStoreError, StoredObject};

type BucketMap = BTreeMap<(String, String), Bytes>;

/// In-memory object store used by tests and dry runs.
///
/// Keys are kept sorted like S3 listings. ETags are quoted BLAKE3 digests of
/// the body, so identical content always shares a fingerprint.
#[derive(Debug, Clone, bon::Builder)]
pub struct MemoryObjectStore {
    #[builder(default = 1000)]
    page_size: usize,
    #[builder(skip)]
    objects: Arc<Mutex<BucketMap>>,
    #[builder(skip)]
    failing: Arc<Mutex<BTreeSet<String>>>,
    #[builder(skip)]
    failing_writes: Arc<Mutex<BTreeSet<String>>>,
    #[builder(skip)]
    list_calls: Arc<AtomicUsize>,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Quoted BLAKE3 hex digest used as the in-memory ETag.
pub fn content_etag(body: &[u8]) -> String {
    format!("\"{}\"", blake3::hash(body).to_hex())
}

impl MemoryObjectStore {
    /// Number of `list_page` calls served so far.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::Relaxed)
    }

    /// Make every `get` of `key` fail with a request error.
    pub async fn fail_reads_of(&self, key: impl Into<String>) {
        self.failing.lock().await.insert(key.into());
    }

    /// Make every `put` of `key` fail with a request error.
    pub async fn fail_writes_of(&self, key: impl Into<String>) {
        self.failing_writes.lock().await.insert(key.into());
    }

    /// Keys currently stored in `bucket`, sorted.
    pub async fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .lock()
            .await
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, key)| key.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        continuation: Option<String>,
    ) -> Result<ListPage, ObjectStoreError> {
        self.list_calls.fetch_add(1, Ordering::Relaxed);
        let prefix = prefix.unwrap_or("");
        let map = self.objects.lock().await;

        // The continuation token is the last key of the previous page.
        let mut matching = map
            .iter()
            .filter(|((b, key), _)| b == bucket && key.starts_with(prefix))
            .filter(|((_, key), _)| continuation.as_deref().is_none_or(|after| key.as_str() > after))
            .map(|((_, key), body)| {
                ObjectRecord::new(key.clone(), content_etag(body), body.len() as u64)
            });

        let page_size = self.page_size.max(1);
        let objects: Vec<ObjectRecord> = matching.by_ref().take(page_size).collect();
        let next_token = if matching.next().is_some() {
            objects.last().map(|record| record.key.clone())
        } else {
            None
        };

        Ok(ListPage {
            objects,
            next_token,
        })
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<StoredObject, ObjectStoreError> {
        if self.failing.lock().await.contains(key) {
            return Err(ObjectStoreError::request("get", bucket, format!("injected failure for {key}")));
        }
        let map = self.objects.lock().await;
        match map.get(&(bucket.to_string(), key.to_string())) {
            Some(body) => Ok(StoredObject {
                body: body.clone(),
                etag: content_etag(body),
            }),
            None => Err(ObjectStoreError::not_found(bucket, key)),
        }
    }

    async fn put(&self, bucket: &str, key: &str, body: Bytes) -> Result<String, ObjectStoreError> {
        if self.failing_writes.lock().await.contains(key) {
            return Err(ObjectStoreError::request("put", bucket, format!("injected failure for {key}")));
        }
        let etag = content_etag(&body);
        self.objects
            .lock()
            .await
            .insert((bucket.to_string(), key.to_string()), body);
        Ok(etag)
    }
}
