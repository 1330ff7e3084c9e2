//! Immutable snapshot of an object-store listing.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::layout::OutputLayout;
use crate::pipeline::marker::{marker_key, strip_marker_suffix};

/// One entry of a bucket listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub key: String,
    /// Opaque content fingerprint (S3 ETag, quotes included).
    pub etag: String,
    pub size: u64,
}

impl ObjectRecord {
    pub fn new(key: impl Into<String>, etag: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            etag: etag.into(),
            size,
        }
    }
}

/// Which part of a bucket a command looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingScope {
    Bucket,
    Prefix(String),
    /// Exact keys; each lookup also matches the key's marker.
    Keys(Vec<String>),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("Specify keys, --prefix or use --all to process all PDFs in the bucket")]
    Missing,
    #[error("Use only one of: explicit keys, --prefix, --all")]
    Ambiguous,
}

impl ListingScope {
    /// Build the `start` selection, requiring exactly one mode.
    pub fn from_selection(
        keys: Vec<String>,
        prefix: Option<String>,
        all: bool,
    ) -> Result<Self, SelectionError> {
        let modes = usize::from(!keys.is_empty()) + usize::from(prefix.is_some()) + usize::from(all);
        match modes {
            0 => Err(SelectionError::Missing),
            1 => Ok(if !keys.is_empty() {
                ListingScope::Keys(keys)
            } else if let Some(prefix) = prefix {
                ListingScope::Prefix(prefix)
            } else {
                ListingScope::Bucket
            }),
            _ => Err(SelectionError::Ambiguous),
        }
    }
}

/// Snapshot taken once per command. Order is the store's listing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    objects: Vec<ObjectRecord>,
}

impl Listing {
    pub fn new(objects: Vec<ObjectRecord>) -> Self {
        Self { objects }
    }

    /// Keep only `key` and `key.s3-ocr.json` matches for one requested key.
    pub fn exact_key_matches(candidates: Vec<ObjectRecord>, key: &str) -> Vec<ObjectRecord> {
        let marker = marker_key(key);
        candidates
            .into_iter()
            .filter(|record| record.key == key || record.key == marker)
            .collect()
    }

    pub fn objects(&self) -> &[ObjectRecord] {
        &self.objects
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&ObjectRecord> {
        self.objects.iter().find(|record| record.key == key)
    }

    /// Documents in listing order; items borrow from the listing only.
    pub fn documents<'a, 'l>(
        &'a self,
        layout: &'l OutputLayout,
    ) -> impl Iterator<Item = &'a ObjectRecord> + use<'a, 'l> {
        self.objects
            .iter()
            .filter(move |record| layout.is_document(&record.key))
    }

    /// Marker objects paired with the document key they describe.
    pub fn markers(&self) -> impl Iterator<Item = (&str, &ObjectRecord)> {
        self.objects.iter().filter_map(|record| {
            strip_marker_suffix(&record.key).map(|document| (document, record))
        })
    }

    pub fn marked_documents(&self) -> BTreeSet<&str> {
        self.markers().map(|(document, _)| document).collect()
    }

    /// Output parts of one job, access-check objects excluded.
    pub fn output_parts<'a, 'l>(
        &'a self,
        layout: &'l OutputLayout,
        job_id: &'l str,
    ) -> impl Iterator<Item = &'a ObjectRecord> + use<'a, 'l> {
        self.objects
            .iter()
            .filter(move |record| layout.job_id_of(&record.key) == Some(job_id))
    }
}
