use std::collections::{BTreeMap, HashMap};

use crate::pipeline::layout::OutputLayout;
use crate::pipeline::listing::Listing;
use crate::pipeline::marker::MarkerRecord;

/// Map each unmarked document to the existing marker whose recorded source
/// fingerprint equals the document's ETag.
///
/// ETags are compared as opaque strings. When several markers share a
/// fingerprint the last one in `markers` order wins.
pub fn plan_dedupe(
    listing: &Listing,
    layout: &OutputLayout,
    markers: &[MarkerRecord],
) -> BTreeMap<String, MarkerRecord> {
    let mut jobs_by_etag: HashMap<&str, &MarkerRecord> = HashMap::new();
    for marker in markers {
        jobs_by_etag.insert(marker.etag.as_str(), marker);
    }

    let marked = listing.marked_documents();
    listing
        .documents(layout)
        .filter(|document| !marked.contains(document.key.as_str()))
        .filter_map(|document| {
            jobs_by_etag
                .get(document.etag.as_str())
                .map(|marker| (document.key.clone(), (*marker).clone()))
        })
        .collect()
}
