use std::collections::BTreeMap;

use indicatif::ProgressBar;
use tracing::info;

use crate::pipeline::dedupe::plan_dedupe;
use crate::pipeline::listing::ListingScope;
use crate::pipeline::marker::MarkerRecord;
use crate::services::context::{ReconcileContext, ServiceResult};
use crate::services::object_store::{fetch_markers, load_listing, write_marker};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupeReport {
    /// Unmarked document key to the marker whose job it reuses.
    pub plan: BTreeMap<String, MarkerRecord>,
    /// Markers actually written (empty on dry runs).
    pub written: Vec<String>,
}

impl DedupeReport {
    /// Dry-run rendering: `{document_key: {key, job_id, etag, s3_ocr_etag}}`.
    pub fn plan_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.plan)
    }
}

/// Point unmarked documents at existing jobs for identical content.
pub async fn dedupe_markers(
    ctx: &ReconcileContext,
    dry_run: bool,
    progress: Option<&ProgressBar>,
) -> ServiceResult<DedupeReport> {
    let listing = load_listing(ctx.store(), &ctx.bucket, &ListingScope::Bucket).await?;
    let marker_keys: Vec<&str> = listing
        .markers()
        .map(|(_, record)| record.key.as_str())
        .collect();
    if let Some(pb) = progress {
        pb.set_length(marker_keys.len() as u64);
    }

    let markers = fetch_markers(ctx.store(), &ctx.bucket, marker_keys.into_iter(), progress).await;
    let plan = plan_dedupe(&listing, &ctx.layout, &markers);
    info!(
        event = "dedupe_planned",
        markers = markers.len(),
        duplicates = plan.len(),
        "dedupe plan ready"
    );

    let mut report = DedupeReport {
        plan,
        written: Vec::new(),
    };
    if dry_run {
        return Ok(report);
    }

    for (document, source) in &report.plan {
        write_marker(ctx.store(), &ctx.bucket, document, &source.marker()).await?;
        info!(
            event = "dedupe_marker_written",
            key = %document,
            job_id = %source.job_id,
            source = %source.key,
            "reused existing job"
        );
        report.written.push(document.clone());
    }
    Ok(report)
}
