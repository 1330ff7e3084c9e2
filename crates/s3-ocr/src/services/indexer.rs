use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use crate::index::PageIndex;
use crate::pipeline::listing::{Listing, ListingScope, ObjectRecord};
use crate::pipeline::merge::page_rows;
use crate::pipeline::state::{completed_job_ids, orphan_jobs, plan_index_jobs};
use crate::progress::{make_bytes_progress_bar, make_progress_bar};
use crate::services::context::{ReconcileContext, ServiceError, ServiceResult};
use crate::services::object_store::{fetch_marker, load_listing};
use crate::services::results::fetch_combined;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    /// Markers fetched and upserted into `ocr_jobs` this run.
    pub markers_refreshed: usize,
    pub jobs_indexed: Vec<String>,
    pub pages_written: usize,
    /// Complete jobs no marker points at.
    pub orphans: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl IndexReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Bring the local index up to date with the bucket.
///
/// A job is recorded in `fetched_jobs` only after the page rows of every
/// document referencing it have been committed. Per-job failures are
/// collected in the report; the remaining jobs still run.
pub async fn build_index(
    ctx: &ReconcileContext,
    index: &mut PageIndex,
    show_progress: bool,
) -> ServiceResult<IndexReport> {
    let listing = load_listing(ctx.store(), &ctx.bucket, &ListingScope::Bucket).await?;
    let mut report = IndexReport::default();

    let refreshed = refresh_markers(ctx, index, &listing, show_progress).await?;
    report.markers_refreshed = refreshed.len();
    let refreshed_jobs: BTreeSet<String> = refreshed.into_iter().collect();

    let complete = completed_job_ids(&listing, &ctx.layout);
    let referenced = index.referenced_jobs()?;
    let fetched = index.fetched_jobs()?;
    let plan = plan_index_jobs(&referenced, &complete, &fetched, &refreshed_jobs);

    for orphan in orphan_jobs(&complete, &referenced) {
        warn!(event = "orphan_output", job_id = orphan, "output exists for a job no marker references");
        report.orphans.push(orphan.to_string());
    }

    let jobs: Vec<(String, Vec<ObjectRecord>)> = plan
        .into_iter()
        .map(|job_id| {
            let parts = listing.output_parts(&ctx.layout, &job_id).cloned().collect();
            (job_id, parts)
        })
        .collect();
    let total_bytes: u64 = jobs
        .iter()
        .flat_map(|(_, parts)| parts.iter())
        .map(|part| part.size)
        .sum();
    let progress = show_progress.then(|| make_bytes_progress_bar(total_bytes));

    for (job_id, parts) in &jobs {
        match index_job(ctx, index, job_id, parts, progress.as_ref()).await {
            Ok(Some(pages)) => {
                report.pages_written = report.pages_written.saturating_add(pages);
                report.jobs_indexed.push(job_id.clone());
            }
            Ok(None) => {}
            Err(err) => {
                warn!(event = "index_job_failed", job_id = %job_id, error = %err, "failed to index job");
                report.failed.push((job_id.clone(), err.to_string()));
            }
        }
    }

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }
    info!(
        event = "index_complete",
        markers = report.markers_refreshed,
        jobs = report.jobs_indexed.len(),
        pages = report.pages_written,
        orphans = report.orphans.len(),
        failed = report.failed.len(),
        "index pass finished"
    );
    Ok(report)
}

/// Upsert markers whose `(document, marker etag)` is not yet recorded.
/// Returns the job ids of the upserted rows.
async fn refresh_markers(
    ctx: &ReconcileContext,
    index: &PageIndex,
    listing: &Listing,
    show_progress: bool,
) -> ServiceResult<Vec<String>> {
    let known = index.known_markers()?;
    let stale: Vec<&ObjectRecord> = listing
        .markers()
        .filter(|(document, record)| !known.contains(&(document.to_string(), record.etag.clone())))
        .map(|(_, record)| record)
        .collect();

    let progress = (show_progress && !stale.is_empty())
        .then(|| make_progress_bar(stale.len() as u64, "markers"));
    let mut refreshed = Vec::with_capacity(stale.len());
    for record in stale {
        match fetch_marker(ctx.store(), &ctx.bucket, &record.key).await {
            Ok(marker) => {
                index.upsert_marker(&marker)?;
                debug!(key = %marker.key, job_id = %marker.job_id, "recorded marker");
                refreshed.push(marker.job_id);
            }
            Err(err) => warn!(key = %record.key, error = %err, "skipping unreadable marker"),
        }
        if let Some(pb) = &progress {
            pb.inc(1);
        }
    }
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }
    Ok(refreshed)
}

/// Index one job. `Ok(None)` when no document references it.
async fn index_job(
    ctx: &ReconcileContext,
    index: &mut PageIndex,
    job_id: &str,
    parts: &[ObjectRecord],
    progress: Option<&indicatif::ProgressBar>,
) -> ServiceResult<Option<usize>> {
    let keys = index.keys_for_job(job_id)?;
    if keys.is_empty() {
        warn!(event = "orphan_output", job_id, "no document references job; skipping");
        return Ok(None);
    }
    if parts.is_empty() {
        return Err(ServiceError::message(format!("job {job_id} has no output parts")));
    }

    let combined = fetch_combined(ctx, parts, progress).await?;
    let documents: Vec<(String, Vec<_>)> = keys
        .into_iter()
        .map(|key| {
            let rows = page_rows(&key, &combined);
            (key, rows)
        })
        .collect();
    let pages = index.replace_pages(&documents)?;
    index.mark_fetched(job_id)?;
    info!(
        event = "index_job_complete",
        job_id,
        documents = documents.len(),
        pages,
        "indexed job"
    );
    Ok(Some(pages))
}
