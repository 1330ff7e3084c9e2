use std::path::{Path, PathBuf};

use indicatif::ProgressBar;
use tracing::{debug, info};

use crate::pipeline::listing::{ListingScope, ObjectRecord};
use crate::pipeline::marker::marker_key;
use crate::pipeline::merge::{CombinedOutput, OutputPart};
use crate::services::context::{ReconcileContext, ServiceError, ServiceResult};
use crate::services::object_store::{fetch_marker, list_all, load_listing};

/// Job id recorded in the marker of `document_key`.
pub async fn resolve_job_id(ctx: &ReconcileContext, document_key: &str) -> ServiceResult<String> {
    let scope = ListingScope::Keys(vec![document_key.to_string()]);
    let listing = load_listing(ctx.store(), &ctx.bucket, &scope).await?;
    let marker = marker_key(document_key);
    if listing.get(&marker).is_none() {
        return Err(ServiceError::KeyNotFound {
            key: document_key.to_string(),
        });
    }
    let record = fetch_marker(ctx.store(), &ctx.bucket, &marker).await?;
    debug!(key = document_key, job_id = %record.job_id, "resolved job id");
    Ok(record.job_id)
}

/// Output parts of `job_id` in listing order, access-check objects excluded.
pub async fn list_output_parts(
    ctx: &ReconcileContext,
    job_id: &str,
) -> ServiceResult<Vec<ObjectRecord>> {
    let prefix = ctx.layout.job_prefix(job_id);
    let parts = list_all(ctx.store(), &ctx.bucket, Some(&prefix))
        .await?
        .into_iter()
        .filter(|record| ctx.layout.job_id_of(&record.key) == Some(job_id))
        .collect();
    Ok(parts)
}

/// Fetch and concatenate `parts` in the given order.
pub async fn fetch_combined(
    ctx: &ReconcileContext,
    parts: &[ObjectRecord],
    progress: Option<&ProgressBar>,
) -> ServiceResult<CombinedOutput> {
    let mut decoded = Vec::with_capacity(parts.len());
    for part in parts {
        let object = ctx.store().get(&ctx.bucket, &part.key).await?;
        decoded.push(OutputPart::parse(&object.body)?);
        if let Some(pb) = progress {
            pb.inc(object.body.len() as u64);
        }
    }
    Ok(CombinedOutput::combine(decoded))
}

/// Combined output for the job a document's marker points at.
pub async fn combined_for_document(
    ctx: &ReconcileContext,
    document_key: &str,
) -> ServiceResult<CombinedOutput> {
    let job_id = resolve_job_id(ctx, document_key).await?;
    let parts = list_output_parts(ctx, &job_id).await?;
    fetch_combined(ctx, &parts, None).await
}

/// Download every part into `dir`, one file per part.
pub async fn download_parts(
    ctx: &ReconcileContext,
    parts: &[ObjectRecord],
    dir: &Path,
    progress: Option<&ProgressBar>,
) -> ServiceResult<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(parts.len());
    for part in parts {
        let dest = dir.join(ctx.layout.part_filename(&part.key));
        let bytes = ctx.store().download(&ctx.bucket, &part.key, &dest).await?;
        info!(event = "part_downloaded", key = %part.key, path = %dest.display(), bytes, "downloaded part");
        if let Some(pb) = progress {
            pb.inc(1);
        }
        written.push(dest);
    }
    Ok(written)
}
