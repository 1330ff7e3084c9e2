use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::Retryable;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::pipeline::listing::{ListingScope, ObjectRecord};
use crate::pipeline::marker::JobMarker;
use crate::pipeline::retry::{RetryDecision, RetryPolicy};
use crate::pipeline::state::{changed_documents, derive_state, plan_submissions};
use crate::services::context::{ReconcileContext, ServiceError, ServiceResult};
use crate::services::object_store::{fetch_markers, load_listing, write_marker};
use crate::services::textract::{JobServiceError, TextDetectionClient, TextDetectionRequest};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    pub dry_run: bool,
    pub resubmit_changed: bool,
    pub policy: RetryPolicy,
}

/// Progress notifications emitted while a submission pass runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitEvent {
    Planned {
        marked: usize,
        documents: usize,
        to_submit: usize,
        changed: usize,
    },
    WouldSubmit {
        key: String,
    },
    Submitted {
        key: String,
        job_id: String,
    },
    Failed {
        key: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitReport {
    pub documents: usize,
    pub marked: usize,
    /// Keys selected for submission, in listing order.
    pub planned: Vec<String>,
    pub submitted: Vec<(String, String)>,
    pub failed: Vec<(String, String)>,
}

/// Run one submission pass over `scope`.
///
/// Markers are written only after the service returns a job id. Per-document
/// failures are reported and skipped; an unrecoverable rate limit aborts the
/// remaining batch.
pub async fn submit_pending(
    ctx: &ReconcileContext,
    client: &dyn TextDetectionClient,
    scope: &ListingScope,
    options: &SubmitOptions,
    on_event: &mut (dyn FnMut(&SubmitEvent) + Send),
) -> ServiceResult<SubmitReport> {
    let listing = load_listing(ctx.store(), &ctx.bucket, scope).await?;
    let state = derive_state(&listing, &ctx.layout);
    let plan = plan_submissions(&state);

    let changed = if options.resubmit_changed {
        let marker_keys = listing.markers().map(|(_, record)| record.key.as_str());
        let markers = fetch_markers(ctx.store(), &ctx.bucket, marker_keys, None).await;
        changed_documents(&listing, &ctx.layout, &markers)
    } else {
        Vec::new()
    };

    // Keep listing order across first-time and changed documents.
    let selected: BTreeSet<&str> = plan
        .to_submit
        .iter()
        .chain(changed.iter())
        .map(|record| record.key.as_str())
        .collect();
    let to_submit: Vec<&ObjectRecord> = listing
        .documents(&ctx.layout)
        .filter(|doc| selected.contains(doc.key.as_str()))
        .collect();

    on_event(&SubmitEvent::Planned {
        marked: plan.marked,
        documents: plan.documents,
        to_submit: to_submit.len(),
        changed: changed.len(),
    });

    let mut report = SubmitReport {
        documents: plan.documents,
        marked: plan.marked,
        planned: to_submit.iter().map(|doc| doc.key.clone()).collect(),
        ..SubmitReport::default()
    };

    if options.dry_run {
        for doc in &to_submit {
            on_event(&SubmitEvent::WouldSubmit {
                key: doc.key.clone(),
            });
        }
        return Ok(report);
    }

    for doc in to_submit {
        let request = TextDetectionRequest {
            bucket: ctx.bucket.clone(),
            key: doc.key.clone(),
            output_bucket: ctx.bucket.clone(),
            output_prefix: ctx.layout.output_prefix().to_string(),
        };

        match submit_with_retry(client, &request, &options.policy).await {
            Ok(Some(job_id)) => {
                let marker = JobMarker::new(job_id.as_str(), doc.etag.as_str());
                if let Err(err) = write_marker(ctx.store(), &ctx.bucket, &doc.key, &marker).await {
                    // The job exists without a marker; keep its id traceable.
                    let reason = format!("job {job_id} started but marker write failed: {err}");
                    warn!(event = "marker_write_failed", key = %doc.key, job_id = %job_id, error = %err, "marker not written");
                    on_event(&SubmitEvent::Failed {
                        key: doc.key.clone(),
                        reason: reason.clone(),
                    });
                    report.failed.push((doc.key.clone(), reason));
                    continue;
                }
                info!(event = "submit_complete", key = %doc.key, job_id = %job_id, "OCR job started");
                on_event(&SubmitEvent::Submitted {
                    key: doc.key.clone(),
                    job_id: job_id.clone(),
                });
                report.submitted.push((doc.key.clone(), job_id));
            }
            Ok(None) => {
                let reason = "no job id returned".to_string();
                warn!(event = "submit_failed", key = %doc.key, reason = %reason, "submission returned no job id");
                on_event(&SubmitEvent::Failed {
                    key: doc.key.clone(),
                    reason: reason.clone(),
                });
                report.failed.push((doc.key.clone(), reason));
            }
            Err(SubmitFailure { error, attempts }) if error.is_rate_limited() => {
                warn!(
                    event = "submit_aborted",
                    key = %doc.key,
                    attempts,
                    submitted = report.submitted.len(),
                    "rate limit persisted; aborting batch"
                );
                return Err(ServiceError::RateLimitExhausted {
                    key: doc.key.clone(),
                    attempts,
                    submitted: report.submitted.len(),
                });
            }
            Err(SubmitFailure { error, .. }) => {
                warn!(event = "submit_failed", key = %doc.key, error = %error, "submission failed");
                on_event(&SubmitEvent::Failed {
                    key: doc.key.clone(),
                    reason: error.to_string(),
                });
                report.failed.push((doc.key.clone(), error.to_string()));
            }
        }
    }

    Ok(report)
}

struct SubmitFailure {
    error: JobServiceError,
    attempts: u32,
}

async fn submit_with_retry(
    client: &dyn TextDetectionClient,
    request: &TextDetectionRequest,
    policy: &RetryPolicy,
) -> Result<Option<String>, SubmitFailure> {
    let counter = AtomicU32::new(0);
    let attempts = &counter;
    let attempt = move || async move {
        attempts.fetch_add(1, Ordering::Relaxed);
        info!(event = "submit_start", key = %request.key, "starting text detection");
        client.start_text_detection(request).await
    };

    attempt
        .retry(policy.backoff())
        .sleep(sleep)
        .when(|err: &JobServiceError| {
            let attempt = attempts.load(Ordering::Relaxed);
            policy.decide(attempt, err.is_rate_limited()) == RetryDecision::Retry
        })
        .notify(|err: &JobServiceError, delay: Duration| {
            warn!(
                event = "submit_retry",
                key = %request.key,
                delay_ms = delay.as_millis(),
                error = %err,
                "retrying rate-limited submission"
            );
        })
        .await
        .map_err(|error| SubmitFailure {
            error,
            attempts: attempts.load(Ordering::Relaxed),
        })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;

    use super::*;
    use crate::pipeline::layout::OutputLayout;
    use crate::pipeline::marker::marker_key;
    use crate::services::memory_store::MemoryObjectStore;
    use crate::services::object_store::{ObjectStore, fetch_marker};
    use crate::services::textract::{ScriptedResponse, ScriptedTextract};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    async fn context_with(keys: &[(&str, &[u8])]) -> (ReconcileContext, MemoryObjectStore) {
        let store = MemoryObjectStore::default();
        for (key, body) in keys {
            store
                .put("bucket", key, Bytes::copy_from_slice(body))
                .await
                .unwrap();
        }
        let ctx = ReconcileContext::new(Arc::new(store.clone()), "bucket", OutputLayout::default());
        (ctx, store)
    }

    async fn run(
        ctx: &ReconcileContext,
        client: &ScriptedTextract,
        options: SubmitOptions,
    ) -> (ServiceResult<SubmitReport>, Vec<SubmitEvent>) {
        let mut events = Vec::new();
        let result = submit_pending(ctx, client, &ListingScope::Bucket, &options, &mut |event: &SubmitEvent| {
            events.push(event.clone())
        })
        .await;
        (result, events)
    }

    #[tokio::test]
    async fn submits_pending_document_and_writes_marker() {
        let (ctx, store) = context_with(&[("a.pdf", b"%PDF-a")]).await;
        let client = ScriptedTextract::new();
        client.push(ScriptedResponse::JobId("J1".into())).await;

        let (result, events) = run(&ctx, &client, SubmitOptions::default()).await;
        let report = result.unwrap();
        assert_eq!(report.submitted, vec![("a.pdf".to_string(), "J1".to_string())]);
        assert_eq!(
            events[0],
            SubmitEvent::Planned {
                marked: 0,
                documents: 1,
                to_submit: 1,
                changed: 0
            }
        );

        let marker = fetch_marker(&store, "bucket", "a.pdf.s3-ocr.json").await.unwrap();
        assert_eq!(marker.job_id, "J1");
        assert_eq!(marker.etag, store.get("bucket", "a.pdf").await.unwrap().etag);

        let requests = client.requests().await;
        assert_eq!(requests[0].output_bucket, "bucket");
        assert_eq!(requests[0].output_prefix, "textract-output");
    }

    #[tokio::test]
    async fn second_pass_submits_nothing() {
        let (ctx, _store) = context_with(&[("a.pdf", b"a"), ("b.pdf", b"b")]).await;
        let client = ScriptedTextract::new();
        run(&ctx, &client, SubmitOptions::default()).await.0.unwrap();
        let (again, _) = run(&ctx, &client, SubmitOptions::default()).await;
        let again = again.unwrap();
        assert!(again.planned.is_empty());
        assert_eq!(again.marked, 2);
        assert_eq!(client.requests().await.len(), 2);
    }

    #[tokio::test]
    async fn failed_marker_write_is_reported_and_batch_continues() {
        let (ctx, store) = context_with(&[("a.pdf", b"a"), ("b.pdf", b"b")]).await;
        store.fail_writes_of(marker_key("a.pdf")).await;
        let client = ScriptedTextract::new();
        client.push(ScriptedResponse::JobId("J-a".into())).await;
        client.push(ScriptedResponse::JobId("J-b".into())).await;

        let (result, events) = run(&ctx, &client, SubmitOptions::default()).await;
        let report = result.unwrap();
        assert_eq!(client.requests().await.len(), 2);
        assert_eq!(report.submitted, vec![("b.pdf".to_string(), "J-b".to_string())]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "a.pdf");
        assert!(report.failed[0].1.contains("J-a"));
        assert!(events.iter().any(|event| matches!(event, SubmitEvent::Failed { key, .. } if key == "a.pdf")));

        let keys = store.keys("bucket").await;
        assert!(!keys.contains(&marker_key("a.pdf")));
        assert!(keys.contains(&marker_key("b.pdf")));
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let (ctx, store) = context_with(&[("a.pdf", b"a")]).await;
        let client = ScriptedTextract::new();
        let options = SubmitOptions {
            dry_run: true,
            ..SubmitOptions::default()
        };
        let (result, events) = run(&ctx, &client, options).await;
        assert_eq!(result.unwrap().planned, vec!["a.pdf".to_string()]);
        assert!(events.contains(&SubmitEvent::WouldSubmit { key: "a.pdf".into() }));
        assert!(client.requests().await.is_empty());
        assert_eq!(store.keys("bucket").await, vec!["a.pdf"]);
    }

    #[tokio::test]
    async fn missing_job_id_leaves_document_pending() {
        let (ctx, store) = context_with(&[("a.pdf", b"a"), ("b.pdf", b"b")]).await;
        let client = ScriptedTextract::new();
        client.push(ScriptedResponse::NoJobId).await;
        client.push(ScriptedResponse::JobId("J2".into())).await;

        let report = run(&ctx, &client, SubmitOptions::default()).await.0.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "a.pdf");
        assert_eq!(report.submitted, vec![("b.pdf".to_string(), "J2".to_string())]);
        assert!(!store.keys("bucket").await.contains(&"a.pdf.s3-ocr.json".to_string()));
    }

    #[tokio::test]
    async fn rate_limit_is_retried_then_succeeds() {
        let (ctx, _store) = context_with(&[("a.pdf", b"a")]).await;
        let client = ScriptedTextract::new();
        client.push(ScriptedResponse::RateLimited).await;
        client.push(ScriptedResponse::RateLimited).await;
        client.push(ScriptedResponse::JobId("J1".into())).await;
        let options = SubmitOptions {
            policy: fast_policy(3),
            ..SubmitOptions::default()
        };
        let report = run(&ctx, &client, options).await.0.unwrap();
        assert_eq!(report.submitted.len(), 1);
        assert_eq!(client.requests().await.len(), 3);
    }

    #[tokio::test]
    async fn exhausted_rate_limit_aborts_batch() {
        let (ctx, store) = context_with(&[("a.pdf", b"a"), ("b.pdf", b"b"), ("c.pdf", b"c")]).await;
        let client = ScriptedTextract::new();
        client.push(ScriptedResponse::JobId("J1".into())).await;
        for _ in 0..3 {
            client.push(ScriptedResponse::RateLimited).await;
        }
        let options = SubmitOptions {
            policy: fast_policy(2),
            ..SubmitOptions::default()
        };
        let err = run(&ctx, &client, options).await.0.unwrap_err();
        match err {
            ServiceError::RateLimitExhausted {
                key,
                attempts,
                submitted,
            } => {
                assert_eq!(key, "b.pdf");
                assert_eq!(attempts, 3);
                assert_eq!(submitted, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        let keys = store.keys("bucket").await;
        assert!(keys.contains(&"a.pdf.s3-ocr.json".to_string()));
        assert!(!keys.contains(&"b.pdf.s3-ocr.json".to_string()));
        assert!(!keys.contains(&"c.pdf.s3-ocr.json".to_string()));
    }

    #[tokio::test]
    async fn disabled_retry_aborts_on_first_rate_limit() {
        let (ctx, _store) = context_with(&[("a.pdf", b"a")]).await;
        let client = ScriptedTextract::new();
        client.push(ScriptedResponse::RateLimited).await;
        let options = SubmitOptions {
            policy: RetryPolicy::disabled(),
            ..SubmitOptions::default()
        };
        let err = run(&ctx, &client, options).await.0.unwrap_err();
        assert!(matches!(err, ServiceError::RateLimitExhausted { attempts: 1, .. }));
        assert_eq!(client.requests().await.len(), 1);
    }

    #[tokio::test]
    async fn other_failures_do_not_retry() {
        let (ctx, _store) = context_with(&[("a.pdf", b"a")]).await;
        let client = ScriptedTextract::new();
        client.push(ScriptedResponse::Failure("AccessDenied".into())).await;
        let options = SubmitOptions {
            policy: fast_policy(3),
            ..SubmitOptions::default()
        };
        let report = run(&ctx, &client, options).await.0.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(client.requests().await.len(), 1);
    }

    #[tokio::test]
    async fn changed_documents_are_resubmitted_on_request() {
        let (ctx, store) = context_with(&[("a.pdf", b"v1")]).await;
        let client = ScriptedTextract::new();
        run(&ctx, &client, SubmitOptions::default()).await.0.unwrap();
        store.put("bucket", "a.pdf", Bytes::from_static(b"v2")).await.unwrap();

        let untouched = run(&ctx, &client, SubmitOptions::default()).await.0.unwrap();
        assert!(untouched.planned.is_empty());

        let options = SubmitOptions {
            resubmit_changed: true,
            ..SubmitOptions::default()
        };
        let report = run(&ctx, &client, options).await.0.unwrap();
        assert_eq!(report.submitted, vec![("a.pdf".to_string(), "job-2".to_string())]);
        let marker = fetch_marker(&store, "bucket", &marker_key("a.pdf")).await.unwrap();
        assert_eq!(marker.job_id, "job-2");
        assert_eq!(marker.etag, store.get("bucket", "a.pdf").await.unwrap().etag);
    }
}
