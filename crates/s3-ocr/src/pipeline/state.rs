//! Job state derived fresh from a listing snapshot.
//!
//! Nothing here is cached between commands: every pass recomputes the
//! pending/marked/complete sets from the store listing, which is the only
//! source of truth.

use std::collections::BTreeSet;
use std::fmt;

use crate::pipeline::layout::OutputLayout;
use crate::pipeline::listing::{Listing, ObjectRecord};
use crate::pipeline::marker::MarkerRecord;

/// Reconciliation view of one bucket snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationState<'a> {
    /// Documents with no marker, in listing order.
    pub pending: Vec<&'a ObjectRecord>,
    /// Document keys that have a marker object.
    pub marked: BTreeSet<&'a str>,
    /// Job ids with at least one output part.
    pub complete: BTreeSet<&'a str>,
    /// Number of documents seen (marked or not).
    pub documents: usize,
}

pub fn derive_state<'a>(listing: &'a Listing, layout: &OutputLayout) -> ReconciliationState<'a> {
    let marked = listing.marked_documents();
    let mut documents = 0_usize;
    let mut pending = Vec::new();
    for record in listing.documents(layout) {
        documents = documents.saturating_add(1);
        if !marked.contains(record.key.as_str()) {
            pending.push(record);
        }
    }
    ReconciliationState {
        pending,
        marked,
        complete: completed_job_ids(listing, layout),
        documents,
    }
}

/// Job ids appearing as the first segment under the output prefix.
pub fn completed_job_ids<'a>(listing: &'a Listing, layout: &OutputLayout) -> BTreeSet<&'a str> {
    listing
        .objects()
        .iter()
        .filter_map(|record| layout.job_id_of(&record.key))
        .collect()
}

/// Counts printed by `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    pub complete: usize,
    pub total: usize,
}

impl StatusReport {
    pub fn from_state(state: &ReconciliationState<'_>) -> Self {
        Self {
            complete: state.complete.len(),
            total: state.marked.len(),
        }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} complete out of {} jobs", self.complete, self.total)
    }
}

/// Documents a `start` pass should submit, in listing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionPlan {
    pub marked: usize,
    pub documents: usize,
    pub to_submit: Vec<ObjectRecord>,
}

pub fn plan_submissions(state: &ReconciliationState<'_>) -> SubmissionPlan {
    SubmissionPlan {
        marked: state.marked.len(),
        documents: state.documents,
        to_submit: state.pending.iter().map(|record| (*record).clone()).collect(),
    }
}

/// Marked documents whose live ETag no longer matches their marker.
///
/// Returned in listing order so resubmission follows the same ordering as
/// first-time submission.
pub fn changed_documents(
    listing: &Listing,
    layout: &OutputLayout,
    markers: &[MarkerRecord],
) -> Vec<ObjectRecord> {
    listing
        .documents(layout)
        .filter(|document| {
            markers
                .iter()
                .any(|marker| marker.key == document.key && marker.etag != document.etag)
        })
        .cloned()
        .collect()
}

/// Jobs the index builder must fetch this run.
///
/// `refreshed` are job ids whose `ocr_jobs` rows were (re)written this run;
/// a document re-pointed at an already-fetched job still needs its rows.
pub fn plan_index_jobs(
    referenced: &BTreeSet<String>,
    complete: &BTreeSet<&str>,
    fetched: &BTreeSet<String>,
    refreshed: &BTreeSet<String>,
) -> Vec<String> {
    let mut plan: BTreeSet<&str> = referenced
        .iter()
        .map(String::as_str)
        .filter(|job_id| complete.contains(job_id) && !fetched.contains(*job_id))
        .collect();
    plan.extend(
        refreshed
            .iter()
            .map(String::as_str)
            .filter(|job_id| complete.contains(job_id)),
    );
    plan.into_iter().map(str::to_string).collect()
}

/// Complete jobs that no marker references.
pub fn orphan_jobs<'a>(
    complete: &BTreeSet<&'a str>,
    referenced: &BTreeSet<String>,
) -> Vec<&'a str> {
    complete
        .iter()
        .copied()
        .filter(|job_id| !referenced.contains(*job_id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(key: &str, etag: &str) -> ObjectRecord {
        ObjectRecord::new(key, etag, 10)
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn status_with_no_markers() {
        let listing = Listing::new(vec![rec("a.pdf", "e1")]);
        let state = derive_state(&listing, &OutputLayout::default());
        assert_eq!(
            StatusReport::from_state(&state).to_string(),
            "0 complete out of 0 jobs"
        );
    }

    #[test]
    fn status_with_marker_and_output() {
        let listing = Listing::new(vec![
            rec("a.pdf", "e1"),
            rec("a.pdf.s3-ocr.json", "m1"),
            rec("textract-output/.s3_access_check", "x"),
            rec("textract-output/job-1/1", "o1"),
            rec("textract-output/job-1/2", "o2"),
        ]);
        let state = derive_state(&listing, &OutputLayout::default());
        assert_eq!(
            StatusReport::from_state(&state).to_string(),
            "1 complete out of 1 jobs"
        );
    }

    #[test]
    fn status_with_marker_without_output() {
        let listing = Listing::new(vec![rec("a.pdf", "e1"), rec("a.pdf.s3-ocr.json", "m1")]);
        let state = derive_state(&listing, &OutputLayout::default());
        assert_eq!(
            StatusReport::from_state(&state).to_string(),
            "0 complete out of 1 jobs"
        );
    }

    #[test]
    fn pending_excludes_marked_documents_and_keeps_order() {
        let listing = Listing::new(vec![
            rec("c.pdf", "e3"),
            rec("a.pdf", "e1"),
            rec("a.pdf.s3-ocr.json", "m1"),
            rec("b.pdf", "e2"),
            rec("readme.txt", "t"),
        ]);
        let state = derive_state(&listing, &OutputLayout::default());
        let plan = plan_submissions(&state);
        assert_eq!(plan.marked, 1);
        assert_eq!(plan.documents, 3);
        let keys: Vec<&str> = plan.to_submit.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["c.pdf", "b.pdf"]);
    }

    #[test]
    fn changed_documents_compare_marker_fingerprint() {
        let listing = Listing::new(vec![rec("a.pdf", "new"), rec("b.pdf", "same")]);
        let markers = vec![
            MarkerRecord {
                key: "a.pdf".into(),
                job_id: "j1".into(),
                etag: "old".into(),
                s3_ocr_etag: "m1".into(),
            },
            MarkerRecord {
                key: "b.pdf".into(),
                job_id: "j2".into(),
                etag: "same".into(),
                s3_ocr_etag: "m2".into(),
            },
        ];
        let changed = changed_documents(&listing, &OutputLayout::default(), &markers);
        assert_eq!(changed, vec![rec("a.pdf", "new")]);
    }

    #[test]
    fn index_plan_intersects_and_subtracts() {
        let complete: BTreeSet<&str> = ["j1", "j2", "j3"].into_iter().collect();
        let plan = plan_index_jobs(
            &set(&["j1", "j2", "j4"]),
            &complete,
            &set(&["j2"]),
            &BTreeSet::new(),
        );
        assert_eq!(plan, vec!["j1".to_string()]);
    }

    #[test]
    fn index_plan_includes_refreshed_complete_jobs() {
        let complete: BTreeSet<&str> = ["j1", "j2"].into_iter().collect();
        let plan = plan_index_jobs(
            &set(&["j1", "j2", "j5"]),
            &complete,
            &set(&["j1", "j2"]),
            &set(&["j2", "j5"]),
        );
        assert_eq!(plan, vec!["j2".to_string()]);
    }

    #[test]
    fn orphans_are_complete_but_unreferenced() {
        let complete: BTreeSet<&str> = ["j1", "j9"].into_iter().collect();
        assert_eq!(orphan_jobs(&complete, &set(&["j1"])), vec!["j9"]);
    }
}
