//! Pure reconciliation logic over listing snapshots and job output.
//!
//! Modules under this namespace must remain free of IO and external side effects
//! so they can be reused across commands and test harnesses.

pub mod dedupe;
pub mod layout;
pub mod listing;
pub mod marker;
pub mod merge;
pub mod retry;
pub mod state;

pub use dedupe::plan_dedupe;
pub use layout::{OutputLayout, is_access_check};
pub use listing::{Listing, ListingScope, ObjectRecord, SelectionError};
pub use marker::{
    JobMarker, MarkerError, MarkerRecord, is_marker_key, marker_key, strip_marker_suffix,
};
pub use merge::{
    BlockType, CombinedOutput, LineBlock, OutputPart, PageRow, folder_of, page_rows, page_texts,
    render_text,
};
pub use retry::{RetryDecision, RetryPolicy};
pub use state::{
    ReconciliationState, StatusReport, SubmissionPlan, changed_documents, completed_job_ids,
    derive_state, orphan_jobs, plan_index_jobs, plan_submissions,
};
