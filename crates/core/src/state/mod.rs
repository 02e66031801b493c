pub mod db;
pub mod document;
pub mod jobs;
pub mod snapshots;
pub mod summary;

pub use db::CitecheckDb;

pub use document::{Citation, CitationValidation, DocumentStructure, ManualReview, Paragraph, ReviewSource};
pub use jobs::{JobManager, JobStatus, TierProgress, ValidationJob};
pub use snapshots::{
    CheckRecord, DocumentSnapshot, SnapshotDraft, SnapshotReason, SnapshotStore, SnapshotSummary,
    SqliteSnapshotStore, StoreError,
};
pub use summary::{CheckSummary, CitationStatus, RiskCounts};
