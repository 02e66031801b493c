//! # Document Snapshots
//!
//! Immutable, versioned copies of a check's document structure. Every
//! reconciliation, validation run and manual review commits a new snapshot;
//! the highest version of a lineage is the check's current document.

use async_trait::async_trait;
use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

use super::db::CitecheckDb;
use super::document::DocumentStructure;

/// Why a snapshot was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotReason {
    Created,
    CitationsIdentified,
    ParagraphEdited,
    Validated,
    CitationRevalidated,
    ManualReview,
}

impl SnapshotReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotReason::Created => "created",
            SnapshotReason::CitationsIdentified => "citations_identified",
            SnapshotReason::ParagraphEdited => "paragraph_edited",
            SnapshotReason::Validated => "validated",
            SnapshotReason::CitationRevalidated => "citation_revalidated",
            SnapshotReason::ManualReview => "manual_review",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(SnapshotReason::Created),
            "citations_identified" => Some(SnapshotReason::CitationsIdentified),
            "paragraph_edited" => Some(SnapshotReason::ParagraphEdited),
            "validated" => Some(SnapshotReason::Validated),
            "citation_revalidated" => Some(SnapshotReason::CitationRevalidated),
            "manual_review" => Some(SnapshotReason::ManualReview),
            _ => None,
        }
    }
}

/// One immutable document version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSnapshot {
    pub id: String,
    pub check_id: String,
    pub version: u32,
    pub parent_id: Option<String>,
    pub reason: SnapshotReason,
    pub description: Option<String>,
    pub document: DocumentStructure,
    pub created_at: DateTime<Utc>,
}

/// Snapshot listing entry without the document body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
    pub id: String,
    pub version: u32,
    pub parent_id: Option<String>,
    pub reason: SnapshotReason,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A new version waiting to be committed
#[derive(Debug, Clone)]
pub struct SnapshotDraft {
    pub parent_id: Option<String>,
    pub reason: SnapshotReason,
    pub description: Option<String>,
    pub document: DocumentStructure,
}

impl SnapshotDraft {
    pub fn new(parent: &DocumentSnapshot, reason: SnapshotReason, document: DocumentStructure) -> Self {
        Self {
            parent_id: Some(parent.id.clone()),
            reason,
            description: None,
            document,
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }
}

/// A document lineage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRecord {
    pub id: String,
    pub title: String,
    pub current_snapshot_id: Option<String>,
    pub current_job_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("check {0} not found")]
    CheckNotFound(String),

    #[error("snapshot {0} not found")]
    SnapshotNotFound(String),

    /// The draft was built on a snapshot that is no longer current
    #[error("check {check_id} moved on: draft parent {parent:?}, current {current}")]
    StaleParent {
        check_id: String,
        parent: Option<String>,
        current: String,
    },

    #[error("snapshot store unavailable: {0:#}")]
    Unavailable(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence boundary for document versions
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Start a lineage; the document becomes version 1
    async fn create_check(&self, document: DocumentStructure) -> StoreResult<DocumentSnapshot>;

    async fn check(&self, check_id: &str) -> StoreResult<CheckRecord>;

    async fn list_checks(&self) -> StoreResult<Vec<CheckRecord>>;

    /// Most recent snapshot of a lineage
    async fn current(&self, check_id: &str) -> StoreResult<DocumentSnapshot>;

    async fn load(&self, snapshot_id: &str) -> StoreResult<DocumentSnapshot>;

    /// Append a new version; it becomes current atomically. Fails with
    /// [`StoreError::StaleParent`] unless the draft's parent is still current.
    async fn commit(&self, check_id: &str, draft: SnapshotDraft) -> StoreResult<DocumentSnapshot>;

    /// Versions of a lineage, newest first
    async fn history(&self, check_id: &str) -> StoreResult<Vec<SnapshotSummary>>;

    /// Remember the job currently attached to a check
    async fn set_current_job(&self, check_id: &str, job_id: &str) -> StoreResult<()>;
}

/// SQLite-backed snapshot store
pub struct SqliteSnapshotStore {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

struct SnapshotRow {
    id: String,
    check_id: String,
    version: u32,
    parent_id: Option<String>,
    reason: String,
    description: Option<String>,
    document: String,
    created_at: String,
}

impl SnapshotRow {
    const COLUMNS: &'static str =
        "id, check_id, version, parent_id, reason, description, document, created_at";

    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            check_id: row.get(1)?,
            version: row.get(2)?,
            parent_id: row.get(3)?,
            reason: row.get(4)?,
            description: row.get(5)?,
            document: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn into_snapshot(self) -> anyhow::Result<DocumentSnapshot> {
        let document = serde_json::from_str(&self.document)
            .with_context(|| format!("Corrupt document in snapshot {}", self.id))?;
        let reason = SnapshotReason::parse(&self.reason)
            .with_context(|| format!("Unknown snapshot reason '{}'", self.reason))?;
        Ok(DocumentSnapshot {
            id: self.id,
            check_id: self.check_id,
            version: self.version,
            parent_id: self.parent_id,
            reason,
            description: self.description,
            document,
            created_at: parse_time(&self.created_at),
        })
    }
}

fn row_to_check(row: &rusqlite::Row) -> rusqlite::Result<CheckRecord> {
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;
    Ok(CheckRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        current_snapshot_id: row.get(2)?,
        current_job_id: row.get(3)?,
        created_at: parse_time(&created_at),
        updated_at: parse_time(&updated_at),
    })
}

impl SqliteSnapshotStore {
    pub fn new(db: &CitecheckDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    fn lock(&self) -> anyhow::Result<std::sync::MutexGuard<'_, rusqlite::Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    fn insert_snapshot(
        conn: &rusqlite::Connection,
        snapshot: &DocumentSnapshot,
    ) -> anyhow::Result<()> {
        let document = serde_json::to_string(&snapshot.document)?;
        conn.execute(
            r#"
            INSERT INTO snapshots (id, check_id, version, parent_id, reason, description, document, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                snapshot.id,
                snapshot.check_id,
                snapshot.version,
                snapshot.parent_id,
                snapshot.reason.as_str(),
                snapshot.description,
                document,
                snapshot.created_at.to_rfc3339(),
            ],
        )
        .context("Failed to save snapshot")?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn create_check(&self, document: DocumentStructure) -> StoreResult<DocumentSnapshot> {
        let now = Utc::now();
        let check_id = format!("chk_{}", Uuid::new_v4().simple());
        let snapshot = DocumentSnapshot {
            id: format!("snap_{}", Uuid::new_v4().simple()),
            check_id: check_id.clone(),
            version: 1,
            parent_id: None,
            reason: SnapshotReason::Created,
            description: None,
            document,
            created_at: now,
        };

        let conn = self.lock()?;
        let tx = conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            r#"
            INSERT INTO checks (id, title, current_snapshot_id, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            "#,
            params![check_id, snapshot.document.title, snapshot.id, now.to_rfc3339()],
        )
        .context("Failed to create check")?;
        Self::insert_snapshot(&tx, &snapshot)?;
        tx.commit().context("Failed to commit check")?;

        tracing::info!(check_id = %check_id, snapshot_id = %snapshot.id, "Check created");
        Ok(snapshot)
    }

    async fn check(&self, check_id: &str) -> StoreResult<CheckRecord> {
        let conn = self.lock()?;
        conn.query_row(
            r#"
            SELECT id, title, current_snapshot_id, current_job_id, created_at, updated_at
            FROM checks WHERE id = ?1
            "#,
            params![check_id],
            row_to_check,
        )
        .optional()
        .context("Failed to load check")?
        .ok_or_else(|| StoreError::CheckNotFound(check_id.to_string()))
    }

    async fn list_checks(&self) -> StoreResult<Vec<CheckRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, title, current_snapshot_id, current_job_id, created_at, updated_at
                FROM checks ORDER BY updated_at DESC
                "#,
            )
            .context("Failed to list checks")?;
        let checks = stmt
            .query_map([], row_to_check)
            .context("Failed to list checks")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list checks")?;
        Ok(checks)
    }

    async fn current(&self, check_id: &str) -> StoreResult<DocumentSnapshot> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM snapshots WHERE check_id = ?1 ORDER BY version DESC LIMIT 1",
                    SnapshotRow::COLUMNS
                ),
                params![check_id],
                SnapshotRow::from_row,
            )
            .optional()
            .context("Failed to load current snapshot")?
            .ok_or_else(|| StoreError::CheckNotFound(check_id.to_string()))?;
        Ok(row.into_snapshot()?)
    }

    async fn load(&self, snapshot_id: &str) -> StoreResult<DocumentSnapshot> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM snapshots WHERE id = ?1", SnapshotRow::COLUMNS),
                params![snapshot_id],
                SnapshotRow::from_row,
            )
            .optional()
            .context("Failed to load snapshot")?
            .ok_or_else(|| StoreError::SnapshotNotFound(snapshot_id.to_string()))?;
        Ok(row.into_snapshot()?)
    }

    async fn commit(&self, check_id: &str, draft: SnapshotDraft) -> StoreResult<DocumentSnapshot> {
        let conn = self.lock()?;
        let tx = conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        let latest: Option<(String, u32)> = tx
            .query_row(
                "SELECT id, version FROM snapshots WHERE check_id = ?1 ORDER BY version DESC LIMIT 1",
                params![check_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("Failed to read latest version")?;
        let Some((latest_id, latest)) = latest else {
            return Err(StoreError::CheckNotFound(check_id.to_string()));
        };
        if draft.parent_id.as_deref() != Some(latest_id.as_str()) {
            return Err(StoreError::StaleParent {
                check_id: check_id.to_string(),
                parent: draft.parent_id,
                current: latest_id,
            });
        }

        let snapshot = DocumentSnapshot {
            id: format!("snap_{}", Uuid::new_v4().simple()),
            check_id: check_id.to_string(),
            version: latest + 1,
            parent_id: draft.parent_id,
            reason: draft.reason,
            description: draft.description,
            document: draft.document,
            created_at: Utc::now(),
        };
        Self::insert_snapshot(&tx, &snapshot)?;
        tx.execute(
            "UPDATE checks SET current_snapshot_id = ?2, updated_at = ?3 WHERE id = ?1",
            params![check_id, snapshot.id, snapshot.created_at.to_rfc3339()],
        )
        .context("Failed to advance check")?;
        tx.commit().context("Failed to commit snapshot")?;

        tracing::info!(
            check_id = %check_id,
            snapshot_id = %snapshot.id,
            version = snapshot.version,
            reason = snapshot.reason.as_str(),
            "Snapshot committed"
        );
        Ok(snapshot)
    }

    async fn history(&self, check_id: &str) -> StoreResult<Vec<SnapshotSummary>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, version, parent_id, reason, description, created_at
                FROM snapshots WHERE check_id = ?1
                ORDER BY version DESC
                "#,
            )
            .context("Failed to list snapshots")?;
        let rows = stmt
            .query_map(params![check_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .context("Failed to list snapshots")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list snapshots")?;

        if rows.is_empty() {
            return Err(StoreError::CheckNotFound(check_id.to_string()));
        }

        rows.into_iter()
            .map(|(id, version, parent_id, reason, description, created_at)| {
                let reason = SnapshotReason::parse(&reason)
                    .with_context(|| format!("Unknown snapshot reason '{}'", reason))?;
                Ok(SnapshotSummary {
                    id,
                    version,
                    parent_id,
                    reason,
                    description,
                    created_at: parse_time(&created_at),
                })
            })
            .collect()
    }

    async fn set_current_job(&self, check_id: &str, job_id: &str) -> StoreResult<()> {
        let conn = self.lock()?;
        let affected = conn
            .execute(
                "UPDATE checks SET current_job_id = ?2, updated_at = ?3 WHERE id = ?1",
                params![check_id, job_id, Utc::now().to_rfc3339()],
            )
            .context("Failed to record current job")?;
        if affected == 0 {
            return Err(StoreError::CheckNotFound(check_id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteSnapshotStore {
        SqliteSnapshotStore::new(&CitecheckDb::open_in_memory().unwrap())
    }

    fn document() -> DocumentStructure {
        DocumentStructure::from_plain_paragraphs("Motion", &["First.".to_string()]).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_load_current() {
        let store = store();
        let created = store.create_check(document()).await.unwrap();

        assert_eq!(created.version, 1);
        assert_eq!(created.reason, SnapshotReason::Created);

        let current = store.current(&created.check_id).await.unwrap();
        assert_eq!(current, created);

        let check = store.check(&created.check_id).await.unwrap();
        assert_eq!(check.title, "Motion");
        assert_eq!(check.current_snapshot_id.as_deref(), Some(created.id.as_str()));
    }

    #[tokio::test]
    async fn test_commit_appends_versions_without_touching_parents() {
        let store = store();
        let v1 = store.create_check(document()).await.unwrap();

        let mut doc = v1.document.clone();
        doc.paragraphs[0].text = "Edited.".to_string();
        let v2 = store
            .commit(
                &v1.check_id,
                SnapshotDraft::new(&v1, SnapshotReason::ParagraphEdited, doc)
                    .with_description("edit p_001"),
            )
            .await
            .unwrap();

        assert_eq!(v2.version, 2);
        assert_eq!(v2.parent_id.as_deref(), Some(v1.id.as_str()));

        let reloaded_v1 = store.load(&v1.id).await.unwrap();
        assert_eq!(reloaded_v1.document.paragraphs[0].text, "First.");
        assert_eq!(store.current(&v1.check_id).await.unwrap().id, v2.id);

        let history = store.history(&v1.check_id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].version, 2);
        assert_eq!(history[0].description.as_deref(), Some("edit p_001"));
    }

    #[tokio::test]
    async fn test_commit_on_stale_parent_is_refused() {
        let store = store();
        let v1 = store.create_check(document()).await.unwrap();

        let mut first = v1.document.clone();
        first.paragraphs[0].text = "First writer.".to_string();
        let mut second = v1.document.clone();
        second.paragraphs[0].text = "Second writer.".to_string();

        let v2 = store
            .commit(&v1.check_id, SnapshotDraft::new(&v1, SnapshotReason::ParagraphEdited, first))
            .await
            .unwrap();
        let err = store
            .commit(&v1.check_id, SnapshotDraft::new(&v1, SnapshotReason::ParagraphEdited, second))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StaleParent { ref current, .. } if *current == v2.id));

        let current = store.current(&v1.check_id).await.unwrap();
        assert_eq!(current.id, v2.id);
        assert_eq!(current.document.paragraphs[0].text, "First writer.");
        assert_eq!(store.history(&v1.check_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_check_and_snapshot() {
        let store = store();
        assert!(matches!(
            store.current("chk_missing").await,
            Err(StoreError::CheckNotFound(_))
        ));
        assert!(matches!(
            store.load("snap_missing").await,
            Err(StoreError::SnapshotNotFound(_))
        ));
        assert!(matches!(
            store.set_current_job("chk_missing", "job").await,
            Err(StoreError::CheckNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_current_job_is_recorded() {
        let store = store();
        let v1 = store.create_check(document()).await.unwrap();
        store.set_current_job(&v1.check_id, "job_1").await.unwrap();

        let check = store.check(&v1.check_id).await.unwrap();
        assert_eq!(check.current_job_id.as_deref(), Some("job_1"));
        assert_eq!(store.list_checks().await.unwrap().len(), 1);
    }
}
