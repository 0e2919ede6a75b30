//! libSQL state store for sitekb.
//!
//! [`StateStore`] tracks knowledge base lifecycle records and the chunk
//! metadata needed to turn neighbor ids back into text at query time.
//! Status changes go through the lifecycle guard: the store rejects any
//! transition [`KbStatus::can_transition_to`] disallows.

mod migrations;

use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, params, params_from_iter};

use sitekb_shared::{ChunkRecord, KbId, KbStatus, KnowledgeBaseEntry, Result, SiteKbError};

/// Primary storage handle wrapping a libSQL database.
pub struct StateStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl StateStore {
    /// Open or create a database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SiteKbError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| SiteKbError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| SiteKbError::Storage(e.to_string()))?;

        let store = Self { db, conn };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    SiteKbError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // KB operations
    // -----------------------------------------------------------------------

    /// Insert a new knowledge base record.
    pub async fn create_entry(&self, entry: &KnowledgeBaseEntry) -> Result<()> {
        let metadata_json = entry
            .metadata
            .as_ref()
            .map(|m| m.to_string());

        self.conn
            .execute(
                "INSERT INTO kb (kb_id, url, status, indexed_pages, total_pages, error_message, created_at, updated_at, metadata_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    entry.kb_id.as_str(),
                    entry.url.as_str(),
                    entry.status.as_str(),
                    entry.indexed_pages as i64,
                    entry.total_pages as i64,
                    entry.error_message.as_deref(),
                    entry.created_at.to_rfc3339(),
                    entry.updated_at.to_rfc3339(),
                    metadata_json.as_deref(),
                ],
            )
            .await
            .map_err(|e| SiteKbError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Get a knowledge base entry by id.
    pub async fn get_entry(&self, kb_id: &KbId) -> Result<Option<KnowledgeBaseEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT kb_id, url, status, indexed_pages, total_pages, error_message, created_at, updated_at, metadata_json
                 FROM kb WHERE kb_id = ?1",
                params![kb_id.as_str()],
            )
            .await
            .map_err(|e| SiteKbError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_entry(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(SiteKbError::Storage(e.to_string())),
        }
    }

    /// List all knowledge bases, newest first.
    pub async fn list_entries(&self) -> Result<Vec<KnowledgeBaseEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT kb_id, url, status, indexed_pages, total_pages, error_message, created_at, updated_at, metadata_json
                 FROM kb ORDER BY created_at DESC",
                params![],
            )
            .await
            .map_err(|e| SiteKbError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => results.push(row_to_entry(&row)?),
                Ok(None) => break,
                Err(e) => return Err(SiteKbError::Storage(e.to_string())),
            }
        }
        Ok(results)
    }

    /// Move a knowledge base to `status`, enforcing the lifecycle guard.
    ///
    /// `error_message` is stored alongside (used for `Failed`) and cleared
    /// otherwise.
    pub async fn set_status(
        &self,
        kb_id: &KbId,
        status: KbStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let current = self
            .get_entry(kb_id)
            .await?
            .ok_or_else(|| SiteKbError::Storage(format!("unknown knowledge base: {kb_id}")))?;

        if !current.status.can_transition_to(status) {
            return Err(SiteKbError::InvalidTransition {
                from: current.status,
                to: status,
            });
        }

        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE kb SET status = ?1, error_message = ?2, updated_at = ?3 WHERE kb_id = ?4",
                params![
                    status.as_str(),
                    error_message,
                    now.as_str(),
                    kb_id.as_str()
                ],
            )
            .await
            .map_err(|e| SiteKbError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Update page counters for a knowledge base.
    pub async fn update_page_counts(
        &self,
        kb_id: &KbId,
        indexed_pages: u32,
        total_pages: u32,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE kb SET indexed_pages = ?1, total_pages = ?2, updated_at = ?3 WHERE kb_id = ?4",
                params![
                    indexed_pages as i64,
                    total_pages as i64,
                    now.as_str(),
                    kb_id.as_str()
                ],
            )
            .await
            .map_err(|e| SiteKbError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Replace the metadata blob for a knowledge base.
    pub async fn update_metadata(&self, kb_id: &KbId, metadata: &serde_json::Value) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE kb SET metadata_json = ?1, updated_at = ?2 WHERE kb_id = ?3",
                params![metadata.to_string(), now.as_str(), kb_id.as_str()],
            )
            .await
            .map_err(|e| SiteKbError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Delete a knowledge base and its chunks. Returns whether an entry
    /// existed.
    pub async fn delete_entry(&self, kb_id: &KbId) -> Result<bool> {
        self.conn
            .execute(
                "DELETE FROM chunks WHERE kb_id = ?1",
                params![kb_id.as_str()],
            )
            .await
            .map_err(|e| SiteKbError::Storage(e.to_string()))?;

        let affected = self
            .conn
            .execute("DELETE FROM kb WHERE kb_id = ?1", params![kb_id.as_str()])
            .await
            .map_err(|e| SiteKbError::Storage(e.to_string()))?;

        Ok(affected > 0)
    }

    // -----------------------------------------------------------------------
    // Chunk operations
    // -----------------------------------------------------------------------

    /// Upsert chunk records (insert or overwrite on `kb_id + id`).
    pub async fn put_chunks(&self, chunks: &[ChunkRecord]) -> Result<()> {
        for chunk in chunks {
            self.conn
                .execute(
                    "INSERT INTO chunks (id, kb_id, content, source_url, title)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(kb_id, id) DO UPDATE SET
                       content = excluded.content,
                       source_url = excluded.source_url,
                       title = excluded.title",
                    params![
                        chunk.id.as_str(),
                        chunk.kb_id.as_str(),
                        chunk.content.as_str(),
                        chunk.source_url.as_str(),
                        chunk.title.as_str()
                    ],
                )
                .await
                .map_err(|e| SiteKbError::Storage(e.to_string()))?;
        }
        Ok(())
    }

    /// Fetch chunks by id. Ids with no stored chunk are silently omitted;
    /// callers decide whether missing ids are worth reporting.
    pub async fn get_chunks_by_ids(
        &self,
        kb_id: &KbId,
        ids: &[String],
    ) -> Result<Vec<ChunkRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders: Vec<String> = (2..ids.len() + 2).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "SELECT id, kb_id, content, source_url, title FROM chunks
             WHERE kb_id = ?1 AND id IN ({})",
            placeholders.join(", ")
        );

        let values = std::iter::once(kb_id.as_str().to_string()).chain(ids.iter().cloned());
        let mut rows = self
            .conn
            .query(&sql, params_from_iter(values))
            .await
            .map_err(|e| SiteKbError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => results.push(row_to_chunk(&row)?),
                Ok(None) => break,
                Err(e) => return Err(SiteKbError::Storage(e.to_string())),
            }
        }
        Ok(results)
    }

    /// Number of chunks stored for a knowledge base.
    pub async fn count_chunks(&self, kb_id: &KbId) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM chunks WHERE kb_id = ?1",
                params![kb_id.as_str()],
            )
            .await
            .map_err(|e| SiteKbError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => row
                .get::<u64>(0)
                .map_err(|e| SiteKbError::Storage(e.to_string())),
            Ok(None) => Ok(0),
            Err(e) => Err(SiteKbError::Storage(e.to_string())),
        }
    }
}

/// Convert a database row to a [`KnowledgeBaseEntry`].
fn row_to_entry(row: &libsql::Row) -> Result<KnowledgeBaseEntry> {
    let status_str: String = row
        .get(2)
        .map_err(|e| SiteKbError::Storage(e.to_string()))?;
    let status: KbStatus = status_str
        .parse()
        .map_err(|e: String| SiteKbError::Storage(e))?;

    let metadata = match row.get::<String>(8) {
        Ok(json) => Some(
            serde_json::from_str(&json)
                .map_err(|e| SiteKbError::Storage(format!("invalid metadata: {e}")))?,
        ),
        Err(_) => None,
    };

    Ok(KnowledgeBaseEntry {
        kb_id: KbId(
            row.get::<String>(0)
                .map_err(|e| SiteKbError::Storage(e.to_string()))?,
        ),
        url: row
            .get::<String>(1)
            .map_err(|e| SiteKbError::Storage(e.to_string()))?,
        status,
        indexed_pages: row.get::<i64>(3).unwrap_or(0) as u32,
        total_pages: row.get::<i64>(4).unwrap_or(0) as u32,
        error_message: row.get::<String>(5).ok(),
        created_at: parse_timestamp(row, 6)?,
        updated_at: parse_timestamp(row, 7)?,
        metadata,
    })
}

fn parse_timestamp(row: &libsql::Row, index: i32) -> Result<chrono::DateTime<chrono::Utc>> {
    let s: String = row
        .get(index)
        .map_err(|e| SiteKbError::Storage(e.to_string()))?;
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| SiteKbError::Storage(format!("invalid date: {e}")))
}

/// Convert a database row to a [`ChunkRecord`].
fn row_to_chunk(row: &libsql::Row) -> Result<ChunkRecord> {
    Ok(ChunkRecord {
        id: row
            .get::<String>(0)
            .map_err(|e| SiteKbError::Storage(e.to_string()))?,
        kb_id: KbId(
            row.get::<String>(1)
                .map_err(|e| SiteKbError::Storage(e.to_string()))?,
        ),
        content: row
            .get::<String>(2)
            .map_err(|e| SiteKbError::Storage(e.to_string()))?,
        source_url: row
            .get::<String>(3)
            .map_err(|e| SiteKbError::Storage(e.to_string()))?,
        title: row
            .get::<String>(4)
            .map_err(|e| SiteKbError::Storage(e.to_string()))?,
    })
}
