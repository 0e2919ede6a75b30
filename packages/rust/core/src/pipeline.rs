//! End-to-end ingestion pipeline: URL → crawl → chunk → embed → index.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, instrument, warn};
use url::Url;

use sitekb_crawler::Crawler;
use sitekb_shared::{
    ChunkConfig, ChunkRecord, CrawlConfig, Datapoint, KbId, KbStatus, KnowledgeBaseEntry, Result,
    SiteKbError,
};
use sitekb_storage::StateStore;
use sitekb_vector::{Embedder, IndexManager};

/// Result of a completed ingestion run.
#[derive(Debug, Clone)]
pub struct IngestReport {
    /// Identifier of the knowledge base that was built.
    pub kb_id: KbId,
    /// Pages fetched by the crawl.
    pub pages: usize,
    /// Chunks embedded and upserted.
    pub chunks: usize,
    /// Total elapsed time.
    pub elapsed: std::time::Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when the pipeline completes.
    fn done(&self, report: &IngestReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn done(&self, _report: &IngestReport) {}
}

/// Builds knowledge bases from seed URLs.
///
/// All collaborators are injected, so tests run the full pipeline against
/// a mock site, the deterministic embedder, and the in-memory vector
/// backend.
pub struct IngestPipeline {
    store: Arc<StateStore>,
    embedder: Arc<dyn Embedder>,
    index: Arc<IndexManager>,
    crawl: CrawlConfig,
    chunking: ChunkConfig,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<StateStore>,
        embedder: Arc<dyn Embedder>,
        index: Arc<IndexManager>,
        crawl: CrawlConfig,
        chunking: ChunkConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            index,
            crawl,
            chunking,
        }
    }

    /// Ingest `url` into a new knowledge base.
    ///
    /// A lifecycle entry is created up front; any pipeline-level failure
    /// moves it to `Failed` with the captured message before the error is
    /// returned to the caller.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn submit(
        &self,
        url: &Url,
        progress: &dyn ProgressReporter,
    ) -> Result<IngestReport> {
        let kb_id = KbId::derive(url);
        let now = chrono::Utc::now();

        self.store
            .create_entry(&KnowledgeBaseEntry {
                kb_id: kb_id.clone(),
                url: url.to_string(),
                status: KbStatus::Queued,
                indexed_pages: 0,
                total_pages: 0,
                error_message: None,
                created_at: now,
                updated_at: now,
                metadata: None,
            })
            .await?;

        info!(%kb_id, "starting ingestion");

        match self.run(&kb_id, url, progress).await {
            Ok(report) => {
                progress.done(&report);
                info!(
                    %kb_id,
                    pages = report.pages,
                    chunks = report.chunks,
                    elapsed_ms = report.elapsed.as_millis(),
                    "ingestion complete"
                );
                Ok(report)
            }
            Err(e) => {
                self.record_status(&kb_id, KbStatus::Failed, Some(&e.to_string()))
                    .await;
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        kb_id: &KbId,
        url: &Url,
        progress: &dyn ProgressReporter,
    ) -> Result<IngestReport> {
        let start = Instant::now();

        // --- Phase 1: Crawl ---
        progress.phase("Crawling site");
        self.record_status(kb_id, KbStatus::Crawling, None).await;

        let crawler = Crawler::new(self.crawl.clone())?;
        let (summary, pages) = crawler.crawl(url).await?;

        if pages.is_empty() {
            return Err(SiteKbError::validation(format!(
                "no valid content found at {url}"
            )));
        }

        self.record_counts(kb_id, pages.len() as u32, pages.len() as u32)
            .await;

        // --- Phase 2: Chunk ---
        progress.phase("Chunking pages");
        self.record_status(kb_id, KbStatus::Indexing, None).await;

        let chunks: Vec<ChunkRecord> = pages
            .iter()
            .flat_map(|page| sitekb_chunker::chunk_page(page, kb_id, &self.chunking))
            .collect();

        if chunks.is_empty() {
            // Pages existed but produced no chunk text. The KB goes
            // active with nothing indexed rather than failing.
            warn!(%kb_id, "crawl produced pages but no chunks");
            self.record_status(kb_id, KbStatus::Active, None).await;
            return Ok(IngestReport {
                kb_id: kb_id.clone(),
                pages: pages.len(),
                chunks: 0,
                elapsed: start.elapsed(),
            });
        }

        // --- Phase 3: Embed ---
        progress.phase("Generating embeddings");
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;

        let datapoints: Vec<Datapoint> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| Datapoint {
                id: chunk.id.clone(),
                vector,
            })
            .collect();

        // --- Phase 4: Provision & upsert ---
        progress.phase("Provisioning vector index");
        let provisioned = self
            .index
            .provision(kb_id, self.embedder.dimension())
            .await?;

        progress.phase("Upserting datapoints");
        self.index
            .upsert(&provisioned.index.name, &datapoints)
            .await?;

        // Chunk metadata feeds query-time resolution; losing it degrades
        // retrieval but the index itself is already populated.
        if let Err(e) = self.store.put_chunks(&chunks).await {
            warn!(%kb_id, error = %e, "failed to persist chunk metadata");
        }

        let metadata = serde_json::json!({
            "index": provisioned.index.name,
            "endpoint": provisioned.endpoint_name,
            "deployed_index_id": provisioned.deployed_index_id,
            "crawl_errors": summary.errors.len(),
        });
        if let Err(e) = self.store.update_metadata(kb_id, &metadata).await {
            warn!(%kb_id, error = %e, "failed to store kb metadata");
        }

        self.record_status(kb_id, KbStatus::Active, None).await;

        Ok(IngestReport {
            kb_id: kb_id.clone(),
            pages: pages.len(),
            chunks: chunks.len(),
            elapsed: start.elapsed(),
        })
    }

    /// Best-effort status write. Lifecycle bookkeeping never aborts an
    /// ingestion that is otherwise making progress.
    async fn record_status(&self, kb_id: &KbId, status: KbStatus, message: Option<&str>) {
        if let Err(e) = self.store.set_status(kb_id, status, message).await {
            warn!(%kb_id, %status, error = %e, "failed to update kb status");
        }
    }

    /// Best-effort page counter write.
    async fn record_counts(&self, kb_id: &KbId, indexed: u32, total: u32) {
        if let Err(e) = self.store.update_page_counts(kb_id, indexed, total).await {
            warn!(%kb_id, error = %e, "failed to update page counts");
        }
    }
}
