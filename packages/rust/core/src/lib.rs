//! Core orchestration for sitekb.
//!
//! This crate ties together crawling, chunking, embedding, indexing, and
//! retrieval into end-to-end workflows:
//! - [`pipeline`]: the ingestion pipeline building a KB from a seed URL
//! - [`retrieval`]: similarity search over an ingested KB
//! - [`KnowledgeService`]: the facade callers interact with

pub mod pipeline;
pub mod retrieval;

use std::sync::Arc;

use url::Url;

use sitekb_shared::{
    AppConfig, ChunkConfig, CrawlConfig, KbId, KnowledgeBaseEntry, Result, RetrievedChunk,
};
use sitekb_storage::StateStore;
use sitekb_vector::{Embedder, IndexManager, VectorIndexService};

pub use pipeline::{IngestPipeline, IngestReport, ProgressReporter, SilentProgress};
pub use retrieval::{NO_CONTEXT_MESSAGE, RetrievalEngine};

/// Facade over ingestion, retrieval, and lifecycle operations.
pub struct KnowledgeService {
    store: Arc<StateStore>,
    pipeline: IngestPipeline,
    retrieval: RetrievalEngine,
    default_top_k: usize,
}

impl KnowledgeService {
    pub fn new(
        store: Arc<StateStore>,
        embedder: Arc<dyn Embedder>,
        vector: Arc<dyn VectorIndexService>,
        config: &AppConfig,
    ) -> Self {
        let index = Arc::new(IndexManager::new(vector, config.index.upsert_batch_size));

        let pipeline = IngestPipeline::new(
            store.clone(),
            embedder.clone(),
            index.clone(),
            CrawlConfig::from(config),
            ChunkConfig::from(config),
        );
        let retrieval = RetrievalEngine::new(
            store.clone(),
            embedder,
            index,
            config.retrieval.top_k,
            config.retrieval.max_context_chars,
        );

        Self {
            store,
            pipeline,
            retrieval,
            default_top_k: config.retrieval.top_k,
        }
    }

    /// Build a knowledge base from `url`, running the pipeline to
    /// completion.
    pub async fn submit(
        &self,
        url: &Url,
        progress: &dyn ProgressReporter,
    ) -> Result<IngestReport> {
        self.pipeline.submit(url, progress).await
    }

    /// Similarity search; `top_k` falls back to the configured default.
    pub async fn query(
        &self,
        kb_id: &KbId,
        text: &str,
        top_k: Option<usize>,
    ) -> Vec<RetrievedChunk> {
        self.retrieval
            .query(kb_id, text, top_k.unwrap_or(self.default_top_k))
            .await
    }

    /// Similarity search rendered as a bounded context string.
    pub async fn query_context(&self, kb_id: &KbId, text: &str) -> String {
        self.retrieval.query_context(kb_id, text).await
    }

    /// Current lifecycle entry for a knowledge base.
    pub async fn get_status(&self, kb_id: &KbId) -> Result<Option<KnowledgeBaseEntry>> {
        self.store.get_entry(kb_id).await
    }

    /// All knowledge bases, newest first.
    pub async fn list(&self) -> Result<Vec<KnowledgeBaseEntry>> {
        self.store.list_entries().await
    }

    /// Delete a knowledge base entry and its chunks. Vector resources
    /// are left behind; re-ingesting the same site reuses them.
    pub async fn delete(&self, kb_id: &KbId) -> Result<bool> {
        self.store.delete_entry(kb_id).await
    }
}
