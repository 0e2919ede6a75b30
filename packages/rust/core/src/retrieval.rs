//! Query-time retrieval: embed the query, search the index, resolve
//! chunk ids back to text, and optionally assemble a bounded context
//! string for downstream consumers.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use sitekb_shared::{KbId, RetrievedChunk};
use sitekb_storage::StateStore;
use sitekb_vector::{Embedder, IndexManager};

/// Returned when a query resolves nothing.
pub const NO_CONTEXT_MESSAGE: &str =
    "No relevant context information found in the knowledge base.";

/// Separator between context blocks.
const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Similarity search over an ingested knowledge base.
pub struct RetrievalEngine {
    store: Arc<StateStore>,
    embedder: Arc<dyn Embedder>,
    index: Arc<IndexManager>,
    top_k: usize,
    max_context_chars: usize,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<StateStore>,
        embedder: Arc<dyn Embedder>,
        index: Arc<IndexManager>,
        top_k: usize,
        max_context_chars: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            index,
            top_k,
            max_context_chars,
        }
    }

    /// Retrieve the `top_k` most similar chunks for `text`.
    ///
    /// This never fails: a missing or unprovisioned knowledge base and
    /// any internal error all degrade to an empty result, with the cause
    /// logged. Callers render "nothing found" either way.
    pub async fn query(&self, kb_id: &KbId, text: &str, top_k: usize) -> Vec<RetrievedChunk> {
        match self.try_query(kb_id, text, top_k).await {
            Ok(results) => results,
            Err(e) => {
                warn!(%kb_id, error = %e, "query failed, returning no results");
                Vec::new()
            }
        }
    }

    async fn try_query(
        &self,
        kb_id: &KbId,
        text: &str,
        top_k: usize,
    ) -> sitekb_shared::Result<Vec<RetrievedChunk>> {
        let Some(provisioned) = self.index.lookup(kb_id).await? else {
            debug!(%kb_id, "no vector resources for kb");
            return Ok(Vec::new());
        };

        let vector = self.embedder.embed_one(text).await?;
        let neighbors = self.index.find_neighbors(&provisioned, &vector, top_k).await?;
        if neighbors.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = neighbors.iter().map(|n| n.chunk_id.clone()).collect();
        let chunks = self.store.get_chunks_by_ids(kb_id, &ids).await?;
        if chunks.len() < ids.len() {
            // Neighbor ids with no stored chunk are dropped; the index
            // and the chunk store have drifted apart.
            warn!(
                %kb_id,
                missing = ids.len() - chunks.len(),
                "neighbor ids missing from chunk store"
            );
        }

        let by_id: HashMap<&str, &sitekb_shared::ChunkRecord> =
            chunks.iter().map(|c| (c.id.as_str(), c)).collect();

        // Preserve neighbor order: nearest first.
        Ok(neighbors
            .iter()
            .filter_map(|n| {
                by_id.get(n.chunk_id.as_str()).map(|chunk| RetrievedChunk {
                    content: chunk.content.clone(),
                    source_url: chunk.source_url.clone(),
                    title: chunk.title.clone(),
                    distance: n.distance,
                })
            })
            .collect())
    }

    /// Retrieve and assemble a context string bounded by the configured
    /// char budget, for handing to an answering model.
    pub async fn query_context(&self, kb_id: &KbId, text: &str) -> String {
        let results = self.query(kb_id, text, self.top_k).await;
        if results.is_empty() {
            return NO_CONTEXT_MESSAGE.to_string();
        }

        let mut blocks: Vec<String> = Vec::new();
        let mut used = 0;

        for result in &results {
            let block = format!("Source: {}\nContent: {}", result.source_url, result.content);
            let cost = block.chars().count()
                + if blocks.is_empty() {
                    0
                } else {
                    CONTEXT_SEPARATOR.len()
                };

            if used + cost > self.max_context_chars {
                if blocks.is_empty() {
                    // Even the best chunk overflows the budget; truncate
                    // it rather than answering with nothing.
                    blocks.push(block.chars().take(self.max_context_chars).collect());
                }
                break;
            }

            used += cost;
            blocks.push(block);
        }

        blocks.join(CONTEXT_SEPARATOR)
    }
}
