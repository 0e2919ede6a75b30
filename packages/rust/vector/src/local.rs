//! In-process vector index backend.
//!
//! Implements [`VectorIndexService`] with an exact cosine-distance scan
//! over flat vectors. Good for offline mode, tests, and the modest index
//! sizes a single crawled site produces. State can optionally be
//! persisted as JSON so the CLI survives restarts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use sitekb_shared::{Datapoint, Neighbor, Result, SiteKbError};

use crate::index::{IndexHandle, VectorIndexService};

#[derive(Debug, Default, Serialize, Deserialize)]
struct LocalIndex {
    dimension: usize,
    points: HashMap<String, Vec<f32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Deployment {
    deployed_index_id: String,
    index_name: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct State {
    indexes: HashMap<String, LocalIndex>,
    endpoints: HashMap<String, Vec<Deployment>>,
}

/// Exact-scan vector service backed by in-memory maps.
pub struct LocalVectorService {
    state: Arc<Mutex<State>>,
    persist_path: Option<PathBuf>,
}

impl LocalVectorService {
    /// Purely in-memory service, used by tests and ephemeral runs.
    pub fn in_memory() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            persist_path: None,
        }
    }

    /// Service persisted as JSON at `path`, loading existing state.
    pub fn with_persistence(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let state = if path.exists() {
            let content =
                std::fs::read_to_string(&path).map_err(|e| SiteKbError::io(&path, e))?;
            serde_json::from_str(&content).map_err(|e| {
                SiteKbError::Index(format!("corrupt vector state at {}: {e}", path.display()))
            })?
        } else {
            State::default()
        };

        Ok(Self {
            state: Arc::new(Mutex::new(state)),
            persist_path: Some(path),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| SiteKbError::Index("vector state lock poisoned".into()))
    }

    /// Write the current state to disk when persistence is configured.
    fn persist(&self) -> Result<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };

        let json = {
            let state = self.lock()?;
            serde_json::to_string(&*state)
                .map_err(|e| SiteKbError::Index(format!("serialize vector state: {e}")))?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SiteKbError::io(parent, e))?;
        }
        std::fs::write(path, json).map_err(|e| SiteKbError::io(path, e))?;
        Ok(())
    }
}

/// Cosine distance in `[0, 2]`; zero-norm vectors are maximally distant.
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorIndexService for LocalVectorService {
    async fn find_index(&self, display_name: &str) -> Result<Option<IndexHandle>> {
        let state = self.lock()?;
        Ok(state.indexes.get(display_name).map(|idx| IndexHandle {
            name: display_name.to_string(),
            dimension: idx.dimension,
        }))
    }

    async fn create_index(&self, display_name: &str, dimension: usize) -> Result<IndexHandle> {
        let handle = {
            let mut state = self.lock()?;
            let index = state
                .indexes
                .entry(display_name.to_string())
                .or_insert_with(|| LocalIndex {
                    dimension,
                    points: HashMap::new(),
                });
            // Existing index wins; the caller validates its dimension.
            IndexHandle {
                name: display_name.to_string(),
                dimension: index.dimension,
            }
        };
        self.persist()?;
        Ok(handle)
    }

    async fn find_endpoint(&self, display_name: &str) -> Result<Option<String>> {
        let state = self.lock()?;
        Ok(state
            .endpoints
            .contains_key(display_name)
            .then(|| display_name.to_string()))
    }

    async fn create_endpoint(&self, display_name: &str) -> Result<String> {
        {
            let mut state = self.lock()?;
            state.endpoints.entry(display_name.to_string()).or_default();
        }
        self.persist()?;
        Ok(display_name.to_string())
    }

    async fn deployed_index_ids(&self, endpoint_name: &str) -> Result<Vec<String>> {
        let state = self.lock()?;
        let deployments = state.endpoints.get(endpoint_name).ok_or_else(|| {
            SiteKbError::Index(format!("unknown endpoint: {endpoint_name}"))
        })?;
        Ok(deployments
            .iter()
            .map(|d| d.deployed_index_id.clone())
            .collect())
    }

    async fn deploy_index(
        &self,
        endpoint_name: &str,
        index_name: &str,
        deployed_index_id: &str,
    ) -> Result<()> {
        {
            let mut state = self.lock()?;
            if !state.indexes.contains_key(index_name) {
                return Err(SiteKbError::Index(format!("unknown index: {index_name}")));
            }
            let deployments = state.endpoints.get_mut(endpoint_name).ok_or_else(|| {
                SiteKbError::Index(format!("unknown endpoint: {endpoint_name}"))
            })?;
            if !deployments
                .iter()
                .any(|d| d.deployed_index_id == deployed_index_id)
            {
                deployments.push(Deployment {
                    deployed_index_id: deployed_index_id.to_string(),
                    index_name: index_name.to_string(),
                });
            }
        }
        self.persist()?;
        Ok(())
    }

    async fn upsert_datapoints(&self, index_name: &str, datapoints: &[Datapoint]) -> Result<()> {
        let state = self.state.clone();
        let index_name = index_name.to_string();
        let datapoints = datapoints.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut state = state
                .lock()
                .map_err(|_| SiteKbError::Index("vector state lock poisoned".into()))?;
            let index = state.indexes.get_mut(&index_name).ok_or_else(|| {
                SiteKbError::Index(format!("unknown index: {index_name}"))
            })?;

            for point in datapoints {
                if point.vector.len() != index.dimension {
                    return Err(SiteKbError::Index(format!(
                        "datapoint {} has dimension {}, index expects {}",
                        point.id,
                        point.vector.len(),
                        index.dimension
                    )));
                }
                index.points.insert(point.id, point.vector);
            }
            Ok(())
        })
        .await
        .map_err(|e| SiteKbError::Index(format!("upsert task failed: {e}")))??;

        self.persist()
    }

    async fn find_neighbors(
        &self,
        endpoint_name: &str,
        deployed_index_id: &str,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<Neighbor>> {
        let state = self.state.clone();
        let endpoint_name = endpoint_name.to_string();
        let deployed_index_id = deployed_index_id.to_string();
        let query = query.to_vec();

        // Exact scans are CPU-bound, so they run off the async executor.
        tokio::task::spawn_blocking(move || {
            let state = state
                .lock()
                .map_err(|_| SiteKbError::Index("vector state lock poisoned".into()))?;

            let deployments = state.endpoints.get(&endpoint_name).ok_or_else(|| {
                SiteKbError::Index(format!("unknown endpoint: {endpoint_name}"))
            })?;
            let deployment = deployments
                .iter()
                .find(|d| d.deployed_index_id == deployed_index_id)
                .ok_or_else(|| {
                    SiteKbError::Index(format!("not deployed: {deployed_index_id}"))
                })?;
            let index = state.indexes.get(&deployment.index_name).ok_or_else(|| {
                SiteKbError::Index(format!("unknown index: {}", deployment.index_name))
            })?;

            if query.len() != index.dimension {
                return Err(SiteKbError::Index(format!(
                    "query has dimension {}, index expects {}",
                    query.len(),
                    index.dimension
                )));
            }

            let mut distances: Vec<Neighbor> = index
                .points
                .iter()
                .map(|(id, vector)| Neighbor {
                    chunk_id: id.clone(),
                    distance: cosine_distance(&query, vector),
                })
                .collect();

            distances.sort_by(|a, b| {
                a.distance
                    .partial_cmp(&b.distance)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            distances.truncate(top_k);

            debug!(
                neighbors = distances.len(),
                scanned = index.points.len(),
                "exact neighbor scan"
            );
            Ok(distances)
        })
        .await
        .map_err(|e| SiteKbError::Index(format!("search task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn provisioned_service() -> LocalVectorService {
        let service = LocalVectorService::in_memory();
        service.create_index("test-index", 4).await.unwrap();
        service.create_endpoint("test-endpoint").await.unwrap();
        service
            .deploy_index("test-endpoint", "test-index", "deployed_test")
            .await
            .unwrap();
        service
    }

    #[test]
    fn cosine_distance_basics() {
        assert!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
        // Zero vectors are maximally distant, not NaN.
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }

    #[tokio::test]
    async fn nearest_neighbor_wins() {
        let service = provisioned_service().await;

        service
            .upsert_datapoints(
                "test-index",
                &[
                    Datapoint {
                        id: "c1".into(),
                        vector: vec![1.0, 0.0, 0.0, 0.0],
                    },
                    Datapoint {
                        id: "c2".into(),
                        vector: vec![0.0, 1.0, 0.0, 0.0],
                    },
                    Datapoint {
                        id: "c3".into(),
                        vector: vec![0.0, 0.0, 1.0, 0.0],
                    },
                ],
            )
            .await
            .unwrap();

        let neighbors = service
            .find_neighbors("test-endpoint", "deployed_test", &[0.9, 0.1, 0.0, 0.0], 2)
            .await
            .unwrap();

        assert_eq!(neighbors.len(), 2);
        assert_eq!(neighbors[0].chunk_id, "c1");
        assert!(neighbors[0].distance < neighbors[1].distance);
    }

    #[tokio::test]
    async fn upsert_overwrites_existing_ids() {
        let service = provisioned_service().await;

        let point = |v: Vec<f32>| Datapoint {
            id: "c1".into(),
            vector: v,
        };
        service
            .upsert_datapoints("test-index", &[point(vec![1.0, 0.0, 0.0, 0.0])])
            .await
            .unwrap();
        service
            .upsert_datapoints("test-index", &[point(vec![0.0, 1.0, 0.0, 0.0])])
            .await
            .unwrap();

        let neighbors = service
            .find_neighbors("test-endpoint", "deployed_test", &[0.0, 1.0, 0.0, 0.0], 10)
            .await
            .unwrap();
        assert_eq!(neighbors.len(), 1);
        assert!(neighbors[0].distance.abs() < 1e-6);
    }

    #[tokio::test]
    async fn rejects_mismatched_dimensions() {
        let service = provisioned_service().await;

        let err = service
            .upsert_datapoints(
                "test-index",
                &[Datapoint {
                    id: "bad".into(),
                    vector: vec![1.0, 0.0],
                }],
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("dimension"));

        let err = service
            .find_neighbors("test-endpoint", "deployed_test", &[1.0], 5)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("dimension"));
    }

    #[tokio::test]
    async fn unknown_resources_are_errors() {
        let service = LocalVectorService::in_memory();

        assert!(service.find_index("nope").await.unwrap().is_none());
        assert!(service.find_endpoint("nope").await.unwrap().is_none());
        assert!(
            service
                .find_neighbors("nope", "deployed_x", &[1.0], 5)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn token_overlap_ranks_matching_chunk_first() {
        use crate::embedding::{Embedder, HashEmbedder};

        let embedder = HashEmbedder::new(64);
        let service = LocalVectorService::in_memory();
        service.create_index("kb-index", 64).await.unwrap();
        service.create_endpoint("kb-endpoint").await.unwrap();
        service
            .deploy_index("kb-endpoint", "kb-index", "deployed_kb")
            .await
            .unwrap();

        let texts = [
            ("c1", "our blue suede shoes are handmade"),
            ("c2", "orders arrive within five business days"),
            ("c3", "returns are accepted for thirty days"),
        ];
        for (id, text) in texts {
            let vector = embedder.embed_one(text).await.unwrap();
            service
                .upsert_datapoints(
                    "kb-index",
                    &[Datapoint {
                        id: id.into(),
                        vector,
                    }],
                )
                .await
                .unwrap();
        }

        let query = embedder.embed_one("blue shoes").await.unwrap();
        let neighbors = service
            .find_neighbors("kb-endpoint", "deployed_kb", &query, 3)
            .await
            .unwrap();

        assert_eq!(neighbors[0].chunk_id, "c1");
    }

    #[tokio::test]
    async fn state_survives_reload() {
        let dir = std::env::temp_dir().join(format!(
            "sitekb_vector_test_{}_{}",
            std::process::id(),
            unique_suffix()
        ));
        let path = dir.join("vectors.json");

        {
            let service = LocalVectorService::with_persistence(&path).unwrap();
            service.create_index("test-index", 2).await.unwrap();
            service.create_endpoint("test-endpoint").await.unwrap();
            service
                .deploy_index("test-endpoint", "test-index", "deployed_test")
                .await
                .unwrap();
            service
                .upsert_datapoints(
                    "test-index",
                    &[Datapoint {
                        id: "c1".into(),
                        vector: vec![1.0, 0.0],
                    }],
                )
                .await
                .unwrap();
        }

        let reloaded = LocalVectorService::with_persistence(&path).unwrap();
        let neighbors = reloaded
            .find_neighbors("test-endpoint", "deployed_test", &[1.0, 0.0], 1)
            .await
            .unwrap();
        assert_eq!(neighbors[0].chunk_id, "c1");

        let _ = std::fs::remove_dir_all(&dir);
    }

    fn unique_suffix() -> u128 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0)
    }
}
