//! Vector index provisioning and upsert.
//!
//! [`VectorIndexService`] mirrors the surface of a managed ANN provider:
//! indexes and endpoints are looked up by display name, indexes are
//! deployed to endpoints under a deployed-index id, and datapoints are
//! upserted to an index. [`IndexManager`] layers the sitekb naming scheme
//! and idempotent provisioning on top of whichever service backs it.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use sitekb_shared::{Datapoint, KbId, Neighbor, Result, SiteKbError};

// ---------------------------------------------------------------------------
// Service trait
// ---------------------------------------------------------------------------

/// A vector index known to the backing service.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHandle {
    /// Display name the index was created under.
    pub name: String,
    /// Vector dimension the index was created with.
    pub dimension: usize,
}

/// The fully provisioned resources for one knowledge base.
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub index: IndexHandle,
    pub endpoint_name: String,
    pub deployed_index_id: String,
}

/// Backend-agnostic ANN provider operations.
///
/// Implementations must treat "create" on an existing resource as
/// success returning the existing resource; provisioning leans on that
/// to stay idempotent under races.
#[async_trait]
pub trait VectorIndexService: Send + Sync {
    /// Look up an index by display name.
    async fn find_index(&self, display_name: &str) -> Result<Option<IndexHandle>>;

    /// Create an index, or return the existing one with that name.
    async fn create_index(&self, display_name: &str, dimension: usize) -> Result<IndexHandle>;

    /// Look up an endpoint by display name.
    async fn find_endpoint(&self, display_name: &str) -> Result<Option<String>>;

    /// Create an endpoint, or return the existing one with that name.
    async fn create_endpoint(&self, display_name: &str) -> Result<String>;

    /// Ids of indexes currently deployed to an endpoint.
    async fn deployed_index_ids(&self, endpoint_name: &str) -> Result<Vec<String>>;

    /// Deploy an index to an endpoint. Long-running on real providers;
    /// callers must not re-issue on timeout.
    async fn deploy_index(
        &self,
        endpoint_name: &str,
        index_name: &str,
        deployed_index_id: &str,
    ) -> Result<()>;

    /// Upsert datapoints into an index.
    async fn upsert_datapoints(&self, index_name: &str, datapoints: &[Datapoint]) -> Result<()>;

    /// Nearest neighbors of `query` in a deployed index.
    async fn find_neighbors(
        &self,
        endpoint_name: &str,
        deployed_index_id: &str,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<Neighbor>>;
}

// ---------------------------------------------------------------------------
// IndexManager
// ---------------------------------------------------------------------------

/// Derives resource names from KB ids and keeps provisioning idempotent.
pub struct IndexManager {
    service: Arc<dyn VectorIndexService>,
    upsert_batch_size: usize,
}

impl IndexManager {
    pub fn new(service: Arc<dyn VectorIndexService>, upsert_batch_size: usize) -> Self {
        Self {
            service,
            upsert_batch_size,
        }
    }

    /// Display name of the index for a knowledge base.
    pub fn index_display_name(kb_id: &KbId) -> String {
        format!("{}-index", kb_id.as_str().replace('_', "-").to_lowercase())
    }

    /// Display name of the endpoint for a knowledge base.
    pub fn endpoint_display_name(kb_id: &KbId) -> String {
        format!("{}-endpoint", kb_id.as_str().replace('_', "-").to_lowercase())
    }

    /// Deployed-index id for a knowledge base.
    pub fn deployed_index_id(kb_id: &KbId) -> String {
        format!("deployed_{}", kb_id.as_str().to_lowercase())
    }

    /// Ensure index, endpoint, and deployment exist for `kb_id`.
    ///
    /// Every step reuses an existing resource when one is found, so the
    /// call is safe to repeat. An existing index whose dimension differs
    /// from `dimension` is unusable and reported as a fatal error rather
    /// than recreated.
    pub async fn provision(&self, kb_id: &KbId, dimension: usize) -> Result<Provisioned> {
        let index_name = Self::index_display_name(kb_id);
        let endpoint_name = Self::endpoint_display_name(kb_id);
        let deployed_id = Self::deployed_index_id(kb_id);

        let index = match self.service.find_index(&index_name).await? {
            Some(existing) => {
                debug!(index = %index_name, "reusing existing index");
                existing
            }
            None => {
                info!(index = %index_name, dimension, "creating index");
                self.service.create_index(&index_name, dimension).await?
            }
        };

        if index.dimension != dimension {
            return Err(SiteKbError::Index(format!(
                "index {index_name} has dimension {}, embedder produces {dimension}",
                index.dimension
            )));
        }

        let endpoint_name = match self.service.find_endpoint(&endpoint_name).await? {
            Some(existing) => {
                debug!(endpoint = %existing, "reusing existing endpoint");
                existing
            }
            None => {
                info!(endpoint = %endpoint_name, "creating endpoint");
                self.service.create_endpoint(&endpoint_name).await?
            }
        };

        let deployed = self.service.deployed_index_ids(&endpoint_name).await?;
        if deployed.iter().any(|id| id == &deployed_id) {
            debug!(deployed_index_id = %deployed_id, "index already deployed");
        } else {
            // Deployment can take minutes on managed providers. A timeout
            // here means "still in progress", so it is never re-issued.
            info!(deployed_index_id = %deployed_id, "deploying index to endpoint");
            self.service
                .deploy_index(&endpoint_name, &index.name, &deployed_id)
                .await?;
        }

        Ok(Provisioned {
            index,
            endpoint_name,
            deployed_index_id: deployed_id,
        })
    }

    /// Locate already provisioned resources for `kb_id` without creating
    /// anything. `None` when the endpoint or deployment is missing.
    pub async fn lookup(&self, kb_id: &KbId) -> Result<Option<Provisioned>> {
        let index_name = Self::index_display_name(kb_id);
        let endpoint_name = Self::endpoint_display_name(kb_id);
        let deployed_id = Self::deployed_index_id(kb_id);

        let Some(index) = self.service.find_index(&index_name).await? else {
            return Ok(None);
        };
        let Some(endpoint_name) = self.service.find_endpoint(&endpoint_name).await? else {
            return Ok(None);
        };
        let deployed = self.service.deployed_index_ids(&endpoint_name).await?;
        if !deployed.iter().any(|id| id == &deployed_id) {
            return Ok(None);
        }

        Ok(Some(Provisioned {
            index,
            endpoint_name,
            deployed_index_id: deployed_id,
        }))
    }

    /// Upsert datapoints in sequential batches of `upsert_batch_size`.
    pub async fn upsert(&self, index_name: &str, datapoints: &[Datapoint]) -> Result<()> {
        let total = datapoints.len();
        let mut sent = 0;

        for batch in datapoints.chunks(self.upsert_batch_size.max(1)) {
            self.service.upsert_datapoints(index_name, batch).await?;
            sent += batch.len();
            info!(sent, total, index = %index_name, "upserted datapoint batch");
        }

        Ok(())
    }

    /// Nearest neighbors of `query` in the deployed index.
    pub async fn find_neighbors(
        &self,
        provisioned: &Provisioned,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<Neighbor>> {
        self.service
            .find_neighbors(
                &provisioned.endpoint_name,
                &provisioned.deployed_index_id,
                query,
                top_k,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Service wrapper that counts calls, for asserting idempotence and
    /// batch splitting.
    struct CountingService<S> {
        inner: S,
        creates: Mutex<(usize, usize, usize)>,
        upsert_calls: Mutex<Vec<usize>>,
    }

    impl<S> CountingService<S> {
        fn new(inner: S) -> Self {
            Self {
                inner,
                creates: Mutex::new((0, 0, 0)),
                upsert_calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl<S: VectorIndexService> VectorIndexService for CountingService<S> {
        async fn find_index(&self, display_name: &str) -> Result<Option<IndexHandle>> {
            self.inner.find_index(display_name).await
        }

        async fn create_index(&self, display_name: &str, dimension: usize) -> Result<IndexHandle> {
            self.creates.lock().unwrap().0 += 1;
            self.inner.create_index(display_name, dimension).await
        }

        async fn find_endpoint(&self, display_name: &str) -> Result<Option<String>> {
            self.inner.find_endpoint(display_name).await
        }

        async fn create_endpoint(&self, display_name: &str) -> Result<String> {
            self.creates.lock().unwrap().1 += 1;
            self.inner.create_endpoint(display_name).await
        }

        async fn deployed_index_ids(&self, endpoint_name: &str) -> Result<Vec<String>> {
            self.inner.deployed_index_ids(endpoint_name).await
        }

        async fn deploy_index(
            &self,
            endpoint_name: &str,
            index_name: &str,
            deployed_index_id: &str,
        ) -> Result<()> {
            self.creates.lock().unwrap().2 += 1;
            self.inner
                .deploy_index(endpoint_name, index_name, deployed_index_id)
                .await
        }

        async fn upsert_datapoints(
            &self,
            index_name: &str,
            datapoints: &[Datapoint],
        ) -> Result<()> {
            self.upsert_calls.lock().unwrap().push(datapoints.len());
            self.inner.upsert_datapoints(index_name, datapoints).await
        }

        async fn find_neighbors(
            &self,
            endpoint_name: &str,
            deployed_index_id: &str,
            query: &[f32],
            top_k: usize,
        ) -> Result<Vec<Neighbor>> {
            self.inner
                .find_neighbors(endpoint_name, deployed_index_id, query, top_k)
                .await
        }
    }

    fn kb_id() -> KbId {
        KbId("kb_Example_com_123".into())
    }

    #[test]
    fn resource_names_are_deterministic() {
        let id = kb_id();
        assert_eq!(
            IndexManager::index_display_name(&id),
            "kb-example-com-123-index"
        );
        assert_eq!(
            IndexManager::endpoint_display_name(&id),
            "kb-example-com-123-endpoint"
        );
        assert_eq!(
            IndexManager::deployed_index_id(&id),
            "deployed_kb_example_com_123"
        );
    }

    #[tokio::test]
    async fn provision_twice_creates_each_resource_once() {
        let service = Arc::new(CountingService::new(
            crate::local::LocalVectorService::in_memory(),
        ));
        let manager = IndexManager::new(service.clone(), 1000);

        let first = manager.provision(&kb_id(), 8).await.unwrap();
        let second = manager.provision(&kb_id(), 8).await.unwrap();

        assert_eq!(first.index, second.index);
        assert_eq!(first.endpoint_name, second.endpoint_name);
        assert_eq!(first.deployed_index_id, second.deployed_index_id);

        let (indexes, endpoints, deploys) = *service.creates.lock().unwrap();
        assert_eq!((indexes, endpoints, deploys), (1, 1, 1));
    }

    #[tokio::test]
    async fn provision_rejects_dimension_mismatch() {
        let service = Arc::new(crate::local::LocalVectorService::in_memory());
        let manager = IndexManager::new(service, 1000);

        manager.provision(&kb_id(), 8).await.unwrap();
        let err = manager.provision(&kb_id(), 16).await.unwrap_err();
        assert!(matches!(err, SiteKbError::Index(_)));
        assert!(err.to_string().contains("dimension"));
    }

    #[tokio::test]
    async fn upsert_splits_into_batches() {
        let service = Arc::new(CountingService::new(
            crate::local::LocalVectorService::in_memory(),
        ));
        let manager = IndexManager::new(service.clone(), 1000);

        let provisioned = manager.provision(&kb_id(), 2).await.unwrap();
        let datapoints: Vec<Datapoint> = (0..2500)
            .map(|i| Datapoint {
                id: format!("c{i}"),
                vector: vec![1.0, 0.0],
            })
            .collect();

        manager
            .upsert(&provisioned.index.name, &datapoints)
            .await
            .unwrap();

        let calls = service.upsert_calls.lock().unwrap().clone();
        assert_eq!(calls, vec![1000, 1000, 500]);
    }

    #[tokio::test]
    async fn lookup_finds_only_provisioned_kbs() {
        let service = Arc::new(crate::local::LocalVectorService::in_memory());
        let manager = IndexManager::new(service, 1000);

        assert!(manager.lookup(&kb_id()).await.unwrap().is_none());

        manager.provision(&kb_id(), 4).await.unwrap();
        let found = manager.lookup(&kb_id()).await.unwrap();
        assert!(found.is_some());
    }
}
