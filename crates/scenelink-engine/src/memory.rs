//! In-memory resource API backed by a [`Fixture`]
//!
//! Keeps per-method call counters and can be told to fail individual
//! methods, which makes it the workhorse of the engine's tests.

use scenelink_core::{AnnotationId, AssetId, Image360Handle, ModelHandle, NodeId, Page};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use crate::api::{
    AnnotationFilter, AnnotationRecord, ApiError, AssetMappingRecord, AssetRecord, BoxFuture,
    Image360AssetLink, MappingQuery, NodeRecord, ResourceApi,
};
use crate::fixture::Fixture;

/// Names of [`ResourceApi`] methods, used for counters and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiMethod {
    ListAssetMappings,
    ListAnnotations,
    ListNodeAncestors,
    RetrieveAssets,
    ListImage360AssetLinks,
    FindImage360Annotations,
}

impl ApiMethod {
    const ALL: [ApiMethod; 6] = [
        ApiMethod::ListAssetMappings,
        ApiMethod::ListAnnotations,
        ApiMethod::ListNodeAncestors,
        ApiMethod::RetrieveAssets,
        ApiMethod::ListImage360AssetLinks,
        ApiMethod::FindImage360Annotations,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

pub struct InMemoryResourceApi {
    fixture: Fixture,
    calls: [AtomicUsize; 6],
    failing: RwLock<HashSet<ApiMethod>>,
    latency: Mutex<Duration>,
}

impl InMemoryResourceApi {
    pub fn new(fixture: Fixture) -> Self {
        Self {
            fixture,
            calls: Default::default(),
            failing: RwLock::new(HashSet::new()),
            latency: Mutex::new(Duration::ZERO),
        }
    }

    pub fn fixture(&self) -> &Fixture {
        &self.fixture
    }

    /// Number of calls made to `method` so far
    pub fn calls(&self, method: ApiMethod) -> usize {
        self.calls[method.index()].load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        ApiMethod::ALL.iter().map(|m| self.calls(*m)).sum()
    }

    /// Make every subsequent call to `method` fail (or succeed again)
    pub async fn set_failing(&self, method: ApiMethod, failing: bool) {
        let mut set = self.failing.write().await;
        if failing {
            set.insert(method);
        } else {
            set.remove(&method);
        }
    }

    /// Simulated round-trip time of every call
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    async fn enter(&self, method: ApiMethod) -> Result<(), ApiError> {
        self.calls[method.index()].fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.failing.read().await.contains(&method) {
            debug!(method = ?method, "Injected API failure");
            return Err(ApiError::RequestFailed(format!("{:?} failed", method)));
        }
        Ok(())
    }
}

/// Cut `items` into a page starting at the offset encoded in `cursor`
fn paginate<T: Clone>(
    items: &[T],
    cursor: Option<&str>,
    limit: u32,
) -> Result<Page<T>, ApiError> {
    let start = match cursor {
        Some(c) => c
            .parse::<usize>()
            .map_err(|_| ApiError::InvalidResponse(format!("bad cursor: {}", c)))?,
        None => 0,
    };
    let limit = (limit as usize).max(1);
    let end = start.saturating_add(limit).min(items.len());
    let page = items.get(start..end).unwrap_or_default().to_vec();
    let next_cursor = (end < items.len()).then(|| end.to_string());
    Ok(Page::new(page, next_cursor))
}

impl ResourceApi for InMemoryResourceApi {
    fn list_asset_mappings(
        &self,
        model: ModelHandle,
        query: MappingQuery,
    ) -> BoxFuture<'_, Result<Page<AssetMappingRecord>, ApiError>> {
        Box::pin(async move {
            self.enter(ApiMethod::ListAssetMappings).await?;
            let fixture = self
                .fixture
                .model(model)
                .ok_or_else(|| ApiError::NotFound(format!("model {}", model)))?;
            let matching: Vec<_> = fixture
                .mappings
                .iter()
                .filter(|m| query.node_id.map_or(true, |id| m.node_id == id))
                .filter(|m| query.asset_id.map_or(true, |id| m.asset_id == id))
                .cloned()
                .collect();
            paginate(&matching, query.cursor.as_deref(), query.limit.unwrap_or(1000))
        })
    }

    fn list_annotations(
        &self,
        filter: AnnotationFilter,
        cursor: Option<String>,
        limit: u32,
    ) -> BoxFuture<'_, Result<Page<AnnotationRecord>, ApiError>> {
        Box::pin(async move {
            self.enter(ApiMethod::ListAnnotations).await?;
            let matching: Vec<_> = self
                .fixture
                .annotations
                .iter()
                .filter(|a| a.annotated_resource_type == filter.annotated_resource_type)
                .filter(|a| a.annotation_type == filter.annotation_type)
                .filter(|a| {
                    filter.annotated_resource_ids.is_empty()
                        || filter.annotated_resource_ids.contains(&a.annotated_resource_id)
                })
                .filter(|a| filter.asset_id.map_or(true, |id| a.asset_ref == Some(id)))
                .cloned()
                .collect();
            paginate(&matching, cursor.as_deref(), limit)
        })
    }

    fn list_node_ancestors(
        &self,
        model: ModelHandle,
        node_id: NodeId,
        limit: u32,
    ) -> BoxFuture<'_, Result<Vec<NodeRecord>, ApiError>> {
        Box::pin(async move {
            self.enter(ApiMethod::ListNodeAncestors).await?;
            let fixture = self
                .fixture
                .model(model)
                .ok_or_else(|| ApiError::NotFound(format!("model {}", model)))?;
            let nodes: HashMap<NodeId, &NodeRecord> =
                fixture.nodes.iter().map(|n| (n.id, n)).collect();

            let mut chain = Vec::new();
            let mut current = Some(node_id);
            while let Some(id) = current {
                let node = nodes
                    .get(&id)
                    .ok_or_else(|| ApiError::NotFound(format!("node {} in {}", id, model)))?;
                chain.push((*node).clone());
                // Guard against cycles in hand-written fixtures
                if chain.len() > nodes.len() {
                    return Err(ApiError::InvalidResponse(format!(
                        "cycle in ancestors of node {}",
                        node_id
                    )));
                }
                current = node.parent_id;
            }
            chain.reverse();
            chain.truncate(limit as usize);
            Ok(chain)
        })
    }

    fn retrieve_assets(
        &self,
        ids: Vec<AssetId>,
        ignore_unknown_ids: bool,
    ) -> BoxFuture<'_, Result<Vec<AssetRecord>, ApiError>> {
        Box::pin(async move {
            self.enter(ApiMethod::RetrieveAssets).await?;
            let mut found = Vec::with_capacity(ids.len());
            for id in ids {
                match self.fixture.assets.iter().find(|a| a.id == id) {
                    Some(asset) => found.push(asset.clone()),
                    None if ignore_unknown_ids => {}
                    None => return Err(ApiError::NotFound(format!("asset {}", id))),
                }
            }
            Ok(found)
        })
    }

    fn list_image360_asset_links(
        &self,
        site: Image360Handle,
        cursor: Option<String>,
        limit: u32,
    ) -> BoxFuture<'_, Result<Page<Image360AssetLink>, ApiError>> {
        Box::pin(async move {
            self.enter(ApiMethod::ListImage360AssetLinks).await?;
            let fixture = self
                .fixture
                .image360(&site)
                .ok_or_else(|| ApiError::NotFound(format!("360 image set {}", site)))?;
            paginate(&fixture.asset_links, cursor.as_deref(), limit)
        })
    }

    fn find_image360_annotations(
        &self,
        site: Image360Handle,
        asset_id: AssetId,
    ) -> BoxFuture<'_, Result<Vec<AnnotationId>, ApiError>> {
        Box::pin(async move {
            self.enter(ApiMethod::FindImage360Annotations).await?;
            let fixture = self
                .fixture
                .image360(&site)
                .ok_or_else(|| ApiError::NotFound(format!("360 image set {}", site)))?;
            Ok(fixture
                .asset_links
                .iter()
                .filter(|l| l.asset_id == asset_id)
                .map(|l| l.annotation_id)
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::sample::sample;

    #[test]
    fn test_paginate() {
        let items: Vec<i32> = (0..5).collect();
        let first = paginate(&items, None, 2).unwrap();
        assert_eq!(first.items, vec![0, 1]);
        assert_eq!(first.next_cursor.as_deref(), Some("2"));

        let last = paginate(&items, Some("4"), 2).unwrap();
        assert_eq!(last.items, vec![4]);
        assert!(last.is_last());

        assert!(paginate(&items, Some("x"), 2).is_err());
    }

    #[test]
    fn test_paginate_cursor_past_end() {
        let items: Vec<i32> = (0..5).collect();
        let huge = usize::MAX.to_string();
        let page = paginate(&items, Some(&huge), u32::MAX).unwrap();
        assert!(page.items.is_empty());
        assert!(page.is_last());
    }

    #[tokio::test]
    async fn test_ancestors_root_first() {
        let api = InMemoryResourceApi::new(sample());
        let chain = api
            .list_node_ancestors(ModelHandle::new(1, 10), 103, 1000)
            .await
            .unwrap();
        let ids: Vec<_> = chain.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![100, 101, 102, 103]);
        assert_eq!(api.calls(ApiMethod::ListNodeAncestors), 1);
    }

    #[tokio::test]
    async fn test_retrieve_assets_unknown_ids() {
        let api = InMemoryResourceApi::new(sample());
        let found = api.retrieve_assets(vec![901, 12345], true).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(api.retrieve_assets(vec![12345], false).await.is_err());
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let api = InMemoryResourceApi::new(sample());
        api.set_failing(ApiMethod::RetrieveAssets, true).await;
        assert!(api.retrieve_assets(vec![901], true).await.is_err());
        api.set_failing(ApiMethod::RetrieveAssets, false).await;
        assert!(api.retrieve_assets(vec![901], true).await.is_ok());
        assert_eq!(api.calls(ApiMethod::RetrieveAssets), 2);
    }

    #[tokio::test]
    async fn test_bounding_volume_listing_filters_type() {
        let api = InMemoryResourceApi::new(sample());
        let page = api
            .list_annotations(
                AnnotationFilter::bounding_volumes(ModelHandle::new(2, 20), Some(902)),
                None,
                100,
            )
            .await
            .unwrap();
        let ids: Vec<_> = page.items.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![5002]);
    }
}
