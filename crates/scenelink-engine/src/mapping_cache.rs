//! Paginated, memoized asset ↔ geometry mappings
//!
//! CAD asset-mapping records, point-cloud bounding volumes and 360° asset
//! links are normalized into [`AssetNodeMapping`]s. Every page is cached
//! under `(target, params)`, so a hit never issues another request until the
//! target is invalidated.

use futures_util::stream::{self, Stream};
use scenelink_core::mapping::{dedup_by_asset, dedup_by_geometry};
use scenelink_core::{
    AnnotationId, AssetId, AssetNodeMapping, BoundingBox, Image360Handle, MappingSource,
    MappingTarget, ModelHandle, NodeId, Page, SearchSignature,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::api::{AnnotationFilter, ApiError, MappingQuery, NodeRecord, ResourceApi};
use crate::config::MappingsConfig;

#[derive(Error, Debug)]
pub enum MappingError {
    #[error("API error: {0}")]
    ApiError(#[from] ApiError),
    #[error("{operation} is not available for {target}")]
    UnsupportedTarget {
        operation: &'static str,
        target: MappingTarget,
    },
}

/// Query parameters of a mapping listing; part of the cache key
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MappingParams {
    pub cursor: Option<String>,
    /// Page size; the configured page limit when unset
    pub limit: Option<u32>,
    /// Only mappings of this CAD node
    pub node_id: Option<NodeId>,
    /// Only mappings to this asset
    pub asset_id: Option<AssetId>,
}

impl MappingParams {
    pub fn for_asset(asset_id: AssetId) -> Self {
        Self {
            asset_id: Some(asset_id),
            ..Default::default()
        }
    }

    /// Single-mapping lookup for one node
    pub fn for_node(node_id: NodeId) -> Self {
        Self {
            node_id: Some(node_id),
            limit: Some(1),
            ..Default::default()
        }
    }

    pub fn with_cursor(&self, cursor: Option<String>) -> Self {
        Self {
            cursor,
            ..self.clone()
        }
    }
}

/// A CAD node that belongs to a styled collection
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionNode {
    pub node_id: NodeId,
    pub tree_index: i64,
    pub bounding_box: Option<BoundingBox>,
}

/// Set of CAD nodes mapped to one asset (or to any asset)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeCollection {
    nodes: Vec<CollectionNode>,
}

impl NodeCollection {
    pub fn from_mappings(mappings: &[AssetNodeMapping]) -> Self {
        let mut seen = HashSet::new();
        let nodes = mappings
            .iter()
            .filter_map(|m| match &m.source {
                MappingSource::Node {
                    node_id,
                    tree_index,
                    bounding_box,
                } => Some(CollectionNode {
                    node_id: *node_id,
                    tree_index: *tree_index,
                    bounding_box: *bounding_box,
                }),
                MappingSource::Annotation { .. } => None,
            })
            .filter(|n| seen.insert(n.tree_index))
            .collect();
        Self { nodes }
    }

    pub fn nodes(&self) -> &[CollectionNode] {
        &self.nodes
    }

    pub fn tree_indices(&self) -> Vec<i64> {
        self.nodes.iter().map(|n| n.tree_index).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

#[derive(Default)]
struct CacheState {
    pages: HashMap<(MappingTarget, MappingParams), Page<AssetNodeMapping>>,
    collections: HashMap<(ModelHandle, Option<AssetId>), Arc<NodeCollection>>,
    ancestors: HashMap<(ModelHandle, NodeId), Arc<Vec<NodeRecord>>>,
    image_annotations: HashMap<(Image360Handle, AssetId), Arc<Vec<AnnotationId>>>,
}

pub struct GeometryMappingCache {
    api: Arc<dyn ResourceApi>,
    config: MappingsConfig,
    state: RwLock<CacheState>,
}

impl GeometryMappingCache {
    pub fn new(api: Arc<dyn ResourceApi>, config: MappingsConfig) -> Self {
        Self {
            api,
            config,
            state: RwLock::new(CacheState::default()),
        }
    }

    pub fn api(&self) -> &Arc<dyn ResourceApi> {
        &self.api
    }

    /// One page of mappings for `target`
    pub async fn get_mappings(
        &self,
        target: &MappingTarget,
        params: &MappingParams,
    ) -> Result<Page<AssetNodeMapping>, MappingError> {
        let key = (target.clone(), params.clone());
        if let Some(page) = self.state.read().await.pages.get(&key) {
            return Ok(page.clone());
        }

        let page = self.fetch_page(target, params).await?;
        debug!(
            resource = %target,
            items = page.items.len(),
            last = page.is_last(),
            "Fetched mapping page"
        );
        self.state.write().await.pages.insert(key, page.clone());
        Ok(page)
    }

    /// Drain every page starting at `params.cursor`.
    ///
    /// The result keeps server order and holds each piece of geometry once.
    /// Any failed page fails the whole call.
    pub async fn get_all(
        &self,
        target: &MappingTarget,
        params: &MappingParams,
    ) -> Result<Vec<AssetNodeMapping>, MappingError> {
        let mut all = Vec::new();
        let mut cursor = params.cursor.clone();
        loop {
            let page = self.get_mappings(target, &params.with_cursor(cursor)).await?;
            all.extend(page.items);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(dedup_by_geometry(all))
    }

    /// Incremental variant of [`get_all`](Self::get_all) for progressively rendered lists
    pub fn pages<'a>(
        &'a self,
        target: MappingTarget,
        params: MappingParams,
    ) -> impl Stream<Item = Result<Page<AssetNodeMapping>, MappingError>> + 'a {
        let start = Some(params.cursor.clone());
        stream::try_unfold(start, move |state: Option<Option<String>>| {
            let target = target.clone();
            let params = params.clone();
            async move {
                match state {
                    None => Ok(None),
                    Some(cursor) => {
                        let page = self.get_mappings(&target, &params.with_cursor(cursor)).await?;
                        let next = page.next_cursor.clone().map(Some);
                        Ok::<_, MappingError>(Some((page, next)))
                    }
                }
            }
        })
    }

    /// One mapping per asset, in server order
    pub async fn list_assets(
        &self,
        target: &MappingTarget,
    ) -> Result<Vec<AssetNodeMapping>, MappingError> {
        let all = self.get_all(target, &MappingParams::default()).await?;
        Ok(dedup_by_asset(&all))
    }

    /// Assets whose name or description match every token of `query`
    pub async fn search(
        &self,
        target: &MappingTarget,
        query: &str,
    ) -> Result<Vec<AssetNodeMapping>, MappingError> {
        let query = SearchSignature::new(query);
        let assets = self.list_assets(target).await?;
        Ok(assets.into_iter().filter(|m| m.matches(&query)).collect())
    }

    /// CAD nodes mapped to `asset_id`, or to any asset when `None`
    pub async fn node_collection(
        &self,
        model: ModelHandle,
        asset_id: Option<AssetId>,
    ) -> Result<Arc<NodeCollection>, MappingError> {
        let key = (model, asset_id);
        if let Some(collection) = self.state.read().await.collections.get(&key) {
            return Ok(collection.clone());
        }

        let params = MappingParams {
            asset_id,
            ..Default::default()
        };
        let mappings = self.get_all(&MappingTarget::Cad(model), &params).await?;
        let collection = Arc::new(NodeCollection::from_mappings(&mappings));
        debug!(
            model = %model,
            asset = ?asset_id,
            nodes = collection.len(),
            "Computed node collection"
        );
        self.state
            .write()
            .await
            .collections
            .insert(key, collection.clone());
        Ok(collection)
    }

    /// Mappings of a single CAD node (at most one)
    pub async fn mappings_for_node(
        &self,
        model: ModelHandle,
        node_id: NodeId,
    ) -> Result<Vec<AssetNodeMapping>, MappingError> {
        let page = self
            .get_mappings(&MappingTarget::Cad(model), &MappingParams::for_node(node_id))
            .await?;
        Ok(page.items)
    }

    /// Ancestor chain of a node, root first, bounded by the configured limit
    pub async fn ancestors(
        &self,
        model: ModelHandle,
        node_id: NodeId,
    ) -> Result<Arc<Vec<NodeRecord>>, MappingError> {
        let key = (model, node_id);
        if let Some(chain) = self.state.read().await.ancestors.get(&key) {
            return Ok(chain.clone());
        }

        let chain = Arc::new(
            self.api
                .list_node_ancestors(model, node_id, self.config.ancestor_limit)
                .await?,
        );
        self.state.write().await.ancestors.insert(key, chain.clone());
        Ok(chain)
    }

    /// 360° image annotations that reference `asset_id`
    pub async fn image360_annotations(
        &self,
        site: &Image360Handle,
        asset_id: AssetId,
    ) -> Result<Arc<Vec<AnnotationId>>, MappingError> {
        let key = (site.clone(), asset_id);
        if let Some(ids) = self.state.read().await.image_annotations.get(&key) {
            return Ok(ids.clone());
        }

        let ids = Arc::new(
            self.api
                .find_image360_annotations(site.clone(), asset_id)
                .await?,
        );
        self.state
            .write()
            .await
            .image_annotations
            .insert(key, ids.clone());
        Ok(ids)
    }

    /// Whether the asset still exists
    pub async fn asset_exists(&self, asset_id: AssetId) -> Result<bool, MappingError> {
        let found = self.api.retrieve_assets(vec![asset_id], true).await?;
        Ok(found.iter().any(|a| a.id == asset_id))
    }

    /// Drop everything cached for `target`
    pub async fn invalidate(&self, target: &MappingTarget) {
        let mut state = self.state.write().await;
        state.pages.retain(|(t, _), _| t != target);
        match target {
            MappingTarget::Cad(model) | MappingTarget::PointCloud(model) => {
                state.collections.retain(|(m, _), _| m != model);
                state.ancestors.retain(|(m, _), _| m != model);
            }
            MappingTarget::Image360(site) => {
                state.image_annotations.retain(|(s, _), _| s != site);
            }
        }
        info!(resource = %target, "Invalidated mapping cache");
    }

    pub async fn invalidate_all(&self) {
        *self.state.write().await = CacheState::default();
        info!("Invalidated all mapping caches");
    }

    async fn fetch_page(
        &self,
        target: &MappingTarget,
        params: &MappingParams,
    ) -> Result<Page<AssetNodeMapping>, MappingError> {
        let limit = params.limit.unwrap_or(self.config.page_limit);

        let (sources, next_cursor) = match target {
            MappingTarget::Cad(model) => {
                let query = MappingQuery {
                    cursor: params.cursor.clone(),
                    limit: Some(limit),
                    node_id: params.node_id,
                    asset_id: params.asset_id,
                };
                let page = self.api.list_asset_mappings(*model, query).await?;
                let sources: Vec<_> = page
                    .items
                    .into_iter()
                    .filter_map(|r| {
                        let tree_index = r.tree_index?;
                        Some((
                            MappingSource::Node {
                                node_id: r.node_id,
                                tree_index,
                                bounding_box: r.bounding_box,
                            },
                            r.asset_id,
                        ))
                    })
                    .collect();
                (sources, page.next_cursor)
            }
            MappingTarget::PointCloud(model) => {
                if params.node_id.is_some() {
                    return Err(MappingError::UnsupportedTarget {
                        operation: "node lookup",
                        target: target.clone(),
                    });
                }
                let filter = AnnotationFilter::bounding_volumes(*model, params.asset_id);
                let page = self
                    .api
                    .list_annotations(filter, params.cursor.clone(), limit)
                    .await?;
                let sources: Vec<_> = page
                    .items
                    .into_iter()
                    .filter_map(|a| {
                        let asset_id = a.asset_ref?;
                        Some((
                            MappingSource::Annotation {
                                annotation_id: a.id,
                                bounding_box: a.bounding_box,
                            },
                            asset_id,
                        ))
                    })
                    .collect();
                (sources, page.next_cursor)
            }
            MappingTarget::Image360(site) => {
                if params.node_id.is_some() {
                    return Err(MappingError::UnsupportedTarget {
                        operation: "node lookup",
                        target: target.clone(),
                    });
                }
                let page = self
                    .api
                    .list_image360_asset_links(site.clone(), params.cursor.clone(), limit)
                    .await?;
                let sources: Vec<_> = page
                    .items
                    .into_iter()
                    .filter(|l| params.asset_id.map_or(true, |id| l.asset_id == id))
                    .map(|l| {
                        (
                            MappingSource::Annotation {
                                annotation_id: l.annotation_id,
                                bounding_box: None,
                            },
                            l.asset_id,
                        )
                    })
                    .collect();
                (sources, page.next_cursor)
            }
        };

        let items = self.resolve_assets(sources).await?;
        Ok(Page::new(dedup_by_geometry(items), next_cursor))
    }

    /// Attach asset names and descriptions in one batched request.
    ///
    /// Sources pointing at assets that no longer exist are dropped.
    async fn resolve_assets(
        &self,
        sources: Vec<(MappingSource, AssetId)>,
    ) -> Result<Vec<AssetNodeMapping>, MappingError> {
        let mut seen = HashSet::new();
        let ids: Vec<AssetId> = sources
            .iter()
            .map(|(_, id)| *id)
            .filter(|id| seen.insert(*id))
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let assets: HashMap<_, _> = self
            .api
            .retrieve_assets(ids, true)
            .await?
            .into_iter()
            .map(|a| (a.id, a))
            .collect();

        let total = sources.len();
        let items: Vec<_> = sources
            .into_iter()
            .filter_map(|(source, asset_id)| {
                let asset = assets.get(&asset_id)?;
                Some(AssetNodeMapping::new(
                    source,
                    asset_id,
                    asset.name.clone(),
                    asset.description.clone(),
                ))
            })
            .collect();
        if items.len() < total {
            debug!(dropped = total - items.len(), "Dropped mappings to unknown assets");
        }
        Ok(items)
    }
}
