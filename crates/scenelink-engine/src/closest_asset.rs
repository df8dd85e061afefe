//! Nearest mapped ancestor lookup for clicked CAD nodes

use scenelink_core::{AssetId, ModelHandle, NodeId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::mapping_cache::{GeometryMappingCache, MappingError};

/// Resolves a clicked node to the asset of its nearest mapped ancestor.
///
/// CAD hierarchies often leave leaf nodes unmapped while an enclosing
/// assembly is mapped. The walk starts at the clicked node and moves toward
/// the root, skipping the depth-0 root itself; the first mapped node wins.
pub struct ClosestAssetResolver {
    cache: Arc<GeometryMappingCache>,
    resolved: RwLock<HashMap<(ModelHandle, NodeId), Option<AssetId>>>,
}

impl ClosestAssetResolver {
    pub fn new(cache: Arc<GeometryMappingCache>) -> Self {
        Self {
            cache,
            resolved: RwLock::new(HashMap::new()),
        }
    }

    /// Asset of the nearest mapped ancestor; `None` when nothing is mapped or a fetch fails
    pub async fn resolve(&self, model: ModelHandle, node_id: NodeId) -> Option<AssetId> {
        if let Some(hit) = self.resolved.read().await.get(&(model, node_id)) {
            return *hit;
        }

        match self.walk(model, node_id).await {
            Ok(asset_id) => {
                debug!(model = %model, node = node_id, asset = ?asset_id, "Resolved closest asset");
                self.resolved
                    .write()
                    .await
                    .insert((model, node_id), asset_id);
                asset_id
            }
            Err(e) => {
                warn!(model = %model, node = node_id, error = %e, "Closest asset lookup failed");
                None
            }
        }
    }

    /// Forget memoized results for `model`
    pub async fn invalidate(&self, model: ModelHandle) {
        self.resolved.write().await.retain(|(m, _), _| *m != model);
    }

    async fn walk(&self, model: ModelHandle, node_id: NodeId) -> Result<Option<AssetId>, MappingError> {
        let ancestors = self.cache.ancestors(model, node_id).await?;

        for ancestor in ancestors.iter().rev().filter(|n| n.depth != 0) {
            let mappings = self.cache.mappings_for_node(model, ancestor.id).await?;
            if let Some(mapping) = mappings.first() {
                return Ok(Some(mapping.asset_id));
            }
        }
        Ok(None)
    }
}
