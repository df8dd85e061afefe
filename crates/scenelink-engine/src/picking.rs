//! Click → asset resolution

use scenelink_core::{AssetId, MappingTarget, ModelHandle};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::closest_asset::ClosestAssetResolver;
use crate::mapping_cache::{GeometryMappingCache, MappingParams};
use crate::viewer::{Intersection, ScreenPoint, Viewer};

/// Asset found under the pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PickedAsset {
    pub target_model: ModelHandle,
    pub asset_id: AssetId,
}

pub struct AssetPicker {
    viewer: Arc<dyn Viewer>,
    cache: Arc<GeometryMappingCache>,
    resolver: Arc<ClosestAssetResolver>,
}

impl AssetPicker {
    pub fn new(
        viewer: Arc<dyn Viewer>,
        cache: Arc<GeometryMappingCache>,
        resolver: Arc<ClosestAssetResolver>,
    ) -> Self {
        Self {
            viewer,
            cache,
            resolver,
        }
    }

    /// Raycast at `point` and resolve the hit to an existing asset.
    ///
    /// Misses, unmapped geometry, deleted assets and lookup failures all
    /// yield `None`.
    pub async fn pick(&self, point: ScreenPoint) -> Option<PickedAsset> {
        let hit = self.viewer.raycast(point).await?;
        let (model, asset_id) = match hit {
            Intersection::Cad {
                model, tree_index, ..
            } => {
                let node_id = match self.viewer.tree_index_to_node_id(model, tree_index).await {
                    Ok(id) => id,
                    Err(e) => {
                        warn!(model = %model, tree_index, error = %e, "Picked node lookup failed");
                        return None;
                    }
                };
                (model, self.resolver.resolve(model, node_id).await?)
            }
            Intersection::PointCloud {
                model,
                annotation_id,
                ..
            } => (model, self.annotation_asset(model, annotation_id?).await?),
        };

        match self.cache.asset_exists(asset_id).await {
            Ok(true) => {
                debug!(model = %model, asset = asset_id, "Picked asset");
                Some(PickedAsset {
                    target_model: model,
                    asset_id,
                })
            }
            Ok(false) => {
                debug!(asset = asset_id, "Picked asset no longer exists");
                None
            }
            Err(e) => {
                warn!(asset = asset_id, error = %e, "Asset existence check failed");
                None
            }
        }
    }

    async fn annotation_asset(&self, model: ModelHandle, annotation_id: i64) -> Option<AssetId> {
        let target = MappingTarget::PointCloud(model);
        match self.cache.get_all(&target, &MappingParams::default()).await {
            Ok(mappings) => mappings
                .iter()
                .find(|m| m.source.annotation_id() == Some(annotation_id))
                .map(|m| m.asset_id),
            Err(e) => {
                warn!(model = %model, error = %e, "Point cloud mapping lookup failed");
                None
            }
        }
    }
}
