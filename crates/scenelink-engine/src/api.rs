//! Resource API abstraction
//!
//! The engine reads business data (asset mappings, annotations, node
//! hierarchies, assets) through [`ResourceApi`]. [`crate::http::HttpResourceApi`]
//! talks to the REST service; [`crate::memory::InMemoryResourceApi`] serves a
//! JSON fixture.

use scenelink_core::{AnnotationId, AssetId, BoundingBox, Image360Handle, ModelHandle, NodeId, Page};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Type alias for a boxed future that can be sent between threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Annotated resource type of point-cloud bounding volumes
pub const ANNOTATED_RESOURCE_3D_MODEL: &str = "threedmodel";

/// Annotation type of point-cloud bounding volumes
pub const ANNOTATION_TYPE_BOUNDING_VOLUME: &str = "pointcloud.BoundingVolume";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Server returned {status} for {url}")]
    Status { status: u16, url: String },
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Request failed: {0}")]
    RequestFailed(String),
}

/// Query parameters of an asset-mapping listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<AssetId>,
}

/// Raw CAD node ↔ asset mapping record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMappingRecord {
    pub node_id: NodeId,
    pub asset_id: AssetId,
    /// Records without a tree index cannot be styled and are skipped
    #[serde(default)]
    pub tree_index: Option<i64>,
    #[serde(default)]
    pub bounding_box: Option<BoundingBox>,
}

/// Filter of an annotation listing
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationFilter {
    pub annotated_resource_type: String,
    pub annotation_type: String,
    #[serde(default)]
    pub annotated_resource_ids: Vec<i64>,
    /// Only annotations whose asset reference equals this id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<AssetId>,
}

impl AnnotationFilter {
    /// Bounding volumes of one point-cloud model
    pub fn bounding_volumes(model: ModelHandle, asset_id: Option<AssetId>) -> Self {
        Self {
            annotated_resource_type: ANNOTATED_RESOURCE_3D_MODEL.to_string(),
            annotation_type: ANNOTATION_TYPE_BOUNDING_VOLUME.to_string(),
            annotated_resource_ids: vec![model.model_id],
            asset_id,
        }
    }
}

/// Annotation with its asset reference and region bounds, when present
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationRecord {
    pub id: AnnotationId,
    pub annotated_resource_id: i64,
    pub annotated_resource_type: String,
    pub annotation_type: String,
    #[serde(default)]
    pub asset_ref: Option<AssetId>,
    #[serde(default)]
    pub bounding_box: Option<BoundingBox>,
}

/// Node of a CAD hierarchy as returned by the ancestor listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub id: NodeId,
    pub tree_index: i64,
    #[serde(default)]
    pub parent_id: Option<NodeId>,
    pub depth: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub bounding_box: Option<BoundingBox>,
}

/// Business asset details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRecord {
    pub id: AssetId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Link between a 360° image annotation and an asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image360AssetLink {
    pub annotation_id: AnnotationId,
    pub asset_id: AssetId,
}

/// Read access to the business resource API.
///
/// Implementations must be `Send + Sync` for use across async tasks.
/// Methods return boxed futures for dyn-compatibility.
pub trait ResourceApi: Send + Sync {
    /// One page of CAD asset mappings for a model revision
    fn list_asset_mappings(
        &self,
        model: ModelHandle,
        query: MappingQuery,
    ) -> BoxFuture<'_, Result<Page<AssetMappingRecord>, ApiError>>;

    /// One page of annotations matching `filter`
    fn list_annotations(
        &self,
        filter: AnnotationFilter,
        cursor: Option<String>,
        limit: u32,
    ) -> BoxFuture<'_, Result<Page<AnnotationRecord>, ApiError>>;

    /// Ancestor chain of a node, root first, including the node itself
    fn list_node_ancestors(
        &self,
        model: ModelHandle,
        node_id: NodeId,
        limit: u32,
    ) -> BoxFuture<'_, Result<Vec<NodeRecord>, ApiError>>;

    /// Batched asset retrieval.
    ///
    /// With `ignore_unknown_ids` set, ids that do not exist are left out of the
    /// result instead of failing the request.
    fn retrieve_assets(
        &self,
        ids: Vec<AssetId>,
        ignore_unknown_ids: bool,
    ) -> BoxFuture<'_, Result<Vec<AssetRecord>, ApiError>>;

    /// One page of the asset links of a 360° image collection
    fn list_image360_asset_links(
        &self,
        site: Image360Handle,
        cursor: Option<String>,
        limit: u32,
    ) -> BoxFuture<'_, Result<Page<Image360AssetLink>, ApiError>>;

    /// Image annotations of a 360° collection that reference `asset_id`
    fn find_image360_annotations(
        &self,
        site: Image360Handle,
        asset_id: AssetId,
    ) -> BoxFuture<'_, Result<Vec<AnnotationId>, ApiError>>;
}
