//! Capability surface of the 3D rendering engine
//!
//! The engine never renders anything itself. Everything it does to the scene
//! goes through [`Viewer`]: loading and unloading models and 360° image
//! sets, styling geometry, picking and camera control.

use scenelink_core::{
    AnnotationId, Appearance, BoundingBox, CameraState, Image360Handle, MappingTarget,
    ModelHandle, ModelKind, NodeId, Transform, Vec3,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::BoxFuture;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ViewerError {
    #[error("The selected 3D model {0} is not supported and can not be loaded")]
    UnsupportedModel(ModelHandle),
    #[error("The selected 360 image set {0} is not supported")]
    UnsupportedImage360(Image360Handle),
    #[error("Model {0} is not loaded")]
    ModelNotLoaded(ModelHandle),
    #[error("360 image set {0} is not loaded")]
    Image360NotLoaded(Image360Handle),
    #[error("Node {node_id} not found in model {model}")]
    NodeNotFound { model: ModelHandle, node_id: NodeId },
    #[error("Tree index {tree_index} not found in model {model}")]
    TreeIndexNotFound { model: ModelHandle, tree_index: i64 },
    #[error("Station {station} not found in 360 image set {site}")]
    StationNotFound { site: Image360Handle, station: String },
    #[error("Load failed: {0}")]
    LoadFailed(String),
}

/// A model added to the scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedModel {
    pub handle: ModelHandle,
    pub kind: ModelKind,
}

impl LoadedModel {
    pub fn new(handle: ModelHandle, kind: ModelKind) -> Self {
        Self { handle, kind }
    }

    pub fn target(&self) -> MappingTarget {
        MappingTarget::for_model(self.handle, self.kind)
    }
}

/// A 360° image station: the camera position an image was captured from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image360Station {
    pub id: String,
    pub position: Vec3,
}

/// Pixel position in the viewer canvas
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

impl ScreenPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &ScreenPoint) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Screen projection of a world position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    pub screen: ScreenPoint,
    pub distance_to_camera: f64,
}

/// Geometry hit by a raycast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Intersection {
    #[serde(rename_all = "camelCase")]
    Cad {
        model: ModelHandle,
        tree_index: i64,
        point: Vec3,
    },
    #[serde(rename_all = "camelCase")]
    PointCloud {
        model: ModelHandle,
        #[serde(default)]
        annotation_id: Option<AnnotationId>,
        point: Vec3,
    },
}

impl Intersection {
    pub fn point(&self) -> Vec3 {
        match self {
            Self::Cad { point, .. } | Self::PointCloud { point, .. } => *point,
        }
    }
}

/// Operations the engine needs from the 3D rendering engine.
///
/// Styling follows a collection model: `assign_*` calls add a styled
/// collection on top of the target's default appearance, and
/// `remove_all_styled` drops every collection of a target.
pub trait Viewer: Send + Sync {
    fn load_model(&self, handle: ModelHandle) -> BoxFuture<'_, Result<LoadedModel, ViewerError>>;

    fn unload_model(&self, handle: ModelHandle) -> BoxFuture<'_, Result<(), ViewerError>>;

    /// Load a 360° image set, placed by `transform`, and return its
    /// stations in model space
    fn load_image360(
        &self,
        site: Image360Handle,
        transform: Option<Transform>,
    ) -> BoxFuture<'_, Result<Vec<Image360Station>, ViewerError>>;

    fn unload_image360(&self, site: Image360Handle) -> BoxFuture<'_, Result<(), ViewerError>>;

    fn enter_image360_station(
        &self,
        site: Image360Handle,
        station_id: String,
    ) -> BoxFuture<'_, Result<(), ViewerError>>;

    /// Leave 360° mode; a no-op when no station is entered
    fn exit_image360(&self) -> BoxFuture<'_, Result<(), ViewerError>>;

    /// Site and station id the camera currently sits in
    fn entered_station(&self) -> Option<(Image360Handle, String)>;

    fn set_default_appearance(
        &self,
        target: MappingTarget,
        appearance: Appearance,
    ) -> BoxFuture<'_, Result<(), ViewerError>>;

    /// Style the CAD nodes with the given tree indices
    fn assign_node_appearance(
        &self,
        model: ModelHandle,
        tree_indices: Vec<i64>,
        appearance: Appearance,
    ) -> BoxFuture<'_, Result<(), ViewerError>>;

    /// Style every CAD node except the given tree indices
    fn assign_inverted_node_appearance(
        &self,
        model: ModelHandle,
        tree_indices: Vec<i64>,
        appearance: Appearance,
    ) -> BoxFuture<'_, Result<(), ViewerError>>;

    /// Style point-cloud bounding volumes or 360° image annotations
    fn assign_annotation_appearance(
        &self,
        target: MappingTarget,
        annotation_ids: Vec<AnnotationId>,
        appearance: Appearance,
    ) -> BoxFuture<'_, Result<(), ViewerError>>;

    fn remove_all_styled(&self, target: MappingTarget) -> BoxFuture<'_, Result<(), ViewerError>>;

    fn node_bounding_box(
        &self,
        model: ModelHandle,
        node_id: NodeId,
    ) -> BoxFuture<'_, Result<BoundingBox, ViewerError>>;

    fn tree_index_to_node_id(
        &self,
        model: ModelHandle,
        tree_index: i64,
    ) -> BoxFuture<'_, Result<NodeId, ViewerError>>;

    fn raycast(&self, point: ScreenPoint) -> BoxFuture<'_, Option<Intersection>>;

    /// Project a world position to the canvas; `None` when behind the camera
    fn project(&self, world: Vec3) -> Option<Projection>;

    fn camera(&self) -> CameraState;

    fn set_camera(&self, camera: CameraState);

    fn fit_camera(&self, bbox: BoundingBox, duration_ms: u64, radius_factor: f64);
}
