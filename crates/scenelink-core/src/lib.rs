//! Scenelink Core - Plain data types for 3D scene reconciliation
//!
//! This crate provides the types shared by the engine and the CLI:
//! - Model and 360° handles used as cache and reconciliation keys
//! - Vector, bounding-box and camera math
//! - Asset ↔ geometry mappings and their tokenized search signatures
//! - Desired scene state and style directives
//! - The shareable URL state codec

pub mod desired;
pub mod geometry;
pub mod handle;
pub mod mapping;
pub mod search;
pub mod style;
pub mod url_state;

pub use desired::{
    DesiredEntry, DesiredImage360, DesiredPointsOfInterest, DesiredSecondaryModel, EntryKey,
    PointOfInterest,
};
pub use geometry::{BoundingBox, CameraState, Transform, Vec3};
pub use handle::{AnnotationId, AssetId, Image360Handle, MappingTarget, ModelHandle, ModelKind, NodeId};
pub use mapping::{AssetNodeMapping, GeometryKey, MappingSource, Page};
pub use search::SearchSignature;
pub use style::{Appearance, Rgb, StyleDirective, StyleKind, StylePlan, StylingInputs};
pub use url_state::{UrlStateError, ViewUrlState, ViewerState};
