//! Scenelink Engine - Keeps a 3D viewer in sync with declarative view state
//!
//! This crate provides:
//! - A paginated, memoized asset ↔ geometry mapping cache
//! - Nearest-mapped-ancestor lookup for picked CAD nodes
//! - Style resolution and application for CAD, point-cloud and 360° targets
//! - Reconciliation of secondary models, 360° sets and point-of-interest overlays
//! - A screen-anchored overlay tool
//! - The view store tying it all together, plus HTTP and in-memory resource APIs

pub mod api;
pub mod closest_asset;
pub mod config;
pub mod fixture;
pub mod headless;
pub mod http;
pub mod mapping_cache;
pub mod memory;
pub mod overlay;
pub mod picking;
pub mod reconciler;
pub mod store;
pub mod style;
pub mod viewer;

pub use api::{ApiError, BoxFuture, ResourceApi};
pub use closest_asset::ClosestAssetResolver;
pub use config::{load_config, save_default_config, ConfigError, EngineConfig};
pub use fixture::{Fixture, FixtureError};
pub use headless::{HeadlessViewer, ViewerCall};
pub use http::HttpResourceApi;
pub use mapping_cache::{GeometryMappingCache, MappingError, MappingParams, NodeCollection};
pub use memory::InMemoryResourceApi;
pub use overlay::{
    NoopRenderer, Overlay, OverlayError, OverlayEvent, OverlayEventKind, OverlayId,
    OverlayRenderer, OverlayTool,
};
pub use picking::{AssetPicker, PickedAsset};
pub use reconciler::{DesiredScene, EntryFailure, ReconcileError, ReconcileReport, SceneReconciler};
pub use store::{StoreEvent, SyncReport, ViewStore};
pub use style::{StyleError, StyleOutcome, StyleResolver, StyleScene};
pub use viewer::{Intersection, LoadedModel, ScreenPoint, Viewer, ViewerError};
