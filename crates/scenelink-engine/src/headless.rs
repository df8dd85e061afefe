//! Non-rendering [`Viewer`] backed by a [`Fixture`]
//!
//! The headless viewer keeps an in-memory scene graph (loaded models, 360°
//! sets, styled collections, camera) and logs every scene-mutating call, so
//! reconciliation and styling can be checked without a renderer.

use scenelink_core::{
    AnnotationId, Appearance, BoundingBox, CameraState, Image360Handle, MappingTarget,
    ModelHandle, NodeId, Transform, Vec3,
};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

use crate::api::BoxFuture;
use crate::fixture::Fixture;
use crate::viewer::{
    Image360Station, Intersection, LoadedModel, Projection, ScreenPoint, Viewer, ViewerError,
};

/// Canvas size used for projection
pub const VIEWPORT_WIDTH: f64 = 1280.0;
pub const VIEWPORT_HEIGHT: f64 = 720.0;
const VERTICAL_FOV_DEG: f64 = 60.0;

/// Scene-mutating call recorded by the headless viewer
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerCall {
    LoadModel(ModelHandle),
    UnloadModel(ModelHandle),
    LoadImage360(Image360Handle),
    UnloadImage360(Image360Handle),
    EnterStation { site: Image360Handle, station: String },
    ExitImage360,
    SetDefaultAppearance { target: MappingTarget, appearance: Appearance },
    AssignNodes { model: ModelHandle, count: usize, appearance: Appearance },
    AssignInvertedNodes { model: ModelHandle, count: usize, appearance: Appearance },
    AssignAnnotations { target: MappingTarget, count: usize, appearance: Appearance },
    RemoveAllStyled(MappingTarget),
    SetCamera(CameraState),
    FitCamera { bbox: BoundingBox, duration_ms: u64 },
}

impl ViewerCall {
    pub fn is_load(&self) -> bool {
        matches!(self, Self::LoadModel(_) | Self::LoadImage360(_))
    }

    pub fn is_unload(&self) -> bool {
        matches!(self, Self::UnloadModel(_) | Self::UnloadImage360(_))
    }

    pub fn is_style(&self) -> bool {
        matches!(
            self,
            Self::SetDefaultAppearance { .. }
                | Self::AssignNodes { .. }
                | Self::AssignInvertedNodes { .. }
                | Self::AssignAnnotations { .. }
                | Self::RemoveAllStyled(_)
        )
    }
}

/// A styled collection on top of a target's default appearance
#[derive(Debug, Clone, PartialEq)]
pub enum StyledCollection {
    Nodes { tree_indices: Vec<i64>, appearance: Appearance },
    InvertedNodes { tree_indices: Vec<i64>, appearance: Appearance },
    Annotations { ids: Vec<AnnotationId>, appearance: Appearance },
}

/// Visible styling state of one target
#[derive(Debug, Clone, PartialEq)]
pub struct TargetStyle {
    pub default: Appearance,
    pub collections: Vec<StyledCollection>,
}

impl Default for TargetStyle {
    fn default() -> Self {
        Self {
            default: Appearance::Default,
            collections: Vec::new(),
        }
    }
}

#[derive(Default)]
struct Scene {
    models: Vec<LoadedModel>,
    images360: Vec<Image360Handle>,
    entered_station: Option<(Image360Handle, String)>,
    styles: HashMap<MappingTarget, TargetStyle>,
    camera: CameraState,
    calls: Vec<ViewerCall>,
    raycast: Option<Intersection>,
    supported_models: HashMap<ModelHandle, bool>,
    supported_images360: HashMap<String, bool>,
    load_delay: Duration,
}

impl Scene {
    fn is_loaded(&self, target: &MappingTarget) -> bool {
        match target {
            MappingTarget::Cad(_) | MappingTarget::PointCloud(_) => {
                self.models.iter().any(|m| m.target() == *target)
            }
            MappingTarget::Image360(site) => self.images360.contains(site),
        }
    }

    fn ensure_loaded(&self, target: &MappingTarget) -> Result<(), ViewerError> {
        if self.is_loaded(target) {
            return Ok(());
        }
        Err(match target {
            MappingTarget::Cad(h) | MappingTarget::PointCloud(h) => ViewerError::ModelNotLoaded(*h),
            MappingTarget::Image360(site) => ViewerError::Image360NotLoaded(site.clone()),
        })
    }

    fn cad_target(&self, model: ModelHandle) -> Result<MappingTarget, ViewerError> {
        let target = MappingTarget::Cad(model);
        self.ensure_loaded(&target)?;
        Ok(target)
    }
}

pub struct HeadlessViewer {
    fixture: Fixture,
    scene: Mutex<Scene>,
}

impl HeadlessViewer {
    pub fn new(fixture: Fixture) -> Self {
        Self {
            fixture,
            scene: Mutex::new(Scene::default()),
        }
    }

    fn scene(&self) -> MutexGuard<'_, Scene> {
        self.scene.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Models currently in the scene, in load order
    pub fn loaded_models(&self) -> Vec<LoadedModel> {
        self.scene().models.clone()
    }

    pub fn loaded_images360(&self) -> Vec<Image360Handle> {
        self.scene().images360.clone()
    }

    /// Styling state of a loaded target
    pub fn style(&self, target: &MappingTarget) -> Option<TargetStyle> {
        let scene = self.scene();
        if !scene.is_loaded(target) {
            return None;
        }
        Some(scene.styles.get(target).cloned().unwrap_or_default())
    }

    pub fn call_log(&self) -> Vec<ViewerCall> {
        self.scene().calls.clone()
    }

    pub fn clear_call_log(&self) {
        self.scene().calls.clear();
    }

    pub fn count_calls(&self, pred: impl Fn(&ViewerCall) -> bool) -> usize {
        self.scene().calls.iter().filter(|c| pred(c)).count()
    }

    /// Intersection returned by every subsequent raycast
    pub fn set_raycast_result(&self, hit: Option<Intersection>) {
        self.scene().raycast = hit;
    }

    /// Override whether a model can be loaded
    pub fn set_model_supported(&self, handle: ModelHandle, supported: bool) {
        self.scene().supported_models.insert(handle, supported);
    }

    pub fn set_image360_supported(&self, site: &Image360Handle, supported: bool) {
        self.scene()
            .supported_images360
            .insert(site.site_id.clone(), supported);
    }

    /// Simulated latency of load calls
    pub fn set_load_delay(&self, delay: Duration) {
        self.scene().load_delay = delay;
    }

    fn record(&self, call: ViewerCall) {
        debug!(call = ?call, "Viewer call");
        self.scene().calls.push(call);
    }

    fn load_delay(&self) -> Duration {
        self.scene().load_delay
    }
}

impl Viewer for HeadlessViewer {
    fn load_model(&self, handle: ModelHandle) -> BoxFuture<'_, Result<LoadedModel, ViewerError>> {
        Box::pin(async move {
            self.record(ViewerCall::LoadModel(handle));
            let delay = self.load_delay();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let fixture = self
                .fixture
                .model(handle)
                .ok_or(ViewerError::UnsupportedModel(handle))?;
            let mut scene = self.scene();
            let supported = scene
                .supported_models
                .get(&handle)
                .copied()
                .unwrap_or(fixture.supported);
            if !supported {
                return Err(ViewerError::UnsupportedModel(handle));
            }

            let model = LoadedModel::new(handle, fixture.kind);
            if !scene.models.contains(&model) {
                scene.models.push(model);
            }
            Ok(model)
        })
    }

    fn unload_model(&self, handle: ModelHandle) -> BoxFuture<'_, Result<(), ViewerError>> {
        Box::pin(async move {
            self.record(ViewerCall::UnloadModel(handle));
            let mut scene = self.scene();
            let before = scene.models.len();
            scene.models.retain(|m| m.handle != handle);
            if scene.models.len() == before {
                return Err(ViewerError::ModelNotLoaded(handle));
            }
            scene.styles.retain(|t, _| t.model() != Some(handle));
            Ok(())
        })
    }

    fn load_image360(
        &self,
        site: Image360Handle,
        transform: Option<Transform>,
    ) -> BoxFuture<'_, Result<Vec<Image360Station>, ViewerError>> {
        Box::pin(async move {
            self.record(ViewerCall::LoadImage360(site.clone()));
            let delay = self.load_delay();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let fixture = self
                .fixture
                .image360(&site)
                .ok_or_else(|| ViewerError::UnsupportedImage360(site.clone()))?;
            let mut scene = self.scene();
            let supported = scene
                .supported_images360
                .get(&site.site_id)
                .copied()
                .unwrap_or(fixture.supported);
            if !supported {
                return Err(ViewerError::UnsupportedImage360(site));
            }

            if !scene.images360.contains(&site) {
                scene.images360.push(site);
            }
            let transform = transform.unwrap_or_default();
            Ok(fixture
                .stations
                .iter()
                .map(|s| Image360Station {
                    id: s.id.clone(),
                    position: transform.transform_point(s.position),
                })
                .collect())
        })
    }

    fn unload_image360(&self, site: Image360Handle) -> BoxFuture<'_, Result<(), ViewerError>> {
        Box::pin(async move {
            self.record(ViewerCall::UnloadImage360(site.clone()));
            let mut scene = self.scene();
            let before = scene.images360.len();
            scene.images360.retain(|s| *s != site);
            if scene.images360.len() == before {
                return Err(ViewerError::Image360NotLoaded(site));
            }
            if scene.entered_station.as_ref().map(|(s, _)| s) == Some(&site) {
                scene.entered_station = None;
            }
            scene.styles.remove(&MappingTarget::Image360(site));
            Ok(())
        })
    }

    fn enter_image360_station(
        &self,
        site: Image360Handle,
        station_id: String,
    ) -> BoxFuture<'_, Result<(), ViewerError>> {
        Box::pin(async move {
            self.record(ViewerCall::EnterStation {
                site: site.clone(),
                station: station_id.clone(),
            });
            let known = self
                .fixture
                .image360(&site)
                .map_or(false, |f| f.stations.iter().any(|s| s.id == station_id));
            let mut scene = self.scene();
            if !scene.images360.contains(&site) {
                return Err(ViewerError::Image360NotLoaded(site));
            }
            if !known {
                return Err(ViewerError::StationNotFound {
                    site,
                    station: station_id,
                });
            }
            scene.entered_station = Some((site, station_id));
            Ok(())
        })
    }

    fn exit_image360(&self) -> BoxFuture<'_, Result<(), ViewerError>> {
        Box::pin(async move {
            self.record(ViewerCall::ExitImage360);
            self.scene().entered_station = None;
            Ok(())
        })
    }

    fn entered_station(&self) -> Option<(Image360Handle, String)> {
        self.scene().entered_station.clone()
    }

    fn set_default_appearance(
        &self,
        target: MappingTarget,
        appearance: Appearance,
    ) -> BoxFuture<'_, Result<(), ViewerError>> {
        Box::pin(async move {
            self.record(ViewerCall::SetDefaultAppearance {
                target: target.clone(),
                appearance,
            });
            let mut scene = self.scene();
            scene.ensure_loaded(&target)?;
            scene.styles.entry(target).or_default().default = appearance;
            Ok(())
        })
    }

    fn assign_node_appearance(
        &self,
        model: ModelHandle,
        tree_indices: Vec<i64>,
        appearance: Appearance,
    ) -> BoxFuture<'_, Result<(), ViewerError>> {
        Box::pin(async move {
            self.record(ViewerCall::AssignNodes {
                model,
                count: tree_indices.len(),
                appearance,
            });
            let mut scene = self.scene();
            let target = scene.cad_target(model)?;
            scene
                .styles
                .entry(target)
                .or_default()
                .collections
                .push(StyledCollection::Nodes {
                    tree_indices,
                    appearance,
                });
            Ok(())
        })
    }

    fn assign_inverted_node_appearance(
        &self,
        model: ModelHandle,
        tree_indices: Vec<i64>,
        appearance: Appearance,
    ) -> BoxFuture<'_, Result<(), ViewerError>> {
        Box::pin(async move {
            self.record(ViewerCall::AssignInvertedNodes {
                model,
                count: tree_indices.len(),
                appearance,
            });
            let mut scene = self.scene();
            let target = scene.cad_target(model)?;
            scene
                .styles
                .entry(target)
                .or_default()
                .collections
                .push(StyledCollection::InvertedNodes {
                    tree_indices,
                    appearance,
                });
            Ok(())
        })
    }

    fn assign_annotation_appearance(
        &self,
        target: MappingTarget,
        annotation_ids: Vec<AnnotationId>,
        appearance: Appearance,
    ) -> BoxFuture<'_, Result<(), ViewerError>> {
        Box::pin(async move {
            self.record(ViewerCall::AssignAnnotations {
                target: target.clone(),
                count: annotation_ids.len(),
                appearance,
            });
            let mut scene = self.scene();
            scene.ensure_loaded(&target)?;
            scene
                .styles
                .entry(target)
                .or_default()
                .collections
                .push(StyledCollection::Annotations {
                    ids: annotation_ids,
                    appearance,
                });
            Ok(())
        })
    }

    fn remove_all_styled(&self, target: MappingTarget) -> BoxFuture<'_, Result<(), ViewerError>> {
        Box::pin(async move {
            self.record(ViewerCall::RemoveAllStyled(target.clone()));
            let mut scene = self.scene();
            scene.ensure_loaded(&target)?;
            scene.styles.entry(target).or_default().collections.clear();
            Ok(())
        })
    }

    fn node_bounding_box(
        &self,
        model: ModelHandle,
        node_id: NodeId,
    ) -> BoxFuture<'_, Result<BoundingBox, ViewerError>> {
        Box::pin(async move {
            self.fixture
                .model(model)
                .and_then(|m| m.nodes.iter().find(|n| n.id == node_id))
                .and_then(|n| n.bounding_box)
                .ok_or(ViewerError::NodeNotFound { model, node_id })
        })
    }

    fn tree_index_to_node_id(
        &self,
        model: ModelHandle,
        tree_index: i64,
    ) -> BoxFuture<'_, Result<NodeId, ViewerError>> {
        Box::pin(async move {
            self.fixture
                .model(model)
                .and_then(|m| m.nodes.iter().find(|n| n.tree_index == tree_index))
                .map(|n| n.id)
                .ok_or(ViewerError::TreeIndexNotFound { model, tree_index })
        })
    }

    fn raycast(&self, _point: ScreenPoint) -> BoxFuture<'_, Option<Intersection>> {
        Box::pin(async move { self.scene().raycast.clone() })
    }

    fn project(&self, world: Vec3) -> Option<Projection> {
        let camera = self.scene().camera;
        project_pinhole(&camera, world)
    }

    fn camera(&self) -> CameraState {
        self.scene().camera
    }

    fn set_camera(&self, camera: CameraState) {
        let mut scene = self.scene();
        scene.calls.push(ViewerCall::SetCamera(camera));
        scene.camera = camera;
    }

    fn fit_camera(&self, bbox: BoundingBox, duration_ms: u64, radius_factor: f64) {
        let mut scene = self.scene();
        scene.calls.push(ViewerCall::FitCamera { bbox, duration_ms });
        scene.camera = CameraState::fit(&bbox, radius_factor);
    }
}

/// Perspective projection with a fixed viewport and a Y-up world
pub fn project_pinhole(camera: &CameraState, world: Vec3) -> Option<Projection> {
    let forward = (camera.target - camera.position)
        .normalized()
        .unwrap_or(Vec3::new(0.0, 0.0, -1.0));
    let right = forward
        .cross(Vec3::new(0.0, 1.0, 0.0))
        .normalized()
        .unwrap_or(Vec3::new(1.0, 0.0, 0.0));
    let up = right.cross(forward);

    let rel = world - camera.position;
    let depth = rel.dot(forward);
    if depth <= 1e-6 {
        return None;
    }

    let focal = (VIEWPORT_HEIGHT / 2.0) / (VERTICAL_FOV_DEG.to_radians() / 2.0).tan();
    let x = VIEWPORT_WIDTH / 2.0 + focal * rel.dot(right) / depth;
    let y = VIEWPORT_HEIGHT / 2.0 - focal * rel.dot(up) / depth;

    Some(Projection {
        screen: ScreenPoint::new(x, y),
        distance_to_camera: rel.length(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::sample::sample;
    use scenelink_core::ModelKind;

    #[tokio::test]
    async fn test_load_and_unload_model() {
        let viewer = HeadlessViewer::new(sample());
        let model = viewer.load_model(ModelHandle::new(1, 10)).await.unwrap();
        assert_eq!(model.kind, ModelKind::Cad);
        assert_eq!(viewer.loaded_models(), vec![model]);

        viewer.unload_model(ModelHandle::new(1, 10)).await.unwrap();
        assert!(viewer.loaded_models().is_empty());
        assert!(viewer.unload_model(ModelHandle::new(1, 10)).await.is_err());
        assert_eq!(viewer.count_calls(ViewerCall::is_load), 1);
        assert_eq!(viewer.count_calls(ViewerCall::is_unload), 2);
    }

    #[tokio::test]
    async fn test_unsupported_model_fails() {
        let viewer = HeadlessViewer::new(sample());
        let err = viewer.load_model(ModelHandle::new(3, 30)).await.unwrap_err();
        assert_eq!(err, ViewerError::UnsupportedModel(ModelHandle::new(3, 30)));

        viewer.set_model_supported(ModelHandle::new(3, 30), true);
        assert!(viewer.load_model(ModelHandle::new(3, 30)).await.is_ok());
    }

    #[tokio::test]
    async fn test_image_set_placement_and_exit() {
        let viewer = HeadlessViewer::new(sample());
        let north = Image360Handle::new("north");
        let stations = viewer
            .load_image360(
                north.clone(),
                Some(Transform::translation(Vec3::new(0.0, 0.0, 5.0))),
            )
            .await
            .unwrap();
        assert_eq!(stations[1].position, Vec3::new(5.0, 1.5, 5.0));

        viewer
            .enter_image360_station(north.clone(), "station-2".into())
            .await
            .unwrap();
        assert_eq!(viewer.entered_station(), Some((north, "station-2".to_string())));

        viewer.exit_image360().await.unwrap();
        assert_eq!(viewer.entered_station(), None);
        assert_eq!(viewer.call_log().last(), Some(&ViewerCall::ExitImage360));
    }

    #[tokio::test]
    async fn test_styling_requires_loaded_target() {
        let viewer = HeadlessViewer::new(sample());
        let target = MappingTarget::Cad(ModelHandle::new(1, 10));
        assert!(viewer
            .set_default_appearance(target.clone(), Appearance::Ghosted)
            .await
            .is_err());

        viewer.load_model(ModelHandle::new(1, 10)).await.unwrap();
        viewer
            .set_default_appearance(target.clone(), Appearance::Ghosted)
            .await
            .unwrap();
        viewer
            .assign_node_appearance(ModelHandle::new(1, 10), vec![101], Appearance::Default)
            .await
            .unwrap();
        let style = viewer.style(&target).unwrap();
        assert_eq!(style.default, Appearance::Ghosted);
        assert_eq!(style.collections.len(), 1);

        viewer.remove_all_styled(target.clone()).await.unwrap();
        assert!(viewer.style(&target).unwrap().collections.is_empty());
    }

    #[test]
    fn test_projection_center_and_behind() {
        let camera = CameraState::new(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO);
        let center = project_pinhole(&camera, Vec3::ZERO).unwrap();
        assert!((center.screen.x - VIEWPORT_WIDTH / 2.0).abs() < 1e-9);
        assert!((center.screen.y - VIEWPORT_HEIGHT / 2.0).abs() < 1e-9);
        assert!((center.distance_to_camera - 10.0).abs() < 1e-9);

        assert!(project_pinhole(&camera, Vec3::new(0.0, 0.0, 20.0)).is_none());
    }

    #[tokio::test]
    async fn test_tree_index_lookup() {
        let viewer = HeadlessViewer::new(sample());
        let id = viewer
            .tree_index_to_node_id(ModelHandle::new(1, 10), 103)
            .await
            .unwrap();
        assert_eq!(id, 103);
        assert!(viewer
            .tree_index_to_node_id(ModelHandle::new(1, 10), 999)
            .await
            .is_err());
    }
}
