//! View state store
//!
//! Owns the viewer handle, the desired-state lists, selection flags and
//! camera state. Every mutation runs a sync pass (reconcile, then style) and
//! subscribers are notified through a broadcast channel.

use scenelink_core::{
    AssetId, AssetNodeMapping, CameraState, DesiredImage360, DesiredPointsOfInterest,
    DesiredSecondaryModel, Image360Handle, MappingTarget, ModelHandle, StylingInputs,
    ViewUrlState, ViewerState,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::api::ResourceApi;
use crate::closest_asset::ClosestAssetResolver;
use crate::config::EngineConfig;
use crate::mapping_cache::{GeometryMappingCache, MappingError};
use crate::overlay::{OverlayId, OverlayRenderer, OverlayTool};
use crate::picking::AssetPicker;
use crate::reconciler::{DesiredScene, ReconcileReport, SceneReconciler};
use crate::style::{StyleOutcome, StyleResolver, StyleScene};
use crate::viewer::{LoadedModel, ScreenPoint, Viewer, ViewerError};

/// Notifications sent to store subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    PrimaryChanged(MappingTarget),
    DesiredChanged,
    SelectionChanged(Option<AssetId>),
    /// Debounced camera position, as persisted in the shareable URL
    CameraChanged(CameraState),
    Synced { loaded: usize, unloaded: usize, failed: usize },
    /// The camera moved into a 360° station
    Image360Entered { site: Image360Handle, station: String },
    Image360Exited,
}

/// Result of one reconcile + style pass
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub reconcile: ReconcileReport,
    pub style: StyleOutcome,
}

#[derive(Debug, Clone, Default)]
struct ViewState {
    primary: Option<MappingTarget>,
    desired: DesiredScene,
    inputs: StylingInputs,
    camera: Option<CameraState>,
    slicing_state: Option<String>,
    entered_station: Option<(Image360Handle, String)>,
}

pub struct ViewStore {
    pub config: EngineConfig,
    viewer: Arc<dyn Viewer>,
    cache: Arc<GeometryMappingCache>,
    resolver: Arc<ClosestAssetResolver>,
    picker: AssetPicker,
    styles: StyleResolver,
    reconciler: SceneReconciler,
    overlay: Arc<Mutex<OverlayTool>>,
    state: RwLock<ViewState>,
    camera_generation: AtomicU64,
    events: broadcast::Sender<StoreEvent>,
}

impl ViewStore {
    pub fn new(
        config: EngineConfig,
        api: Arc<dyn ResourceApi>,
        viewer: Arc<dyn Viewer>,
        renderer: Arc<dyn OverlayRenderer>,
    ) -> Arc<Self> {
        let cache = Arc::new(GeometryMappingCache::new(api, config.mappings.clone()));
        let resolver = Arc::new(ClosestAssetResolver::new(cache.clone()));
        let overlay = Arc::new(Mutex::new(OverlayTool::new(
            config.overlay.clone(),
            renderer,
        )));
        let picker = AssetPicker::new(viewer.clone(), cache.clone(), resolver.clone());
        let styles = StyleResolver::new(
            viewer.clone(),
            cache.clone(),
            overlay.clone(),
            config.style.clone(),
            config.camera.clone(),
        );
        let reconciler = SceneReconciler::new(
            viewer.clone(),
            overlay.clone(),
            config.reconcile.clone(),
            config.camera.station_epsilon_sq,
        );
        let (events, _) = broadcast::channel(100);

        Arc::new(Self {
            config,
            viewer,
            cache,
            resolver,
            picker,
            styles,
            reconciler,
            overlay,
            state: RwLock::new(ViewState::default()),
            camera_generation: AtomicU64::new(0),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn cache(&self) -> &Arc<GeometryMappingCache> {
        &self.cache
    }

    pub fn overlay(&self) -> &Arc<Mutex<OverlayTool>> {
        &self.overlay
    }

    pub async fn primary(&self) -> Option<MappingTarget> {
        self.state.read().await.primary.clone()
    }

    pub async fn desired(&self) -> DesiredScene {
        self.state.read().await.desired.clone()
    }

    pub async fn styling_inputs(&self) -> StylingInputs {
        self.state.read().await.inputs
    }

    /// Last debounced camera state
    pub async fn camera_state(&self) -> Option<CameraState> {
        self.state.read().await.camera
    }

    /// True while the camera sits in a 360° station
    pub async fn is_image360_mode(&self) -> bool {
        self.state.read().await.entered_station.is_some()
    }

    pub async fn entered_station(&self) -> Option<(Image360Handle, String)> {
        self.state.read().await.entered_station.clone()
    }

    /// Secondary models currently loaded
    pub async fn loaded_secondary_models(&self) -> Vec<LoadedModel> {
        self.reconciler.loaded_models().await
    }

    /// Replace the primary model; the previous one is unloaded and its cache dropped.
    ///
    /// A model already loaded as a secondary is taken over as is.
    pub async fn set_primary_model(&self, handle: ModelHandle) -> Result<LoadedModel, ViewerError> {
        self.release_primary().await;
        let model = match self.reconciler.forget_model(handle).await {
            Some(model) => model,
            None => self.viewer.load_model(handle).await?,
        };
        let target = model.target();
        info!(model = %handle, kind = ?model.kind, "Loaded primary model");
        self.state.write().await.primary = Some(target.clone());
        self.notify(StoreEvent::PrimaryChanged(target));
        self.sync().await;
        Ok(model)
    }

    pub async fn set_primary_image360(&self, site: Image360Handle) -> Result<(), ViewerError> {
        self.release_primary().await;
        self.viewer.load_image360(site.clone(), None).await?;
        info!(site = %site, "Loaded primary 360 image set");
        let target = MappingTarget::Image360(site);
        self.state.write().await.primary = Some(target.clone());
        self.notify(StoreEvent::PrimaryChanged(target));
        self.sync().await;
        Ok(())
    }

    pub async fn set_secondary_models(&self, models: Vec<DesiredSecondaryModel>) -> SyncReport {
        self.state.write().await.desired.secondary_models = models;
        self.notify(StoreEvent::DesiredChanged);
        self.sync().await
    }

    /// Flip one secondary model, adding it to the list when missing
    pub async fn toggle_secondary_model(&self, handle: ModelHandle, applied: bool) -> SyncReport {
        {
            let mut state = self.state.write().await;
            let models = &mut state.desired.secondary_models;
            match models.iter_mut().find(|m| m.handle() == handle) {
                Some(m) => m.applied = applied,
                None => models.push(DesiredSecondaryModel::new(
                    handle.model_id,
                    handle.revision_id,
                    applied,
                )),
            }
        }
        self.notify(StoreEvent::DesiredChanged);
        self.sync().await
    }

    pub async fn set_images360(&self, images: Vec<DesiredImage360>) -> SyncReport {
        self.state.write().await.desired.images360 = images;
        self.notify(StoreEvent::DesiredChanged);
        self.sync().await
    }

    pub async fn set_points_of_interest(&self, points: Vec<DesiredPointsOfInterest>) -> SyncReport {
        self.state.write().await.desired.points_of_interest = points;
        self.notify(StoreEvent::DesiredChanged);
        self.sync().await
    }

    pub async fn set_selected_asset(&self, asset_id: Option<AssetId>) -> SyncReport {
        {
            let mut state = self.state.write().await;
            state.inputs.selected_asset_id = asset_id;
            if asset_id.is_none() {
                state.inputs.asset_details_expanded = false;
            }
        }
        self.notify(StoreEvent::SelectionChanged(asset_id));
        self.sync().await
    }

    pub async fn set_asset_details_expanded(&self, expanded: bool) -> SyncReport {
        self.state.write().await.inputs.asset_details_expanded = expanded;
        self.sync().await
    }

    pub async fn set_highlight_mode(&self, enabled: bool) -> SyncReport {
        self.state.write().await.inputs.asset_highlight_mode = enabled;
        self.sync().await
    }

    pub async fn set_labels_visibility(&self, visible: bool) -> SyncReport {
        self.state.write().await.inputs.labels_visibility = visible;
        self.sync().await
    }

    /// Record a camera move.
    ///
    /// Overlays follow immediately; the stored state and the
    /// [`StoreEvent::CameraChanged`] notification are debounced.
    pub async fn set_camera_state(self: &Arc<Self>, camera: CameraState) {
        self.viewer.set_camera(camera);
        self.overlay.lock().await.update_camera(self.viewer.as_ref());

        let generation = self.camera_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let store = self.clone();
        let delay = Duration::from_millis(self.config.camera.debounce_ms);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if store.camera_generation.load(Ordering::SeqCst) != generation {
                return;
            }
            store.state.write().await.camera = Some(camera);
            debug!(position = ?camera.position, "Persisted camera state");
            store.notify(StoreEvent::CameraChanged(camera));
        });
    }

    /// Raycast at a canvas position and select the asset found there.
    ///
    /// A click on nothing (or on unmapped geometry) clears the selection.
    pub async fn click(&self, x: f64, y: f64) -> Option<AssetId> {
        let point = ScreenPoint::new(x, y);
        // The overlay lock must be released before the selection syncs
        let hit = self.overlay.lock().await.click(point);
        if let Some(id) = hit {
            debug!(overlay = %id, "Click handled by overlay");
            return match id {
                OverlayId::Asset(asset_id) => {
                    self.set_selected_asset(Some(asset_id)).await;
                    Some(asset_id)
                }
                _ => None,
            };
        }

        let picked = self.picker.pick(point).await;
        let asset_id = picked.map(|p| p.asset_id);
        self.set_selected_asset(asset_id).await;

        if let Some(picked) = picked {
            if let Some(target) = self.target_of(picked.target_model).await {
                if let Err(e) = self.styles.fit_camera_to_asset(&target, picked.asset_id).await {
                    warn!(asset = picked.asset_id, error = %e, "Failed to fit camera to asset");
                }
            }
        }
        asset_id
    }

    /// Move the camera into a station of a loaded 360° set
    pub async fn enter_image360_station(
        &self,
        site: Image360Handle,
        station: impl Into<String>,
    ) -> Result<(), ViewerError> {
        self.viewer
            .enter_image360_station(site, station.into())
            .await?;
        self.refresh_image360_mode().await;
        Ok(())
    }

    /// Leave 360° mode
    pub async fn exit_image360(&self) -> Result<(), ViewerError> {
        self.viewer.exit_image360().await?;
        self.refresh_image360_mode().await;
        Ok(())
    }

    /// Tokenized asset search on the primary target
    pub async fn search(&self, query: &str) -> Result<Vec<AssetNodeMapping>, MappingError> {
        match self.primary().await {
            Some(target) => self.cache.search(&target, query).await,
            None => Ok(Vec::new()),
        }
    }

    /// Snapshot of the shareable state
    pub async fn to_url_state(&self) -> ViewUrlState {
        let state = self.state.read().await;
        ViewUrlState {
            revision_id: state
                .primary
                .as_ref()
                .and_then(|t| t.model())
                .map(|h| h.revision_id),
            selected_asset_id: state.inputs.selected_asset_id,
            expanded: state.inputs.asset_details_expanded,
            highlight_mode: state.inputs.asset_highlight_mode,
            secondary_models: state.desired.secondary_models.clone(),
            images360: state.desired.images360.clone(),
            viewer_state: state.camera.map(|c| ViewerState { camera: Some(c) }),
            slicing_state: state.slicing_state.clone(),
        }
    }

    /// Restore a shareable state; the primary target is loaded separately
    pub async fn apply_url_state(&self, url: &ViewUrlState) -> SyncReport {
        let camera = url.viewer_state.as_ref().and_then(|v| v.camera);
        {
            let mut state = self.state.write().await;
            state.inputs.selected_asset_id = url.selected_asset_id;
            state.inputs.asset_details_expanded = url.expanded && url.selected_asset_id.is_some();
            state.inputs.asset_highlight_mode = url.highlight_mode;
            state.desired.secondary_models = url.secondary_models.clone();
            state.desired.images360 = url.images360.clone();
            state.slicing_state = url.slicing_state.clone();
            if camera.is_some() {
                state.camera = camera;
            }
        }
        if let Some(camera) = camera {
            self.viewer.set_camera(camera);
        }
        self.notify(StoreEvent::DesiredChanged);
        self.notify(StoreEvent::SelectionChanged(url.selected_asset_id));
        self.sync().await
    }

    /// Reconcile the desired lists, then restyle every loaded target
    pub async fn sync(&self) -> SyncReport {
        let (desired, inputs, primary) = {
            let state = self.state.read().await;
            (state.desired.clone(), state.inputs, state.primary.clone())
        };

        // The primary is never loaded or unloaded on behalf of the secondary list
        let primary_model = primary.as_ref().and_then(MappingTarget::model);
        let desired = match primary_model {
            Some(handle) => desired.without_model(handle),
            None => desired,
        };
        let reconcile = self.reconciler.reconcile(&desired).await;
        self.refresh_image360_mode().await;

        let scene = StyleScene {
            primary,
            secondaries: self
                .reconciler
                .loaded_models()
                .await
                .iter()
                .filter(|m| Some(m.handle) != primary_model)
                .map(LoadedModel::target)
                .collect(),
        };
        let style = self.styles.apply(&scene, inputs).await;

        self.notify(StoreEvent::Synced {
            loaded: reconcile.loaded.len(),
            unloaded: reconcile.unloaded.len(),
            failed: reconcile.failed.len(),
        });
        SyncReport { reconcile, style }
    }

    /// Clear failure backoff for every entry and run a fresh pass
    pub async fn retry_failed(&self) -> SyncReport {
        self.reconciler.retry_failed().await;
        self.sync().await
    }

    async fn release_primary(&self) {
        let previous = self.state.write().await.primary.take();
        let Some(previous) = previous else {
            return;
        };
        let result = match &previous {
            MappingTarget::Cad(h) | MappingTarget::PointCloud(h) => {
                self.resolver.invalidate(*h).await;
                self.viewer.unload_model(*h).await
            }
            MappingTarget::Image360(site) => self.viewer.unload_image360(site.clone()).await,
        };
        if let Err(e) = result {
            warn!(resource = %previous, error = %e, "Failed to unload previous primary");
        }
        self.cache.invalidate(&previous).await;
    }

    /// Compare the viewer's station with the last one seen and notify on change
    async fn refresh_image360_mode(&self) {
        let current = self.viewer.entered_station();
        let previous = {
            let mut state = self.state.write().await;
            if state.entered_station == current {
                return;
            }
            std::mem::replace(&mut state.entered_station, current.clone())
        };
        match current {
            Some((site, station)) => {
                info!(site = %site, station = %station, "Entered 360 mode");
                self.notify(StoreEvent::Image360Entered { site, station });
            }
            None => {
                if let Some((site, _)) = previous {
                    info!(site = %site, "Exited 360 mode");
                }
                self.notify(StoreEvent::Image360Exited);
            }
        }
    }

    async fn target_of(&self, model: ModelHandle) -> Option<MappingTarget> {
        if let Some(primary) = self.primary().await {
            if primary.model() == Some(model) {
                return Some(primary);
            }
        }
        self.reconciler
            .loaded_models()
            .await
            .into_iter()
            .find(|m| m.handle == model)
            .map(|m| m.target())
    }

    fn notify(&self, event: StoreEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::sample::sample;
    use crate::headless::{HeadlessViewer, ViewerCall};
    use crate::memory::InMemoryResourceApi;
    use crate::overlay::NoopRenderer;
    use crate::viewer::Intersection;
    use scenelink_core::{Appearance, BoundingBox, Vec3};

    fn store() -> (Arc<HeadlessViewer>, Arc<ViewStore>) {
        let viewer = Arc::new(HeadlessViewer::new(sample()));
        let store = ViewStore::new(
            EngineConfig::default(),
            Arc::new(InMemoryResourceApi::new(sample())),
            viewer.clone(),
            Arc::new(NoopRenderer),
        );
        (viewer, store)
    }

    #[tokio::test]
    async fn test_toggle_secondary_and_ghost() {
        let (viewer, store) = store();
        store.set_primary_model(ModelHandle::new(1, 10)).await.unwrap();

        let report = store.toggle_secondary_model(ModelHandle::new(2, 20), true).await;
        assert_eq!(report.reconcile.loaded.len(), 1);

        store.set_selected_asset(Some(901)).await;
        store.set_asset_details_expanded(true).await;
        let cloud = viewer
            .style(&MappingTarget::PointCloud(ModelHandle::new(2, 20)))
            .unwrap();
        assert!(matches!(cloud.default, Appearance::Color(_)));
        assert_eq!(
            viewer
                .style(&MappingTarget::Cad(ModelHandle::new(1, 10)))
                .unwrap()
                .default,
            Appearance::Ghosted
        );

        let report = store.toggle_secondary_model(ModelHandle::new(2, 20), false).await;
        assert_eq!(report.reconcile.unloaded.len(), 1);
        assert!(store.loaded_secondary_models().await.is_empty());
    }

    #[tokio::test]
    async fn test_click_selects_and_fits_camera() {
        let (viewer, store) = store();
        store.set_primary_model(ModelHandle::new(1, 10)).await.unwrap();
        viewer.set_raycast_result(Some(Intersection::Cad {
            model: ModelHandle::new(1, 10),
            tree_index: 103,
            point: Vec3::ZERO,
        }));

        assert_eq!(store.click(100.0, 100.0).await, Some(901));
        assert_eq!(store.styling_inputs().await.selected_asset_id, Some(901));
        assert!(matches!(
            viewer.call_log().last(),
            Some(ViewerCall::FitCamera { duration_ms: 500, .. })
        ));

        viewer.set_raycast_result(None);
        assert_eq!(store.click(100.0, 100.0).await, None);
        assert_eq!(store.styling_inputs().await.selected_asset_id, None);
    }

    #[tokio::test]
    async fn test_url_state_round_trip_through_store() {
        let (viewer, store) = store();
        store.set_primary_model(ModelHandle::new(1, 10)).await.unwrap();
        let query = "selectedAssetId=902&hl_mode=true&secondaryModels=%5B%7B%22modelId%22%3A2%2C%22revisionId%22%3A20%7D%5D";
        let url = ViewUrlState::from_query(query).unwrap();
        let report = store.apply_url_state(&url).await;
        assert_eq!(report.reconcile.loaded.len(), 1);
        assert_eq!(viewer.loaded_models().len(), 2);

        let back = store.to_url_state().await;
        assert_eq!(back.revision_id, Some(10));
        assert_eq!(back.selected_asset_id, Some(902));
        assert!(back.highlight_mode);
        assert_eq!(back.secondary_models.len(), 1);
    }

    #[tokio::test]
    async fn test_replacing_primary_unloads_previous() {
        let (viewer, store) = store();
        store.set_primary_model(ModelHandle::new(1, 10)).await.unwrap();
        store.set_primary_model(ModelHandle::new(2, 20)).await.unwrap();
        let handles: Vec<_> = viewer.loaded_models().iter().map(|m| m.handle).collect();
        assert_eq!(handles, vec![ModelHandle::new(2, 20)]);
        assert!(store.set_primary_model(ModelHandle::new(3, 30)).await.is_err());
        assert_eq!(store.primary().await, None);
    }

    #[tokio::test]
    async fn test_search_on_primary() {
        let (_viewer, store) = store();
        assert!(store.search("pump").await.unwrap().is_empty());
        store.set_primary_model(ModelHandle::new(1, 10)).await.unwrap();
        let hits = store.search("pump 12").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].asset_name, "Pump-12A");
    }

    #[tokio::test]
    async fn test_retry_failed_clears_backoff() {
        let (_viewer, store) = store();
        let mut events = store.subscribe();

        let report = store
            .set_images360(vec![DesiredImage360::new("broken", true)])
            .await;
        assert_eq!(report.reconcile.failed.len(), 1);
        assert_eq!(events.try_recv().unwrap(), StoreEvent::DesiredChanged);
        assert_eq!(
            events.try_recv().unwrap(),
            StoreEvent::Synced {
                loaded: 0,
                unloaded: 0,
                failed: 1
            }
        );

        let report = store.sync().await;
        assert_eq!(report.reconcile.deferred.len(), 1);
        assert!(report.reconcile.failed.is_empty());

        let report = store.retry_failed().await;
        assert_eq!(report.reconcile.failed.len(), 1);
        assert_eq!(report.reconcile.failed[0].attempts, 1);
        assert!(store.desired().await.images360[0].applied);
    }

    #[tokio::test(start_paused = true)]
    async fn test_camera_writes_are_debounced() {
        let (_viewer, store) = store();
        let mut events = store.subscribe();

        let first = CameraState::new(Vec3::new(1.0, 0.0, 0.0), Vec3::ZERO);
        let second = CameraState::new(Vec3::new(2.0, 0.0, 0.0), Vec3::ZERO);
        store.set_camera_state(first).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        store.set_camera_state(second).await;
        assert_eq!(store.camera_state().await, None);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(store.camera_state().await, Some(second));
        assert_eq!(events.try_recv().unwrap(), StoreEvent::CameraChanged(second));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_click_on_asset_overlay_selects_it() {
        let (viewer, store) = store();
        viewer.set_camera(CameraState::new(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO));
        {
            let mut overlay = store.overlay().lock().await;
            overlay.set_visible(true);
            overlay
                .add(
                    "Pump-12A",
                    OverlayId::Asset(901),
                    &BoundingBox::from_arrays([-0.5; 3], [0.5; 3]),
                )
                .unwrap();
            overlay.update_camera(viewer.as_ref());
        }

        let clicked = tokio::time::timeout(Duration::from_secs(5), store.click(640.0, 360.0))
            .await
            .expect("click must not hold the overlay lock while syncing");
        assert_eq!(clicked, Some(901));
        assert_eq!(store.styling_inputs().await.selected_asset_id, Some(901));
    }

    #[tokio::test]
    async fn test_primary_listed_as_secondary_is_left_alone() {
        let (viewer, store) = store();
        store.set_primary_model(ModelHandle::new(1, 10)).await.unwrap();

        let report = store.toggle_secondary_model(ModelHandle::new(1, 10), true).await;
        assert!(report.reconcile.loaded.is_empty());
        assert_eq!(viewer.count_calls(ViewerCall::is_load), 1);
        assert!(store.loaded_secondary_models().await.is_empty());

        store.toggle_secondary_model(ModelHandle::new(1, 10), false).await;
        assert_eq!(viewer.count_calls(ViewerCall::is_unload), 0);
        assert_eq!(viewer.loaded_models().len(), 1);
        assert!(viewer.style(&MappingTarget::Cad(ModelHandle::new(1, 10))).is_some());
    }

    #[tokio::test]
    async fn test_secondary_promoted_to_primary_is_not_reloaded() {
        let (viewer, store) = store();
        store.set_primary_model(ModelHandle::new(1, 10)).await.unwrap();
        store.toggle_secondary_model(ModelHandle::new(2, 20), true).await;
        assert_eq!(viewer.count_calls(ViewerCall::is_load), 2);

        store.set_primary_model(ModelHandle::new(2, 20)).await.unwrap();
        assert_eq!(viewer.count_calls(ViewerCall::is_load), 2);
        assert_eq!(
            store.primary().await,
            Some(MappingTarget::PointCloud(ModelHandle::new(2, 20)))
        );
        let handles: Vec<_> = viewer.loaded_models().iter().map(|m| m.handle).collect();
        assert_eq!(handles, vec![ModelHandle::new(2, 20)]);
        assert!(store.loaded_secondary_models().await.is_empty());
    }

    #[tokio::test]
    async fn test_image360_mode_is_announced() {
        let (viewer, store) = store();
        let north = Image360Handle::new("north");
        viewer.set_camera(CameraState::new(Vec3::new(5.0, 1.5, 0.0), Vec3::ZERO));
        let mut events = store.subscribe();

        store
            .set_images360(vec![DesiredImage360::new("north", true)])
            .await;
        assert_eq!(events.try_recv().unwrap(), StoreEvent::DesiredChanged);
        assert_eq!(
            events.try_recv().unwrap(),
            StoreEvent::Image360Entered {
                site: north.clone(),
                station: "station-2".into()
            }
        );
        assert!(store.is_image360_mode().await);

        store.exit_image360().await.unwrap();
        assert!(matches!(events.try_recv(), Ok(StoreEvent::Synced { .. })));
        assert_eq!(events.try_recv().unwrap(), StoreEvent::Image360Exited);
        assert!(!store.is_image360_mode().await);
        assert_eq!(viewer.entered_station(), None);

        store
            .enter_image360_station(north.clone(), "station-1")
            .await
            .unwrap();
        assert_eq!(
            store.entered_station().await,
            Some((north.clone(), "station-1".to_string()))
        );
        assert!(store.enter_image360_station(north, "station-9").await.is_err());

        // Unloading the set leaves 360 mode
        while events.try_recv().is_ok() {}
        store.set_images360(Vec::new()).await;
        assert_eq!(events.try_recv().unwrap(), StoreEvent::DesiredChanged);
        assert_eq!(events.try_recv().unwrap(), StoreEvent::Image360Exited);
        assert!(!store.is_image360_mode().await);
    }
}
