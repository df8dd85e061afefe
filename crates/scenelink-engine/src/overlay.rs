//! Screen-anchored overlays tied to 3D world positions
//!
//! The tool owns the overlay pool and its layout: every camera update
//! reprojects each overlay, hides it beyond the configured distance and
//! grows it with an ease-out curve when the camera comes close. Drawing is
//! delegated to an [`OverlayRenderer`].

use scenelink_core::{AssetId, BoundingBox, PointOfInterest, Rgb, Vec3};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

use crate::config::OverlayConfig;
use crate::viewer::{ScreenPoint, Viewer};

const BASE_Z_INDEX: i32 = 0;
const HOVER_Z_INDEX: i32 = 1000;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OverlayError {
    #[error("Overlay {0} already exists")]
    DuplicateOverlay(OverlayId),
    #[error("Overlay {0} does not exist")]
    UnknownOverlay(OverlayId),
    #[error("Overlay collection {0} already exists")]
    DuplicateCollection(String),
    #[error("Overlay collection {0} does not exist")]
    UnknownCollection(String),
}

/// Identity of one overlay; unique within an [`OverlayTool`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OverlayId {
    /// Label of a mapped asset
    Asset(AssetId),
    /// Free-form label added by the application
    Named(String),
    /// Point of a point-of-interest collection
    Point { collection: String, index: usize },
}

impl fmt::Display for OverlayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asset(id) => write!(f, "asset:{}", id),
            Self::Named(name) => write!(f, "label:{}", name),
            Self::Point { collection, index } => write!(f, "poi:{}#{}", collection, index),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub id: OverlayId,
    pub world_position: Vec3,
    pub label: String,
    pub color: Rgb,
    /// False while the tool is hidden
    pub visible: bool,
    /// Whether the indicator is drawn at all after distance rules
    pub displayed: bool,
    pub opacity: f64,
    pub size_px: f64,
    pub hovered: bool,
    /// Labels are only shown while hovered
    pub label_visible: bool,
    pub z_index: i32,
    pub screen_position: Option<ScreenPoint>,
    /// Anchor of the hover label, offset to the side of the indicator
    pub label_position: Option<ScreenPoint>,
    /// Distance to the camera at the last update, `None` when off screen
    distance: Option<f64>,
}

impl Overlay {
    fn new(id: OverlayId, world_position: Vec3, label: String, color: Rgb, min_size: f64) -> Self {
        Self {
            id,
            world_position,
            label,
            color,
            visible: true,
            displayed: false,
            opacity: 0.0,
            size_px: min_size,
            hovered: false,
            label_visible: false,
            z_index: BASE_Z_INDEX,
            screen_position: None,
            label_position: None,
            distance: None,
        }
    }

    fn hit(&self, point: &ScreenPoint) -> bool {
        self.displayed
            && self
                .screen_position
                .map_or(false, |p| p.distance(point) <= self.size_px / 2.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverlayEventKind {
    Hover,
    Click,
}

/// Delivered to hover and click handlers
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayEvent {
    pub kind: OverlayEventKind,
    pub id: OverlayId,
    pub label: String,
    pub world_position: Vec3,
    /// Canvas position of the pointer that triggered the event
    pub pointer: ScreenPoint,
}

pub type OverlayHandler = Arc<dyn Fn(&OverlayEvent) + Send + Sync>;

/// Draws overlays somewhere (DOM, terminal, nothing)
pub trait OverlayRenderer: Send + Sync {
    fn upsert(&self, overlay: &Overlay);
    fn remove(&self, id: &OverlayId);
}

pub struct NoopRenderer;

impl OverlayRenderer for NoopRenderer {
    fn upsert(&self, _overlay: &Overlay) {}
    fn remove(&self, _id: &OverlayId) {}
}

/// Ease-out cubic on `t` in `[0, 1]`
fn ease_out(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    1.0 - (1.0 - t).powi(3)
}

pub struct OverlayTool {
    config: OverlayConfig,
    renderer: Arc<dyn OverlayRenderer>,
    overlays: Vec<Overlay>,
    collections: HashMap<String, Vec<OverlayId>>,
    handlers: HashMap<OverlayEventKind, Vec<OverlayHandler>>,
    visible: bool,
    enabled: bool,
}

impl OverlayTool {
    pub fn new(config: OverlayConfig, renderer: Arc<dyn OverlayRenderer>) -> Self {
        Self {
            config,
            renderer,
            overlays: Vec::new(),
            collections: HashMap::new(),
            handlers: HashMap::new(),
            visible: true,
            enabled: true,
        }
    }

    /// Add a label overlay at the center of `bbox`. No-op while disabled.
    pub fn add(&mut self, label: &str, id: OverlayId, bbox: &BoundingBox) -> Result<(), OverlayError> {
        if !self.enabled {
            trace!(overlay = %id, "Overlay tool disabled, skipping add");
            return Ok(());
        }
        self.insert(id, bbox.center(), label.to_string())
    }

    /// Remove one overlay; unknown ids are an error
    pub fn remove(&mut self, id: &OverlayId) -> Result<(), OverlayError> {
        let pos = self
            .overlays
            .iter()
            .position(|o| o.id == *id)
            .ok_or_else(|| OverlayError::UnknownOverlay(id.clone()))?;
        self.overlays.remove(pos);
        self.renderer.remove(id);
        Ok(())
    }

    /// Add one overlay per point of interest, registered under `collection`
    pub fn add_collection(
        &mut self,
        collection: &str,
        points: &[PointOfInterest],
    ) -> Result<(), OverlayError> {
        if self.collections.contains_key(collection) {
            return Err(OverlayError::DuplicateCollection(collection.to_string()));
        }
        let mut ids = Vec::with_capacity(points.len());
        for (index, point) in points.iter().enumerate() {
            let id = OverlayId::Point {
                collection: collection.to_string(),
                index,
            };
            self.insert(id.clone(), point.position, point.title.clone())?;
            ids.push(id);
        }
        debug!(collection, points = ids.len(), "Added overlay collection");
        self.collections.insert(collection.to_string(), ids);
        Ok(())
    }

    pub fn remove_collection(&mut self, collection: &str) -> Result<(), OverlayError> {
        let ids = self
            .collections
            .remove(collection)
            .ok_or_else(|| OverlayError::UnknownCollection(collection.to_string()))?;
        for id in &ids {
            // Points may already be gone if removed one by one
            if self.overlays.iter().any(|o| o.id == *id) {
                self.remove(id)?;
            }
        }
        debug!(collection, points = ids.len(), "Removed overlay collection");
        Ok(())
    }

    pub fn has_collection(&self, collection: &str) -> bool {
        self.collections.contains_key(collection)
    }

    pub fn collection_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.collections.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Remove every overlay added with [`add`](Self::add); collections stay
    pub fn clear(&mut self) {
        let labels: Vec<OverlayId> = self
            .overlays
            .iter()
            .filter(|o| !matches!(o.id, OverlayId::Point { .. }))
            .map(|o| o.id.clone())
            .collect();
        for id in &labels {
            self.renderer.remove(id);
        }
        self.overlays
            .retain(|o| matches!(o.id, OverlayId::Point { .. }));
    }

    pub fn set_visible(&mut self, visible: bool) {
        if self.visible == visible {
            return;
        }
        self.visible = visible;
        for i in 0..self.overlays.len() {
            self.layout(i);
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn overlays(&self) -> &[Overlay] {
        &self.overlays
    }

    pub fn get(&self, id: &OverlayId) -> Option<&Overlay> {
        self.overlays.iter().find(|o| o.id == *id)
    }

    pub fn len(&self) -> usize {
        self.overlays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overlays.is_empty()
    }

    /// Subscribe to an event; the same handler may be subscribed twice
    pub fn on(&mut self, kind: OverlayEventKind, handler: OverlayHandler) {
        self.handlers.entry(kind).or_default().push(handler);
    }

    /// Unsubscribe one subscription of exactly this handler
    pub fn off(&mut self, kind: OverlayEventKind, handler: &OverlayHandler) -> bool {
        let Some(list) = self.handlers.get_mut(&kind) else {
            return false;
        };
        match list.iter().position(|h| Arc::ptr_eq(h, handler)) {
            Some(pos) => {
                list.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Reproject every overlay and apply the distance rules
    pub fn update_camera(&mut self, viewer: &dyn Viewer) {
        for i in 0..self.overlays.len() {
            let projection = viewer.project(self.overlays[i].world_position);
            let overlay = &mut self.overlays[i];
            overlay.screen_position = projection.map(|p| p.screen);
            overlay.distance = projection.map(|p| p.distance_to_camera);
            self.layout(i);
        }
    }

    /// Hover the top-most overlay under `point`
    pub fn pointer_move(&mut self, point: ScreenPoint) -> Option<OverlayId> {
        let hit = self.hit_test(&point);
        let mut entered = None;
        for i in 0..self.overlays.len() {
            let hovered = Some(i) == hit;
            if self.overlays[i].hovered != hovered {
                self.overlays[i].hovered = hovered;
                if hovered {
                    entered = Some(i);
                }
                self.layout(i);
            }
        }
        if let Some(i) = entered {
            self.dispatch(OverlayEventKind::Hover, i, point);
        }
        hit.map(|i| self.overlays[i].id.clone())
    }

    /// Dispatch a click to the top-most overlay under `point`
    pub fn click(&mut self, point: ScreenPoint) -> Option<OverlayId> {
        let i = self.hit_test(&point)?;
        self.dispatch(OverlayEventKind::Click, i, point);
        Some(self.overlays[i].id.clone())
    }

    fn insert(&mut self, id: OverlayId, world_position: Vec3, label: String) -> Result<(), OverlayError> {
        if self.overlays.iter().any(|o| o.id == id) {
            return Err(OverlayError::DuplicateOverlay(id));
        }
        self.overlays.push(Overlay::new(
            id,
            world_position,
            label,
            self.config.default_color,
            self.config.min_size_px,
        ));
        let last = self.overlays.len() - 1;
        self.layout(last);
        Ok(())
    }

    /// Closest displayed overlay under `point`
    fn hit_test(&self, point: &ScreenPoint) -> Option<usize> {
        self.overlays
            .iter()
            .enumerate()
            .filter(|(_, o)| o.hit(point))
            .min_by(|(_, a), (_, b)| {
                let da = a.distance.unwrap_or(f64::INFINITY);
                let db = b.distance.unwrap_or(f64::INFINITY);
                da.total_cmp(&db)
            })
            .map(|(i, _)| i)
    }

    fn layout(&mut self, i: usize) {
        let max = self.config.max_point_indicator_distance;
        let near = max / 2.0;
        let (base, min) = (self.config.base_size_px, self.config.min_size_px);
        let label_offset = self.config.label_offset_px;
        let visible = self.visible;

        let overlay = &mut self.overlays[i];
        overlay.visible = visible;
        match overlay.distance {
            Some(d) if visible && d <= max => {
                overlay.displayed = true;
                overlay.opacity = 1.0;
                overlay.size_px = if near > 0.0 && d <= near {
                    min + (base - min) * ease_out(1.0 - d / near)
                } else {
                    min
                };
            }
            _ => {
                overlay.displayed = false;
                overlay.opacity = 0.0;
            }
        }
        overlay.label_visible = overlay.displayed && overlay.hovered;
        overlay.label_position = overlay
            .screen_position
            .filter(|_| overlay.displayed)
            .map(|p| ScreenPoint::new(p.x + label_offset, p.y));
        overlay.z_index = if overlay.hovered {
            HOVER_Z_INDEX
        } else {
            BASE_Z_INDEX
        };
        self.renderer.upsert(overlay);
    }

    fn dispatch(&self, kind: OverlayEventKind, i: usize, pointer: ScreenPoint) {
        let overlay = &self.overlays[i];
        let event = OverlayEvent {
            kind,
            id: overlay.id.clone(),
            label: overlay.label.clone(),
            world_position: overlay.world_position,
            pointer,
        };
        if let Some(handlers) = self.handlers.get(&kind) {
            for handler in handlers {
                handler(&event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::Fixture;
    use crate::headless::{HeadlessViewer, VIEWPORT_HEIGHT, VIEWPORT_WIDTH};
    use scenelink_core::CameraState;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRenderer {
        removed: Mutex<Vec<OverlayId>>,
        upserts: AtomicUsize,
    }

    impl OverlayRenderer for RecordingRenderer {
        fn upsert(&self, _overlay: &Overlay) {
            self.upserts.fetch_add(1, Ordering::SeqCst);
        }
        fn remove(&self, id: &OverlayId) {
            self.removed.lock().unwrap().push(id.clone());
        }
    }

    fn tool() -> OverlayTool {
        OverlayTool::new(OverlayConfig::default(), Arc::new(NoopRenderer))
    }

    fn unit_box_at(x: f64) -> BoundingBox {
        BoundingBox::from_arrays([x - 0.5, -0.5, -0.5], [x + 0.5, 0.5, 0.5])
    }

    /// Viewer looking down -Z from `z`, centered on the origin
    fn viewer_at(z: f64) -> HeadlessViewer {
        let viewer = HeadlessViewer::new(Fixture::default());
        viewer.set_camera(CameraState::new(Vec3::new(0.0, 0.0, z), Vec3::ZERO));
        viewer
    }

    fn center() -> ScreenPoint {
        ScreenPoint::new(VIEWPORT_WIDTH / 2.0, VIEWPORT_HEIGHT / 2.0)
    }

    #[test]
    fn test_add_then_remove_leaves_nothing() {
        let renderer = Arc::new(RecordingRenderer::default());
        let mut tool = OverlayTool::new(OverlayConfig::default(), renderer.clone());
        let id = OverlayId::Asset(901);
        tool.add("Pump-12A", id.clone(), &unit_box_at(0.0)).unwrap();
        assert_eq!(tool.len(), 1);
        assert_eq!(tool.get(&id).unwrap().world_position, Vec3::ZERO);

        tool.remove(&id).unwrap();
        assert!(tool.is_empty());
        assert_eq!(*renderer.removed.lock().unwrap(), vec![id]);
    }

    #[test]
    fn test_unknown_remove_is_error() {
        let mut tool = tool();
        assert_eq!(
            tool.remove(&OverlayId::Asset(1)),
            Err(OverlayError::UnknownOverlay(OverlayId::Asset(1)))
        );
    }

    #[test]
    fn test_duplicate_id_is_error() {
        let mut tool = tool();
        tool.add("a", OverlayId::Asset(1), &unit_box_at(0.0)).unwrap();
        assert!(matches!(
            tool.add("b", OverlayId::Asset(1), &unit_box_at(1.0)),
            Err(OverlayError::DuplicateOverlay(_))
        ));
    }

    #[test]
    fn test_disabled_add_is_noop() {
        let mut tool = tool();
        tool.set_enabled(false);
        tool.add("a", OverlayId::Asset(1), &unit_box_at(0.0)).unwrap();
        assert!(tool.is_empty());
    }

    #[test]
    fn test_distance_rules() {
        let mut tool = tool();
        tool.add("near", OverlayId::Named("near".into()), &unit_box_at(0.0))
            .unwrap();

        // Beyond the max distance (50)
        tool.update_camera(&viewer_at(80.0));
        let far = tool.get(&OverlayId::Named("near".into())).unwrap().clone();
        assert!(!far.displayed);
        assert_eq!(far.opacity, 0.0);

        // Between half and max distance: minimum size
        tool.update_camera(&viewer_at(40.0));
        let mid = tool.get(&OverlayId::Named("near".into())).unwrap().clone();
        assert!(mid.displayed);
        assert_eq!(mid.size_px, 16.0);

        // Close by: grows toward the base size, never beyond it
        tool.update_camera(&viewer_at(5.0));
        let close = tool.get(&OverlayId::Named("near".into())).unwrap().clone();
        assert!(close.size_px > 16.0);
        assert!(close.size_px <= 64.0);

        tool.update_camera(&viewer_at(1e-6));
        let size = tool.get(&OverlayId::Named("near".into())).unwrap().size_px;
        assert!(size <= 64.0);
    }

    #[test]
    fn test_hidden_tool_forces_everything_hidden() {
        let mut tool = tool();
        let id = OverlayId::Asset(1);
        tool.add("a", id.clone(), &unit_box_at(0.0)).unwrap();
        tool.update_camera(&viewer_at(10.0));
        assert!(tool.get(&id).unwrap().displayed);

        tool.set_visible(false);
        assert!(!tool.get(&id).unwrap().displayed);

        tool.set_visible(true);
        assert!(tool.get(&id).unwrap().displayed);
    }

    #[test]
    fn test_hover_raises_and_shows_label() {
        let mut tool = tool();
        let id = OverlayId::Asset(1);
        tool.add("a", id.clone(), &unit_box_at(0.0)).unwrap();
        tool.update_camera(&viewer_at(10.0));
        assert!(!tool.get(&id).unwrap().label_visible);

        assert_eq!(tool.pointer_move(center()), Some(id.clone()));
        let overlay = tool.get(&id).unwrap();
        assert!(overlay.label_visible);
        assert_eq!(overlay.z_index, HOVER_Z_INDEX);
        assert_eq!(
            overlay.label_position,
            Some(ScreenPoint::new(center().x + 20.0, center().y))
        );

        assert_eq!(tool.pointer_move(ScreenPoint::new(0.0, 0.0)), None);
        assert!(!tool.get(&id).unwrap().hovered);
    }

    #[test]
    fn test_handlers_dispatch_and_off_by_identity() {
        let mut tool = tool();
        tool.add("a", OverlayId::Asset(1), &unit_box_at(0.0)).unwrap();
        tool.update_camera(&viewer_at(10.0));

        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handler: OverlayHandler = Arc::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        tool.on(OverlayEventKind::Click, handler.clone());
        tool.on(OverlayEventKind::Click, handler.clone());

        tool.click(center());
        assert_eq!(count.load(Ordering::SeqCst), 2);

        // A different closure with the same body is not the same handler
        let other: OverlayHandler = Arc::new(|_| {});
        assert!(!tool.off(OverlayEventKind::Click, &other));

        assert!(tool.off(OverlayEventKind::Click, &handler));
        tool.click(center());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_events_carry_pointer_position() {
        let mut tool = tool();
        tool.add("Pump-12A", OverlayId::Asset(901), &unit_box_at(0.0))
            .unwrap();
        tool.update_camera(&viewer_at(10.0));

        let seen: Arc<Mutex<Vec<OverlayEvent>>> = Arc::default();
        let sink = seen.clone();
        let handler: OverlayHandler = Arc::new(move |event| {
            sink.lock().unwrap().push(event.clone());
        });
        tool.on(OverlayEventKind::Hover, handler.clone());
        tool.on(OverlayEventKind::Click, handler);

        let pointer = ScreenPoint::new(center().x + 2.0, center().y - 1.0);
        tool.pointer_move(pointer);
        tool.click(pointer);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].kind, OverlayEventKind::Hover);
        assert_eq!(seen[1].kind, OverlayEventKind::Click);
        for event in seen.iter() {
            assert_eq!(event.id, OverlayId::Asset(901));
            assert_eq!(event.label, "Pump-12A");
            assert_eq!(event.pointer, pointer);
        }
    }

    #[test]
    fn test_zero_distance_config_keeps_sizes_finite() {
        let config = OverlayConfig {
            max_point_indicator_distance: 0.0,
            ..OverlayConfig::default()
        };
        let mut tool = OverlayTool::new(config, Arc::new(NoopRenderer));
        tool.add("a", OverlayId::Asset(1), &unit_box_at(0.0)).unwrap();
        tool.update_camera(&viewer_at(10.0));
        let overlay = tool.get(&OverlayId::Asset(1)).unwrap();
        assert!(!overlay.displayed);
        assert!(overlay.size_px.is_finite());
    }

    #[test]
    fn test_clear_keeps_collections() {
        let mut tool = tool();
        tool.add("a", OverlayId::Asset(1), &unit_box_at(0.0)).unwrap();
        let points = vec![PointOfInterest {
            position: Vec3::new(1.0, 0.0, 0.0),
            title: "Leak".into(),
            description: None,
            file_ids: Vec::new(),
        }];
        tool.add_collection("poi-1", &points).unwrap();
        assert_eq!(tool.len(), 2);

        tool.clear();
        assert_eq!(tool.len(), 1);
        assert!(tool.has_collection("poi-1"));

        tool.remove_collection("poi-1").unwrap();
        assert!(tool.is_empty());
        assert_eq!(
            tool.remove_collection("poi-1"),
            Err(OverlayError::UnknownCollection("poi-1".into()))
        );
    }

    #[test]
    fn test_ease_out_bounds() {
        assert_eq!(ease_out(0.0), 0.0);
        assert_eq!(ease_out(1.0), 1.0);
        assert!(ease_out(0.5) > 0.5);
    }
}
