//! Applies resolved style plans to the viewer
//!
//! A pass computes the full list of viewer commands first (fetching node
//! collections and annotations as needed), then resets every loaded target
//! and replays the commands. A pass that was overtaken by a newer one while
//! fetching is discarded before it touches the viewer.

use scenelink_core::{
    AnnotationId, Appearance, AssetId, BoundingBox, MappingTarget, ModelHandle, StyleDirective,
    StyleKind, StylePlan, StylingInputs,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{CameraConfig, StyleConfig};
use crate::mapping_cache::{GeometryMappingCache, MappingError, MappingParams};
use crate::overlay::{OverlayId, OverlayTool};
use crate::viewer::{Viewer, ViewerError};

#[derive(Error, Debug)]
pub enum StyleError {
    #[error("Mapping error: {0}")]
    MappingError(#[from] MappingError),
    #[error("Viewer error: {0}")]
    ViewerError(#[from] ViewerError),
}

/// Loaded targets a style pass runs against
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StyleScene {
    /// The primary model or 360° collection
    pub primary: Option<MappingTarget>,
    /// Loaded secondary models
    pub secondaries: Vec<MappingTarget>,
}

impl StyleScene {
    pub fn targets(&self) -> impl Iterator<Item = &MappingTarget> {
        self.primary.iter().chain(self.secondaries.iter())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum StyleCommand {
    SetDefault(MappingTarget, Appearance),
    AssignNodes(ModelHandle, Vec<i64>, Appearance),
    AssignInverted(ModelHandle, Vec<i64>, Appearance),
    AssignAnnotations(MappingTarget, Vec<AnnotationId>, Appearance),
    AddLabel {
        asset_id: AssetId,
        name: String,
        bbox: BoundingBox,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleOutcome {
    Applied,
    /// A newer pass started before this one finished computing
    Superseded,
}

pub struct StyleResolver {
    viewer: Arc<dyn Viewer>,
    cache: Arc<GeometryMappingCache>,
    overlay: Arc<Mutex<OverlayTool>>,
    colors: StyleConfig,
    camera: CameraConfig,
    generation: AtomicU64,
    apply_lock: Mutex<()>,
}

impl StyleResolver {
    pub fn new(
        viewer: Arc<dyn Viewer>,
        cache: Arc<GeometryMappingCache>,
        overlay: Arc<Mutex<OverlayTool>>,
        colors: StyleConfig,
        camera: CameraConfig,
    ) -> Self {
        Self {
            viewer,
            cache,
            overlay,
            colors,
            camera,
            generation: AtomicU64::new(0),
            apply_lock: Mutex::new(()),
        }
    }

    /// Resolve `inputs` and apply the result to every target of `scene`
    pub async fn apply(&self, scene: &StyleScene, inputs: StylingInputs) -> StyleOutcome {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let plan = inputs.resolve();
        let commands = self.plan_commands(scene, &plan).await;

        let _guard = self.apply_lock.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(generation, "Discarding stale style pass");
            return StyleOutcome::Superseded;
        }

        self.reset_styles(scene).await;
        let count = commands.len();
        for command in commands {
            if let Err(e) = self.execute(command).await {
                warn!(error = %e, "Style command failed");
            }
        }

        let mut overlay = self.overlay.lock().await;
        overlay.set_visible(plan.overlay_visible);
        overlay.update_camera(self.viewer.as_ref());
        info!(
            primary = ?plan.primary.kind,
            dim = plan.primary.dim_unmapped,
            commands = count,
            "Applied style"
        );
        StyleOutcome::Applied
    }

    /// Remove styled collections, restore default appearances and drop label overlays
    pub async fn reset_styles(&self, scene: &StyleScene) {
        for target in scene.targets() {
            if let Err(e) = self.viewer.remove_all_styled(target.clone()).await {
                warn!(resource = %target, error = %e, "Failed to remove styled collections");
            }
            if let Err(e) = self
                .viewer
                .set_default_appearance(target.clone(), Appearance::Default)
                .await
            {
                warn!(resource = %target, error = %e, "Failed to restore default appearance");
            }
        }
        self.overlay.lock().await.clear();
    }

    /// Point the camera at the geometry of `asset_id`; false when it has none
    pub async fn fit_camera_to_asset(
        &self,
        target: &MappingTarget,
        asset_id: AssetId,
    ) -> Result<bool, StyleError> {
        let mut bbox = BoundingBox::empty();
        match target {
            MappingTarget::Cad(model) => {
                let collection = self.cache.node_collection(*model, Some(asset_id)).await?;
                for node in collection.nodes() {
                    let node_box = match node.bounding_box {
                        Some(b) => b,
                        None => self.viewer.node_bounding_box(*model, node.node_id).await?,
                    };
                    bbox = bbox.union(&node_box);
                }
            }
            MappingTarget::PointCloud(_) => {
                let mappings = self
                    .cache
                    .get_all(target, &MappingParams::for_asset(asset_id))
                    .await?;
                for b in mappings.iter().filter_map(|m| m.source.bounding_box()) {
                    bbox = bbox.union(&b);
                }
            }
            MappingTarget::Image360(_) => return Ok(false),
        }

        if bbox.is_empty() {
            debug!(resource = %target, asset = asset_id, "No geometry to fit camera to");
            return Ok(false);
        }
        self.viewer
            .fit_camera(bbox, self.camera.fit_duration_ms, self.camera.fit_radius_factor);
        Ok(true)
    }

    async fn plan_commands(&self, scene: &StyleScene, plan: &StylePlan) -> Vec<StyleCommand> {
        let mut commands = Vec::new();

        if let Some(primary) = &scene.primary {
            match self.directive_commands(primary, &plan.primary).await {
                Ok(c) => commands.extend(c),
                Err(e) => warn!(resource = %primary, error = %e, "Failed to compute style"),
            }
            if plan.asset_labels {
                match self.label_commands(primary).await {
                    Ok(c) => commands.extend(c),
                    Err(e) => warn!(resource = %primary, error = %e, "Failed to compute asset labels"),
                }
            }
        }

        for secondary in &scene.secondaries {
            commands.extend(self.secondary_commands(secondary, &plan.secondary));
        }
        commands
    }

    async fn directive_commands(
        &self,
        target: &MappingTarget,
        directive: &StyleDirective,
    ) -> Result<Vec<StyleCommand>, MappingError> {
        let mut commands = Vec::new();
        let dim = Appearance::Color(self.colors.dim_color);

        match target {
            MappingTarget::Cad(model) => {
                if directive.dim_unmapped {
                    let mapped = self.cache.node_collection(*model, None).await?;
                    commands.push(StyleCommand::AssignInverted(*model, mapped.tree_indices(), dim));
                }
                match directive.kind {
                    StyleKind::Default => {}
                    StyleKind::Highlighted(asset_id) => {
                        let nodes = self.cache.node_collection(*model, Some(asset_id)).await?;
                        commands.push(StyleCommand::AssignNodes(
                            *model,
                            nodes.tree_indices(),
                            Appearance::Highlighted,
                        ));
                    }
                    StyleKind::Ghosted(asset_id) => {
                        commands.push(StyleCommand::SetDefault(target.clone(), Appearance::Ghosted));
                        if let Some(asset_id) = asset_id {
                            let nodes = self.cache.node_collection(*model, Some(asset_id)).await?;
                            commands.push(StyleCommand::AssignNodes(
                                *model,
                                nodes.tree_indices(),
                                Appearance::Default,
                            ));
                        }
                    }
                }
            }
            MappingTarget::PointCloud(_) => {
                if directive.dim_unmapped {
                    let mapped = self.annotation_ids(target, None).await?;
                    commands.push(StyleCommand::SetDefault(target.clone(), dim));
                    commands.push(StyleCommand::AssignAnnotations(
                        target.clone(),
                        mapped,
                        Appearance::Default,
                    ));
                }
                match directive.kind {
                    StyleKind::Default => {}
                    StyleKind::Highlighted(asset_id) => {
                        let ids = self.annotation_ids(target, Some(asset_id)).await?;
                        commands.push(StyleCommand::AssignAnnotations(
                            target.clone(),
                            ids,
                            Appearance::Color(self.colors.highlight_color),
                        ));
                    }
                    StyleKind::Ghosted(asset_id) => {
                        commands.push(StyleCommand::SetDefault(
                            target.clone(),
                            Appearance::Color(self.colors.ghost_color),
                        ));
                        if let Some(asset_id) = asset_id {
                            let ids = self.annotation_ids(target, Some(asset_id)).await?;
                            commands.push(StyleCommand::AssignAnnotations(
                                target.clone(),
                                ids,
                                Appearance::Default,
                            ));
                        }
                    }
                }
            }
            MappingTarget::Image360(site) => {
                let asset_id = match directive.kind {
                    StyleKind::Highlighted(a) | StyleKind::Ghosted(Some(a)) => a,
                    StyleKind::Default | StyleKind::Ghosted(None) => return Ok(commands),
                };
                let ids = self.cache.image360_annotations(site, asset_id).await?;
                commands.push(StyleCommand::AssignAnnotations(
                    target.clone(),
                    ids.to_vec(),
                    Appearance::Highlighted,
                ));
            }
        }
        Ok(commands)
    }

    /// Secondary models only take part in ghosting
    fn secondary_commands(
        &self,
        target: &MappingTarget,
        directive: &StyleDirective,
    ) -> Vec<StyleCommand> {
        if directive.kind != StyleKind::Ghosted(None) {
            return Vec::new();
        }
        let appearance = match target {
            MappingTarget::Cad(_) => Appearance::Ghosted,
            MappingTarget::PointCloud(_) => Appearance::Color(self.colors.ghost_color),
            MappingTarget::Image360(_) => return Vec::new(),
        };
        vec![StyleCommand::SetDefault(target.clone(), appearance)]
    }

    async fn label_commands(&self, target: &MappingTarget) -> Result<Vec<StyleCommand>, MappingError> {
        let assets = self.cache.list_assets(target).await?;
        let mut commands = Vec::with_capacity(assets.len());
        for mapping in assets {
            let bbox = match (mapping.source.bounding_box(), target, mapping.source.node_id()) {
                (Some(b), _, _) => Some(b),
                (None, MappingTarget::Cad(model), Some(node_id)) => {
                    self.viewer.node_bounding_box(*model, node_id).await.ok()
                }
                _ => None,
            };
            if let Some(bbox) = bbox {
                commands.push(StyleCommand::AddLabel {
                    asset_id: mapping.asset_id,
                    name: mapping.asset_name,
                    bbox,
                });
            }
        }
        Ok(commands)
    }

    async fn annotation_ids(
        &self,
        target: &MappingTarget,
        asset_id: Option<AssetId>,
    ) -> Result<Vec<AnnotationId>, MappingError> {
        let params = MappingParams {
            asset_id,
            ..Default::default()
        };
        let mappings = self.cache.get_all(target, &params).await?;
        Ok(mappings
            .iter()
            .filter_map(|m| m.source.annotation_id())
            .collect())
    }

    async fn execute(&self, command: StyleCommand) -> Result<(), StyleError> {
        match command {
            StyleCommand::SetDefault(target, appearance) => {
                self.viewer.set_default_appearance(target, appearance).await?
            }
            StyleCommand::AssignNodes(model, indices, appearance) => {
                self.viewer
                    .assign_node_appearance(model, indices, appearance)
                    .await?
            }
            StyleCommand::AssignInverted(model, indices, appearance) => {
                self.viewer
                    .assign_inverted_node_appearance(model, indices, appearance)
                    .await?
            }
            StyleCommand::AssignAnnotations(target, ids, appearance) => {
                self.viewer
                    .assign_annotation_appearance(target, ids, appearance)
                    .await?
            }
            StyleCommand::AddLabel {
                asset_id,
                name,
                bbox,
            } => {
                let mut overlay = self.overlay.lock().await;
                if let Err(e) = overlay.add(&name, OverlayId::Asset(asset_id), &bbox) {
                    warn!(asset = asset_id, error = %e, "Failed to add asset label");
                }
            }
        }
        Ok(())
    }
}
