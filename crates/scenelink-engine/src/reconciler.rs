//! Converges loaded secondary models, 360° sets and point-of-interest
//! overlays toward the desired-state lists
//!
//! Every entry is handled independently:
//! - a memo keyed by `(entry, applied)` turns a repeated pass into a no-op
//!   as long as the applied content (points, placement) is unchanged;
//! - operations on one entry are serialized, and a completion that a newer
//!   direction has overtaken is not memoized;
//! - failed loads are retried on later passes with exponential backoff until
//!   the attempt budget is spent.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use scenelink_core::{
    DesiredEntry, DesiredImage360, DesiredPointsOfInterest, DesiredSecondaryModel, EntryKey,
    Image360Handle, ModelHandle, PointOfInterest, Transform,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ReconcileConfig;
use crate::overlay::{OverlayError, OverlayTool};
use crate::viewer::{LoadedModel, Viewer, ViewerError};

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Viewer error: {0}")]
    ViewerError(#[from] ViewerError),
    #[error("Overlay error: {0}")]
    OverlayError(#[from] OverlayError),
}

/// Desired-state lists owned by the UI
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredScene {
    #[serde(default)]
    pub secondary_models: Vec<DesiredSecondaryModel>,
    #[serde(default)]
    pub images360: Vec<DesiredImage360>,
    #[serde(default)]
    pub points_of_interest: Vec<DesiredPointsOfInterest>,
}

impl DesiredScene {
    /// Copy of the lists without any secondary entry for `handle`
    pub fn without_model(&self, handle: ModelHandle) -> DesiredScene {
        DesiredScene {
            secondary_models: self
                .secondary_models
                .iter()
                .filter(|m| m.handle() != handle)
                .cloned()
                .collect(),
            ..self.clone()
        }
    }
}

/// Why an entry is not in its desired state after a pass
#[derive(Debug, Clone, PartialEq)]
pub struct EntryFailure {
    pub key: EntryKey,
    pub error: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
    /// No further attempts are made until [`SceneReconciler::retry_failed`]
    pub gave_up: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub loaded: Vec<EntryKey>,
    pub unloaded: Vec<EntryKey>,
    pub unchanged: Vec<EntryKey>,
    /// Completed operations overtaken by a newer direction
    pub superseded: Vec<EntryKey>,
    /// Failed entries still waiting for their retry delay
    pub deferred: Vec<EntryKey>,
    pub failed: Vec<EntryFailure>,
}

impl ReconcileReport {
    /// True when the pass touched the scene
    pub fn changed(&self) -> bool {
        !self.loaded.is_empty() || !self.unloaded.is_empty()
    }

    pub fn is_converged(&self) -> bool {
        self.superseded.is_empty() && self.deferred.is_empty() && self.failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Resource {
    Model(ModelHandle),
    Image360(Image360Handle, Option<Transform>),
    Points(String, Vec<PointOfInterest>),
}

impl Resource {
    fn key(&self) -> EntryKey {
        match self {
            Self::Model(h) => EntryKey::SecondaryModel(*h),
            Self::Image360(h, _) => EntryKey::Image360(h.clone()),
            Self::Points(id, _) => EntryKey::PointsOfInterest(id.clone()),
        }
    }
}

enum EntryOutcome {
    Loaded(EntryKey),
    Unloaded(EntryKey),
    Unchanged(EntryKey),
    Superseded(EntryKey),
    Deferred(EntryKey),
    Failed(EntryFailure),
}

#[derive(Debug, Clone)]
struct FailureState {
    attempts: u32,
    next_retry_at: Instant,
    last_error: String,
    failed_at: DateTime<Utc>,
}

#[derive(Default)]
struct ReconcileState {
    memo: HashSet<(EntryKey, bool)>,
    latest: HashMap<EntryKey, bool>,
    slots: HashMap<EntryKey, Arc<Mutex<()>>>,
    failures: HashMap<EntryKey, FailureState>,
    /// What each applied entry was loaded with
    content: HashMap<EntryKey, Resource>,
    models: Vec<LoadedModel>,
    images360: Vec<Image360Handle>,
}

impl ReconcileState {
    fn is_present(&self, key: &EntryKey, overlay: &OverlayTool) -> bool {
        match key {
            EntryKey::SecondaryModel(h) => self.models.iter().any(|m| m.handle == *h),
            EntryKey::Image360(h) => self.images360.contains(h),
            EntryKey::PointsOfInterest(id) => overlay.has_collection(id),
        }
    }

    /// Loaded, but with different content than `resource`
    fn is_stale(&self, resource: &Resource) -> bool {
        self.content
            .get(&resource.key())
            .map_or(false, |loaded| loaded != resource)
    }
}

pub struct SceneReconciler {
    viewer: Arc<dyn Viewer>,
    overlay: Arc<Mutex<OverlayTool>>,
    config: ReconcileConfig,
    station_epsilon_sq: f64,
    state: Mutex<ReconcileState>,
}

impl SceneReconciler {
    pub fn new(
        viewer: Arc<dyn Viewer>,
        overlay: Arc<Mutex<OverlayTool>>,
        config: ReconcileConfig,
        station_epsilon_sq: f64,
    ) -> Self {
        Self {
            viewer,
            overlay,
            config,
            station_epsilon_sq,
            state: Mutex::new(ReconcileState::default()),
        }
    }

    /// Run one reconciliation pass over every entry of `desired`.
    ///
    /// Loaded entries that no longer appear in the lists are unloaded.
    pub async fn reconcile(&self, desired: &DesiredScene) -> ReconcileReport {
        let entries = self.plan(desired).await;
        let outcomes = join_all(
            entries
                .into_iter()
                .map(|(resource, applied)| self.reconcile_entry(resource, applied)),
        )
        .await;

        let mut report = ReconcileReport::default();
        for outcome in outcomes {
            match outcome {
                EntryOutcome::Loaded(k) => report.loaded.push(k),
                EntryOutcome::Unloaded(k) => report.unloaded.push(k),
                EntryOutcome::Unchanged(k) => report.unchanged.push(k),
                EntryOutcome::Superseded(k) => report.superseded.push(k),
                EntryOutcome::Deferred(k) => report.deferred.push(k),
                EntryOutcome::Failed(f) => report.failed.push(f),
            }
        }
        if report.changed() || !report.failed.is_empty() {
            info!(
                loaded = report.loaded.len(),
                unloaded = report.unloaded.len(),
                failed = report.failed.len(),
                deferred = report.deferred.len(),
                "Reconciliation pass finished"
            );
        }
        report
    }

    /// Forget failure history so failed entries are retried on the next pass
    pub async fn retry_failed(&self) {
        let mut state = self.state.lock().await;
        let keys: Vec<_> = state.failures.keys().cloned().collect();
        for key in &keys {
            state.memo.remove(&(key.clone(), true));
            state.memo.remove(&(key.clone(), false));
        }
        state.failures.clear();
        debug!(entries = keys.len(), "Cleared reconciliation failures");
    }

    /// Drop a loaded secondary model from the bookkeeping without unloading
    /// it, handing its ownership to the caller
    pub async fn forget_model(&self, handle: ModelHandle) -> Option<LoadedModel> {
        let mut state = self.state.lock().await;
        let key = EntryKey::SecondaryModel(handle);
        state.memo.remove(&(key.clone(), true));
        state.memo.remove(&(key.clone(), false));
        state.latest.remove(&key);
        state.failures.remove(&key);
        state.content.remove(&key);
        let index = state.models.iter().position(|m| m.handle == handle)?;
        let model = state.models.remove(index);
        debug!(model = %handle, "Released secondary model");
        Some(model)
    }

    /// Secondary models loaded by the reconciler, in load order
    pub async fn loaded_models(&self) -> Vec<LoadedModel> {
        self.state.lock().await.models.clone()
    }

    pub async fn loaded_images360(&self) -> Vec<Image360Handle> {
        self.state.lock().await.images360.clone()
    }

    async fn plan(&self, desired: &DesiredScene) -> Vec<(Resource, bool)> {
        let mut entries: Vec<(Resource, bool)> = Vec::new();
        let mut listed = HashSet::new();

        for m in &desired.secondary_models {
            if listed.insert(m.key()) {
                entries.push((Resource::Model(m.handle()), m.applied()));
            }
        }
        for i in &desired.images360 {
            if listed.insert(i.key()) {
                entries.push((Resource::Image360(i.handle(), i.transform), i.applied()));
            }
        }
        for p in &desired.points_of_interest {
            if listed.insert(p.key()) {
                entries.push((Resource::Points(p.id.clone(), p.points.clone()), p.applied()));
            }
        }

        // Anything loaded but no longer listed goes away
        let state = self.state.lock().await;
        for m in &state.models {
            if !listed.contains(&EntryKey::SecondaryModel(m.handle)) {
                entries.push((Resource::Model(m.handle), false));
            }
        }
        for site in &state.images360 {
            if !listed.contains(&EntryKey::Image360(site.clone())) {
                entries.push((Resource::Image360(site.clone(), None), false));
            }
        }
        drop(state);
        for id in self.overlay.lock().await.collection_ids() {
            if !listed.contains(&EntryKey::PointsOfInterest(id.clone())) {
                entries.push((Resource::Points(id, Vec::new()), false));
            }
        }
        entries
    }

    async fn reconcile_entry(&self, resource: Resource, applied: bool) -> EntryOutcome {
        let key = resource.key();

        let slot = {
            let mut state = self.state.lock().await;
            if state.memo.contains(&(key.clone(), applied)) {
                if !applied || !state.is_stale(&resource) {
                    return EntryOutcome::Unchanged(key);
                }
                state.memo.remove(&(key.clone(), true));
            }
            state.memo.remove(&(key.clone(), !applied));
            state.latest.insert(key.clone(), applied);
            state.slots.entry(key.clone()).or_default().clone()
        };
        let _slot = slot.lock().await;

        let stale = {
            let overlay = self.overlay.lock().await;
            let mut state = self.state.lock().await;
            if state.latest.get(&key) != Some(&applied) {
                debug!(entry = %key, applied, "Operation superseded before it started");
                return EntryOutcome::Superseded(key);
            }
            let present = state.is_present(&key, &overlay);
            let stale = applied && present && state.is_stale(&resource);
            if present == applied && !stale {
                if applied {
                    state
                        .content
                        .entry(key.clone())
                        .or_insert_with(|| resource.clone());
                }
                state.memo.insert((key.clone(), applied));
                state.failures.remove(&key);
                return EntryOutcome::Unchanged(key);
            }
            if let Some(failure) = state.failures.get(&key) {
                if failure.attempts >= self.config.max_attempts {
                    return EntryOutcome::Failed(EntryFailure {
                        key,
                        error: failure.last_error.clone(),
                        attempts: failure.attempts,
                        failed_at: failure.failed_at,
                        gave_up: true,
                    });
                }
                if Instant::now() < failure.next_retry_at {
                    return EntryOutcome::Deferred(key);
                }
            }
            stale
        };

        let result = if stale {
            self.reload(&resource).await
        } else if applied {
            self.apply(&resource).await
        } else {
            self.unapply(&resource).await
        };

        let mut state = self.state.lock().await;
        match result {
            Ok(loaded) => {
                match (loaded, &resource) {
                    (Some(model), _) => {
                        if !state.models.contains(&model) {
                            state.models.push(model);
                        }
                    }
                    (None, Resource::Image360(site, _)) if applied => {
                        if !state.images360.contains(site) {
                            state.images360.push(site.clone());
                        }
                    }
                    (None, Resource::Model(h)) => state.models.retain(|m| m.handle != *h),
                    (None, Resource::Image360(site, _)) => state.images360.retain(|s| s != site),
                    (None, Resource::Points(..)) => {}
                }
                if applied {
                    state.content.insert(key.clone(), resource.clone());
                } else {
                    state.content.remove(&key);
                }
                state.failures.remove(&key);
                if state.latest.get(&key) == Some(&applied) {
                    state.memo.insert((key.clone(), applied));
                } else {
                    debug!(entry = %key, applied, "Completed operation was superseded");
                }
                if applied {
                    EntryOutcome::Loaded(key)
                } else {
                    EntryOutcome::Unloaded(key)
                }
            }
            Err(e) => {
                let previous = state.failures.get(&key).map_or(0, |f| f.attempts);
                let attempts = previous + 1;
                let failure = FailureState {
                    attempts,
                    next_retry_at: Instant::now() + self.config.retry_delay(attempts),
                    last_error: e.to_string(),
                    failed_at: Utc::now(),
                };
                let gave_up = attempts >= self.config.max_attempts;
                warn!(entry = %key, applied, attempts, gave_up, error = %e, "Reconciliation failed");
                let report = EntryFailure {
                    key: key.clone(),
                    error: failure.last_error.clone(),
                    attempts,
                    failed_at: failure.failed_at,
                    gave_up,
                };
                state.failures.insert(key, failure);
                EntryOutcome::Failed(report)
            }
        }
    }

    /// Load one resource; returns the loaded model for model entries
    async fn apply(&self, resource: &Resource) -> Result<Option<LoadedModel>, ReconcileError> {
        match resource {
            Resource::Model(handle) => {
                let model = self.viewer.load_model(*handle).await?;
                info!(model = %handle, kind = ?model.kind, "Loaded secondary model");
                Ok(Some(model))
            }
            Resource::Image360(site, transform) => {
                let stations = self
                    .viewer
                    .load_image360(site.clone(), *transform)
                    .await?;
                info!(site = %site, stations = stations.len(), "Loaded 360 image set");

                let camera = self.viewer.camera().position;
                let current = stations
                    .iter()
                    .find(|s| s.position.distance_squared(camera) < self.station_epsilon_sq);
                if let Some(station) = current {
                    if let Err(e) = self
                        .viewer
                        .enter_image360_station(site.clone(), station.id.clone())
                        .await
                    {
                        warn!(site = %site, station = %station.id, error = %e, "Failed to enter station");
                    }
                }
                Ok(None)
            }
            Resource::Points(id, points) => {
                self.overlay.lock().await.add_collection(id, points)?;
                Ok(None)
            }
        }
    }

    /// Replace a loaded resource whose content changed
    async fn reload(&self, resource: &Resource) -> Result<Option<LoadedModel>, ReconcileError> {
        let key = resource.key();
        debug!(entry = %key, "Content changed, reloading");
        self.unapply(resource).await?;
        {
            let mut state = self.state.lock().await;
            state.content.remove(&key);
            if let Resource::Image360(site, _) = resource {
                state.images360.retain(|s| s != site);
            }
        }
        self.apply(resource).await
    }

    async fn unapply(&self, resource: &Resource) -> Result<Option<LoadedModel>, ReconcileError> {
        match resource {
            Resource::Model(handle) => {
                self.viewer.unload_model(*handle).await?;
                info!(model = %handle, "Unloaded secondary model");
            }
            Resource::Image360(site, _) => {
                self.viewer.unload_image360(site.clone()).await?;
                info!(site = %site, "Unloaded 360 image set");
            }
            Resource::Points(id, _) => {
                self.overlay.lock().await.remove_collection(id)?;
            }
        }
        Ok(None)
    }
}
