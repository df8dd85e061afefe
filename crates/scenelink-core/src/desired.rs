//! Desired scene state as declared by the UI
//!
//! Desired entries are owned by the UI state and are read-only to the engine.
//! Each entry carries an `applied` flag; the reconciler converges the loaded
//! scene toward the `applied = true` subset.

use serde::{Deserialize, Serialize};

use crate::geometry::{Transform, Vec3};
use crate::handle::{Image360Handle, ModelHandle};

/// A secondary CAD/point-cloud model the user may toggle on top of the primary one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredSecondaryModel {
    pub model_id: i64,
    pub revision_id: i64,
    #[serde(default)]
    pub applied: bool,
}

impl DesiredSecondaryModel {
    pub fn new(model_id: i64, revision_id: i64, applied: bool) -> Self {
        Self {
            model_id,
            revision_id,
            applied,
        }
    }

    pub fn handle(&self) -> ModelHandle {
        ModelHandle::new(self.model_id, self.revision_id)
    }
}

/// A 360° image collection the user may toggle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredImage360 {
    pub site_id: String,
    #[serde(default)]
    pub applied: bool,
    /// Placement of the whole collection in model space; a change reloads it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<Transform>,
}

impl DesiredImage360 {
    pub fn new(site_id: impl Into<String>, applied: bool) -> Self {
        Self {
            site_id: site_id.into(),
            applied,
            transform: None,
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn handle(&self) -> Image360Handle {
        Image360Handle::new(self.site_id.clone())
    }
}

/// A single point of interest, rendered as an overlay indicator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointOfInterest {
    pub position: Vec3,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub file_ids: Vec<i64>,
}

/// A collection of points of interest the user may toggle as a whole
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredPointsOfInterest {
    pub id: String,
    #[serde(default)]
    pub applied: bool,
    #[serde(default)]
    pub points: Vec<PointOfInterest>,
}

impl DesiredPointsOfInterest {
    pub fn new(id: impl Into<String>, applied: bool, points: Vec<PointOfInterest>) -> Self {
        Self {
            id: id.into(),
            applied,
            points,
        }
    }
}

/// Key of one reconcilable desired-state entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "camelCase")]
pub enum EntryKey {
    SecondaryModel(ModelHandle),
    Image360(Image360Handle),
    PointsOfInterest(String),
}

impl std::fmt::Display for EntryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SecondaryModel(h) => write!(f, "model:{}", h),
            Self::Image360(h) => write!(f, "image360:{}", h),
            Self::PointsOfInterest(id) => write!(f, "poi:{}", id),
        }
    }
}

/// Common view over the three desired-state entry types
pub trait DesiredEntry {
    fn key(&self) -> EntryKey;
    fn applied(&self) -> bool;
}

impl DesiredEntry for DesiredSecondaryModel {
    fn key(&self) -> EntryKey {
        EntryKey::SecondaryModel(self.handle())
    }

    fn applied(&self) -> bool {
        self.applied
    }
}

impl DesiredEntry for DesiredImage360 {
    fn key(&self) -> EntryKey {
        EntryKey::Image360(self.handle())
    }

    fn applied(&self) -> bool {
        self.applied
    }
}

impl DesiredEntry for DesiredPointsOfInterest {
    fn key(&self) -> EntryKey {
        EntryKey::PointsOfInterest(self.id.clone())
    }

    fn applied(&self) -> bool {
        self.applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desired_model_defaults_to_unapplied() {
        let model: DesiredSecondaryModel =
            serde_json::from_str(r#"{"modelId":1,"revisionId":10}"#).unwrap();
        assert!(!model.applied);
        assert_eq!(model.key(), EntryKey::SecondaryModel(ModelHandle::new(1, 10)));
    }

    #[test]
    fn test_image360_transform_is_optional() {
        let plain: DesiredImage360 = serde_json::from_str(r#"{"siteId":"north"}"#).unwrap();
        assert_eq!(plain.transform, None);
        assert_eq!(serde_json::to_string(&plain).unwrap(), r#"{"siteId":"north","applied":false}"#);

        let moved = DesiredImage360::new("north", true)
            .with_transform(Transform::translation(Vec3::new(0.0, 0.0, 5.0)));
        let json = serde_json::to_string(&moved).unwrap();
        let back: DesiredImage360 = serde_json::from_str(&json).unwrap();
        assert_eq!(back, moved);
        assert_eq!(back.key(), plain.key());
    }

    #[test]
    fn test_entry_key_display() {
        assert_eq!(
            DesiredImage360::new("site-a", true).key().to_string(),
            "image360:site-a"
        );
        assert_eq!(
            DesiredPointsOfInterest::new("poi-1", false, Vec::new())
                .key()
                .to_string(),
            "poi:poi-1"
        );
    }
}
