//! Identifiers for loaded 3D resources

use serde::{Deserialize, Serialize};

/// Internal id of a business asset
pub type AssetId = i64;

/// Internal id of a node in a CAD model's hierarchy
pub type NodeId = i64;

/// Internal id of an annotation (point-cloud bounding volume or 360° image link)
pub type AnnotationId = i64;

/// Identifies a CAD or point-cloud model revision.
///
/// Handles are immutable once created and are used as cache and
/// reconciliation keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelHandle {
    pub model_id: i64,
    pub revision_id: i64,
}

impl ModelHandle {
    pub fn new(model_id: i64, revision_id: i64) -> Self {
        Self {
            model_id,
            revision_id,
        }
    }
}

impl std::fmt::Display for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.model_id, self.revision_id)
    }
}

/// Identifies a 360° image collection by its site
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image360Handle {
    pub site_id: String,
}

impl Image360Handle {
    pub fn new(site_id: impl Into<String>) -> Self {
        Self {
            site_id: site_id.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.site_id
    }
}

impl std::fmt::Display for Image360Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.site_id)
    }
}

/// Geometry type of a loaded model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Triangulated CAD model, styled by node collections
    Cad,
    /// Point cloud, styled by bounding-volume annotations
    PointCloud,
}

/// Anything the engine can compute asset mappings for
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MappingTarget {
    Cad(ModelHandle),
    PointCloud(ModelHandle),
    Image360(Image360Handle),
}

impl MappingTarget {
    /// Target for a loaded model of the given kind
    pub fn for_model(handle: ModelHandle, kind: ModelKind) -> Self {
        match kind {
            ModelKind::Cad => Self::Cad(handle),
            ModelKind::PointCloud => Self::PointCloud(handle),
        }
    }

    /// Model handle, if this target is a CAD or point-cloud model
    pub fn model(&self) -> Option<ModelHandle> {
        match self {
            Self::Cad(h) | Self::PointCloud(h) => Some(*h),
            Self::Image360(_) => None,
        }
    }
}

impl std::fmt::Display for MappingTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cad(h) => write!(f, "cad:{}", h),
            Self::PointCloud(h) => write!(f, "pointcloud:{}", h),
            Self::Image360(h) => write!(f, "image360:{}", h),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_handle_display() {
        let handle = ModelHandle::new(1, 10);
        assert_eq!(handle.to_string(), "1/10");
    }

    #[test]
    fn test_model_handle_serializes_camel_case() {
        let json = serde_json::to_string(&ModelHandle::new(3, 4)).unwrap();
        assert_eq!(json, r#"{"modelId":3,"revisionId":4}"#);
    }

    #[test]
    fn test_mapping_target_for_model() {
        let handle = ModelHandle::new(7, 8);
        assert_eq!(
            MappingTarget::for_model(handle, ModelKind::PointCloud),
            MappingTarget::PointCloud(handle)
        );
        assert_eq!(MappingTarget::Cad(handle).model(), Some(handle));
        assert_eq!(MappingTarget::Image360(Image360Handle::new("site")).model(), None);
    }
}
