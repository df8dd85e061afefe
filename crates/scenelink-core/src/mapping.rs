//! Asset ↔ geometry mappings, normalized across CAD, point-cloud and 360° sources

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::geometry::BoundingBox;
use crate::handle::{AnnotationId, AssetId, NodeId};
use crate::search::SearchSignature;

/// One page of a cursor-paginated listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next_cursor: Option<String>) -> Self {
        Self { items, next_cursor }
    }

    /// A single page with no continuation
    pub fn last(items: Vec<T>) -> Self {
        Self::new(items, None)
    }

    pub fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self::last(Vec::new())
    }
}

/// Which piece of geometry a mapping points at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MappingSource {
    /// CAD node, addressed by node id and render tree index
    #[serde(rename_all = "camelCase")]
    Node {
        node_id: NodeId,
        tree_index: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bounding_box: Option<BoundingBox>,
    },
    /// Point-cloud bounding volume or 360° image annotation
    #[serde(rename_all = "camelCase")]
    Annotation {
        annotation_id: AnnotationId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bounding_box: Option<BoundingBox>,
    },
}

/// Identity of the mapped geometry, used to detect duplicate entries across pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GeometryKey {
    Node(NodeId),
    Annotation(AnnotationId),
}

impl MappingSource {
    pub fn key(&self) -> GeometryKey {
        match self {
            Self::Node { node_id, .. } => GeometryKey::Node(*node_id),
            Self::Annotation { annotation_id, .. } => GeometryKey::Annotation(*annotation_id),
        }
    }

    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            Self::Node { node_id, .. } => Some(*node_id),
            Self::Annotation { .. } => None,
        }
    }

    pub fn tree_index(&self) -> Option<i64> {
        match self {
            Self::Node { tree_index, .. } => Some(*tree_index),
            Self::Annotation { .. } => None,
        }
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        match self {
            Self::Node { bounding_box, .. } | Self::Annotation { bounding_box, .. } => *bounding_box,
        }
    }

    pub fn annotation_id(&self) -> Option<AnnotationId> {
        match self {
            Self::Annotation { annotation_id, .. } => Some(*annotation_id),
            Self::Node { .. } => None,
        }
    }
}

/// A piece of 3D geometry paired with the business asset it represents
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetNodeMapping {
    pub source: MappingSource,
    pub asset_id: AssetId,
    pub asset_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_description: Option<String>,
    #[serde(skip)]
    pub search_signature: SearchSignature,
}

impl AssetNodeMapping {
    pub fn new(
        source: MappingSource,
        asset_id: AssetId,
        asset_name: impl Into<String>,
        asset_description: Option<String>,
    ) -> Self {
        let asset_name = asset_name.into();
        let search_signature =
            SearchSignature::for_asset(&asset_name, asset_description.as_deref());
        Self {
            source,
            asset_id,
            asset_name,
            asset_description,
            search_signature,
        }
    }

    pub fn matches(&self, query: &SearchSignature) -> bool {
        self.search_signature.matches(query)
    }
}

/// Drop later entries that map the same geometry, keeping the first occurrence
pub fn dedup_by_geometry(mappings: Vec<AssetNodeMapping>) -> Vec<AssetNodeMapping> {
    let mut seen = HashSet::new();
    mappings
        .into_iter()
        .filter(|m| seen.insert(m.source.key()))
        .collect()
}

/// Keep only the first mapping of every asset, preserving order
pub fn dedup_by_asset(mappings: &[AssetNodeMapping]) -> Vec<AssetNodeMapping> {
    let mut seen = HashSet::new();
    mappings
        .iter()
        .filter(|m| seen.insert(m.asset_id))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(node_id: NodeId, asset_id: AssetId, name: &str) -> AssetNodeMapping {
        AssetNodeMapping::new(
            MappingSource::Node {
                node_id,
                tree_index: node_id * 10,
                bounding_box: None,
            },
            asset_id,
            name,
            None,
        )
    }

    #[test]
    fn test_dedup_by_geometry_keeps_first() {
        let mappings = vec![node(1, 100, "A"), node(2, 100, "A"), node(1, 200, "B")];
        let deduped = dedup_by_geometry(mappings);
        let ids: Vec<_> = deduped.iter().map(|m| (m.source.key(), m.asset_id)).collect();
        assert_eq!(
            ids,
            vec![(GeometryKey::Node(1), 100), (GeometryKey::Node(2), 100)]
        );
    }

    #[test]
    fn test_dedup_by_asset_preserves_order() {
        let mappings = vec![node(1, 300, "C"), node(2, 100, "A"), node(3, 300, "C")];
        let deduped = dedup_by_asset(&mappings);
        let assets: Vec<_> = deduped.iter().map(|m| m.asset_id).collect();
        assert_eq!(assets, vec![300, 100]);
    }

    #[test]
    fn test_mapping_search_signature() {
        let m = AssetNodeMapping::new(
            MappingSource::Annotation {
                annotation_id: 5,
                bounding_box: None,
            },
            42,
            "Pump-12A",
            Some("Cooling water".to_string()),
        );
        assert!(m.matches(&SearchSignature::new("pump water")));
        assert_eq!(m.source.annotation_id(), Some(5));
        assert_eq!(m.source.node_id(), None);
    }
}
