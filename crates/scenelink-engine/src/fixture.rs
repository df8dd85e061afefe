//! JSON dataset describing models, assets, annotations and 360° sites
//!
//! A fixture backs both the in-memory resource API and the headless viewer,
//! so a recorded dataset can be replayed without a network or a renderer.

use scenelink_core::{Image360Handle, ModelHandle, ModelKind};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::api::{AnnotationRecord, AssetMappingRecord, AssetRecord, Image360AssetLink, NodeRecord};
use crate::viewer::Image360Station;

#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    ParseError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fixture {
    #[serde(default)]
    pub assets: Vec<AssetRecord>,
    #[serde(default)]
    pub models: Vec<ModelFixture>,
    #[serde(default)]
    pub annotations: Vec<AnnotationRecord>,
    #[serde(default)]
    pub images360: Vec<Image360Fixture>,
}

/// A model revision with its node hierarchy and asset mappings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelFixture {
    pub model_id: i64,
    pub revision_id: i64,
    pub kind: ModelKind,
    /// Unsupported models fail to load in the headless viewer
    #[serde(default = "default_true")]
    pub supported: bool,
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub mappings: Vec<AssetMappingRecord>,
}

impl ModelFixture {
    pub fn handle(&self) -> ModelHandle {
        ModelHandle::new(self.model_id, self.revision_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image360Fixture {
    pub site_id: String,
    #[serde(default = "default_true")]
    pub supported: bool,
    #[serde(default)]
    pub stations: Vec<Image360Station>,
    #[serde(default)]
    pub asset_links: Vec<Image360AssetLink>,
}

impl Image360Fixture {
    pub fn handle(&self) -> Image360Handle {
        Image360Handle::new(self.site_id.clone())
    }
}

fn default_true() -> bool {
    true
}

impl Fixture {
    pub fn from_json(json: &str) -> Result<Self, FixtureError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, FixtureError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn model(&self, handle: ModelHandle) -> Option<&ModelFixture> {
        self.models.iter().find(|m| m.handle() == handle)
    }

    pub fn image360(&self, site: &Image360Handle) -> Option<&Image360Fixture> {
        self.images360.iter().find(|i| i.site_id == site.site_id)
    }
}

#[cfg(test)]
pub(crate) mod sample {
    //! Shared dataset for engine tests
    //!
    //! Model 1/10 (CAD) hierarchy, node id = tree index:
    //!
    //! ```text
    //! 100 root (depth 0, mapped to 900)
    //! └── 101 area (depth 1, mapped to 901 "Pump-12A")
    //!     └── 102 skid (depth 2)
    //!         └── 103 flange (depth 3)
    //! 104 (depth 1, mapped to 902 "Valve-7")
    //! ```
    //!
    //! Mapping records also contain one without a tree index (105), a
    //! duplicate of 104 and a mapping of 102 to an asset that no longer exists.
    //!
    //! Model 2/20 is a point cloud with volumes for 901 and 902.
    //! Model 3/30 is an unsupported CAD model. Site "north" is a 360° set.

    use super::*;

    pub const SAMPLE_JSON: &str = r#"{
        "assets": [
            { "id": 900, "name": "Plant", "description": "Root asset" },
            { "id": 901, "name": "Pump-12A", "description": "Cooling water pump" },
            { "id": 902, "name": "Valve-7" }
        ],
        "models": [
            {
                "modelId": 1, "revisionId": 10, "kind": "cad",
                "nodes": [
                    { "id": 100, "treeIndex": 100, "depth": 0, "name": "root",
                      "boundingBox": { "min": { "x": -10.0, "y": -10.0, "z": -10.0 }, "max": { "x": 10.0, "y": 10.0, "z": 10.0 } } },
                    { "id": 101, "treeIndex": 101, "parentId": 100, "depth": 1, "name": "area",
                      "boundingBox": { "min": { "x": 0.0, "y": 0.0, "z": 0.0 }, "max": { "x": 2.0, "y": 2.0, "z": 2.0 } } },
                    { "id": 102, "treeIndex": 102, "parentId": 101, "depth": 2, "name": "skid",
                      "boundingBox": { "min": { "x": 0.0, "y": 0.0, "z": 0.0 }, "max": { "x": 1.0, "y": 1.0, "z": 1.0 } } },
                    { "id": 103, "treeIndex": 103, "parentId": 102, "depth": 3, "name": "flange",
                      "boundingBox": { "min": { "x": 0.0, "y": 0.0, "z": 0.0 }, "max": { "x": 0.5, "y": 0.5, "z": 0.5 } } },
                    { "id": 104, "treeIndex": 104, "parentId": 100, "depth": 1, "name": "valve",
                      "boundingBox": { "min": { "x": 4.0, "y": 0.0, "z": 0.0 }, "max": { "x": 6.0, "y": 2.0, "z": 2.0 } } }
                ],
                "mappings": [
                    { "nodeId": 100, "assetId": 900, "treeIndex": 100 },
                    { "nodeId": 101, "assetId": 901, "treeIndex": 101 },
                    { "nodeId": 104, "assetId": 902, "treeIndex": 104 },
                    { "nodeId": 105, "assetId": 903 },
                    { "nodeId": 104, "assetId": 902, "treeIndex": 104 },
                    { "nodeId": 102, "assetId": 777, "treeIndex": 102 }
                ]
            },
            { "modelId": 2, "revisionId": 20, "kind": "pointcloud" },
            { "modelId": 3, "revisionId": 30, "kind": "cad", "supported": false }
        ],
        "annotations": [
            { "id": 5001, "annotatedResourceId": 2, "annotatedResourceType": "threedmodel",
              "annotationType": "pointcloud.BoundingVolume", "assetRef": 901,
              "boundingBox": { "min": { "x": 1.0, "y": 1.0, "z": 1.0 }, "max": { "x": 3.0, "y": 3.0, "z": 3.0 } } },
            { "id": 5002, "annotatedResourceId": 2, "annotatedResourceType": "threedmodel",
              "annotationType": "pointcloud.BoundingVolume", "assetRef": 902 },
            { "id": 5003, "annotatedResourceId": 2, "annotatedResourceType": "threedmodel",
              "annotationType": "pointcloud.Other", "assetRef": 902 }
        ],
        "images360": [
            {
                "siteId": "north",
                "stations": [
                    { "id": "station-1", "position": { "x": 0.0, "y": 1.5, "z": 0.0 } },
                    { "id": "station-2", "position": { "x": 5.0, "y": 1.5, "z": 0.0 } }
                ],
                "assetLinks": [
                    { "annotationId": 7001, "assetId": 901 },
                    { "annotationId": 7002, "assetId": 901 },
                    { "annotationId": 7003, "assetId": 902 }
                ]
            },
            { "siteId": "broken", "supported": false }
        ]
    }"#;

    pub fn sample() -> Fixture {
        Fixture::from_json(SAMPLE_JSON).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::sample::sample;
    use super::*;

    #[test]
    fn test_sample_parses() {
        let fixture = sample();
        assert_eq!(fixture.assets.len(), 3);
        let cad = fixture.model(ModelHandle::new(1, 10)).unwrap();
        assert_eq!(cad.kind, ModelKind::Cad);
        assert!(cad.supported);
        assert!(!fixture.model(ModelHandle::new(3, 30)).unwrap().supported);
        assert_eq!(
            fixture
                .image360(&Image360Handle::new("north"))
                .unwrap()
                .stations
                .len(),
            2
        );
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("fixture.json");
        std::fs::write(&path, super::sample::SAMPLE_JSON).unwrap();
        let fixture = Fixture::load(&path).unwrap();
        assert_eq!(fixture.models.len(), 3);
    }
}
