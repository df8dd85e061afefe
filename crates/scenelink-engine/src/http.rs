//! REST implementation of [`ResourceApi`]
//!
//! Endpoints are resolved relative to `{base}/api/v1/projects/{project}/`.
//! 360° asset links are image annotations (`images.AssetLink`) on the files
//! of a site, so the file ids of each site are listed once and memoized.

use scenelink_core::{
    AnnotationId, AssetId, BoundingBox, Image360Handle, ModelHandle, NodeId, Page, Transform,
    Vec3,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::api::{
    AnnotationFilter, AnnotationRecord, ApiError, AssetMappingRecord, AssetRecord, BoxFuture,
    Image360AssetLink, MappingQuery, NodeRecord, ResourceApi,
};

const ANNOTATED_RESOURCE_FILE: &str = "file";
const ANNOTATION_TYPE_IMAGE_ASSET_LINK: &str = "images.AssetLink";
const SITE_ID_METADATA_KEY: &str = "site_id";
const FILE_PAGE_LIMIT: u32 = 1000;

pub struct HttpResourceApi {
    client: reqwest::Client,
    /// Project root, always ending in `/`
    base: Url,
    token: Option<String>,
    site_files: RwLock<HashMap<Image360Handle, Vec<i64>>>,
}

impl HttpResourceApi {
    /// Create a client for `project` on the service at `base_url`
    pub fn new(base_url: &str, project: &str, token: Option<String>) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        let base = Url::parse(base_url)?.join(&format!("api/v1/projects/{}/", project))?;

        Ok(Self {
            client,
            base,
            token,
            site_files: RwLock::new(HashMap::new()),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base.join(path)?)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header("x-request-id", Uuid::new_v4().to_string());
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        debug!(url = %url, "GET");
        let response = self.authorize(self.client.get(url.clone())).send().await?;
        Self::decode(url, response).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, url: Url, body: &B) -> Result<T, ApiError> {
        debug!(url = %url, "POST");
        let response = self
            .authorize(self.client.post(url.clone()).json(body))
            .send()
            .await?;
        Self::decode(url, response).await
    }

    async fn decode<T: DeserializeOwned>(url: Url, response: reqwest::Response) -> Result<T, ApiError> {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            warn!(url = %url, status = status.as_u16(), "Request failed");
            return Err(ApiError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.json::<T>().await?)
    }

    async fn list_annotation_page(
        &self,
        filter: WireAnnotationFilter,
        cursor: Option<String>,
        limit: u32,
    ) -> Result<Page<WireAnnotation>, ApiError> {
        let body = ListRequest {
            filter,
            cursor,
            limit,
        };
        let page: ItemsPage<WireAnnotation> =
            self.post(self.endpoint("annotations/list")?, &body).await?;
        Ok(Page::new(page.items, page.next_cursor))
    }

    /// File ids of the images of a 360° site
    async fn site_file_ids(&self, site: &Image360Handle) -> Result<Vec<i64>, ApiError> {
        if let Some(ids) = self.site_files.read().await.get(site) {
            return Ok(ids.clone());
        }

        let url = self.endpoint("files/list")?;
        let mut ids = Vec::new();
        let mut cursor = None;
        loop {
            let body = ListRequest {
                filter: FileFilter {
                    metadata: HashMap::from([(
                        SITE_ID_METADATA_KEY.to_string(),
                        site.site_id.clone(),
                    )]),
                },
                cursor,
                limit: FILE_PAGE_LIMIT,
            };
            let page: ItemsPage<WireFile> = self.post(url.clone(), &body).await?;
            ids.extend(page.items.iter().map(|f| f.id));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        debug!(site = %site, files = ids.len(), "Listed 360 image files");
        self.site_files.write().await.insert(site.clone(), ids.clone());
        Ok(ids)
    }

    fn image_link_filter(file_ids: Vec<i64>, asset_id: Option<AssetId>) -> WireAnnotationFilter {
        WireAnnotationFilter::from(AnnotationFilter {
            annotated_resource_type: ANNOTATED_RESOURCE_FILE.to_string(),
            annotation_type: ANNOTATION_TYPE_IMAGE_ASSET_LINK.to_string(),
            annotated_resource_ids: file_ids,
            asset_id,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListRequest<F> {
    filter: F,
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor: Option<String>,
    limit: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemsPage<T> {
    items: Vec<T>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct IdRef {
    id: i64,
}

#[derive(Serialize)]
struct FileFilter {
    metadata: HashMap<String, String>,
}

#[derive(Deserialize)]
struct WireFile {
    id: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireAnnotationFilter {
    annotated_resource_type: String,
    annotation_type: String,
    annotated_resource_ids: Vec<IdRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<WireAssetRefFilter>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireAssetRefFilter {
    asset_ref: IdRef,
}

impl From<AnnotationFilter> for WireAnnotationFilter {
    fn from(filter: AnnotationFilter) -> Self {
        Self {
            annotated_resource_type: filter.annotated_resource_type,
            annotation_type: filter.annotation_type,
            annotated_resource_ids: filter
                .annotated_resource_ids
                .into_iter()
                .map(|id| IdRef { id })
                .collect(),
            data: filter.asset_id.map(|id| WireAssetRefFilter {
                asset_ref: IdRef { id },
            }),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAnnotation {
    id: AnnotationId,
    annotated_resource_id: i64,
    annotated_resource_type: String,
    annotation_type: String,
    #[serde(default)]
    data: WireAnnotationData,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct WireAnnotationData {
    #[serde(default)]
    asset_ref: Option<IdRef>,
    #[serde(default)]
    region: Vec<WireRegion>,
}

#[derive(Deserialize)]
struct WireRegion {
    #[serde(default, rename = "box")]
    bbox: Option<WireBox>,
}

#[derive(Deserialize)]
struct WireBox {
    /// Row-major 4x4 transform of the unit cube centered at the origin
    matrix: Vec<f64>,
}

impl WireAnnotation {
    fn into_record(self) -> AnnotationRecord {
        let bounding_box = self
            .data
            .region
            .iter()
            .filter_map(|r| r.bbox.as_ref())
            .filter_map(|b| box_matrix_bounds(&b.matrix))
            .reduce(|a, b| a.union(&b));
        AnnotationRecord {
            id: self.id,
            annotated_resource_id: self.annotated_resource_id,
            annotated_resource_type: self.annotated_resource_type,
            annotation_type: self.annotation_type,
            asset_ref: self.data.asset_ref.map(|r| r.id),
            bounding_box,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireNode {
    id: NodeId,
    tree_index: i64,
    #[serde(default)]
    parent_id: Option<NodeId>,
    depth: u32,
    #[serde(default)]
    name: String,
    #[serde(default)]
    bounding_box: Option<WireBounds>,
}

#[derive(Deserialize)]
struct WireBounds {
    min: [f64; 3],
    max: [f64; 3],
}

impl From<WireNode> for NodeRecord {
    fn from(node: WireNode) -> Self {
        Self {
            id: node.id,
            tree_index: node.tree_index,
            parent_id: node.parent_id,
            depth: node.depth,
            name: node.name,
            bounding_box: node
                .bounding_box
                .map(|b| BoundingBox::from_arrays(b.min, b.max)),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AssetsByIdsRequest {
    items: Vec<IdRef>,
    ignore_unknown_ids: bool,
}

/// Axis-aligned bounds of a unit cube transformed by a row-major 4x4 matrix
fn box_matrix_bounds(matrix: &[f64]) -> Option<BoundingBox> {
    let transform = Transform::from_slice(matrix)?;
    let mut bounds = BoundingBox::empty();
    for &x in &[-0.5, 0.5] {
        for &y in &[-0.5, 0.5] {
            for &z in &[-0.5, 0.5] {
                let corner = transform.transform_point(Vec3::new(x, y, z));
                bounds = bounds.union(&BoundingBox::new(corner, corner));
            }
        }
    }
    Some(bounds)
}

fn mappings_path(model: ModelHandle) -> String {
    format!(
        "3d/models/{}/revisions/{}/mappings",
        model.model_id, model.revision_id
    )
}

impl ResourceApi for HttpResourceApi {
    fn list_asset_mappings(
        &self,
        model: ModelHandle,
        query: MappingQuery,
    ) -> BoxFuture<'_, Result<Page<AssetMappingRecord>, ApiError>> {
        Box::pin(async move {
            let mut url = self.endpoint(&mappings_path(model))?;
            {
                let mut pairs = url.query_pairs_mut();
                if let Some(cursor) = &query.cursor {
                    pairs.append_pair("cursor", cursor);
                }
                if let Some(limit) = query.limit {
                    pairs.append_pair("limit", &limit.to_string());
                }
                if let Some(node_id) = query.node_id {
                    pairs.append_pair("nodeId", &node_id.to_string());
                }
                if let Some(asset_id) = query.asset_id {
                    pairs.append_pair("assetId", &asset_id.to_string());
                }
            }
            let page: ItemsPage<AssetMappingRecord> = self.get(url).await?;
            Ok(Page::new(page.items, page.next_cursor))
        })
    }

    fn list_annotations(
        &self,
        filter: AnnotationFilter,
        cursor: Option<String>,
        limit: u32,
    ) -> BoxFuture<'_, Result<Page<AnnotationRecord>, ApiError>> {
        Box::pin(async move {
            let page = self
                .list_annotation_page(filter.into(), cursor, limit)
                .await?;
            let items = page.items.into_iter().map(WireAnnotation::into_record).collect();
            Ok(Page::new(items, page.next_cursor))
        })
    }

    fn list_node_ancestors(
        &self,
        model: ModelHandle,
        node_id: NodeId,
        limit: u32,
    ) -> BoxFuture<'_, Result<Vec<NodeRecord>, ApiError>> {
        Box::pin(async move {
            let mut url = self.endpoint(&format!(
                "3d/models/{}/revisions/{}/nodes/{}/ancestors",
                model.model_id, model.revision_id, node_id
            ))?;
            url.query_pairs_mut()
                .append_pair("limit", &limit.to_string());
            let page: ItemsPage<WireNode> = self.get(url).await?;
            let mut nodes: Vec<NodeRecord> = page.items.into_iter().map(NodeRecord::from).collect();
            nodes.sort_by_key(|n| n.depth);
            Ok(nodes)
        })
    }

    fn retrieve_assets(
        &self,
        ids: Vec<AssetId>,
        ignore_unknown_ids: bool,
    ) -> BoxFuture<'_, Result<Vec<AssetRecord>, ApiError>> {
        Box::pin(async move {
            let body = AssetsByIdsRequest {
                items: ids.into_iter().map(|id| IdRef { id }).collect(),
                ignore_unknown_ids,
            };
            let page: ItemsPage<AssetRecord> =
                self.post(self.endpoint("assets/byids")?, &body).await?;
            Ok(page.items)
        })
    }

    fn list_image360_asset_links(
        &self,
        site: Image360Handle,
        cursor: Option<String>,
        limit: u32,
    ) -> BoxFuture<'_, Result<Page<Image360AssetLink>, ApiError>> {
        Box::pin(async move {
            let files = self.site_file_ids(&site).await?;
            if files.is_empty() {
                return Ok(Page::last(Vec::new()));
            }
            let page = self
                .list_annotation_page(Self::image_link_filter(files, None), cursor, limit)
                .await?;
            let links = page
                .items
                .into_iter()
                .filter_map(|a| {
                    Some(Image360AssetLink {
                        annotation_id: a.id,
                        asset_id: a.data.asset_ref?.id,
                    })
                })
                .collect();
            Ok(Page::new(links, page.next_cursor))
        })
    }

    fn find_image360_annotations(
        &self,
        site: Image360Handle,
        asset_id: AssetId,
    ) -> BoxFuture<'_, Result<Vec<AnnotationId>, ApiError>> {
        Box::pin(async move {
            let files = self.site_file_ids(&site).await?;
            if files.is_empty() {
                return Ok(Vec::new());
            }
            let mut ids = Vec::new();
            let mut cursor = None;
            loop {
                let page = self
                    .list_annotation_page(
                        Self::image_link_filter(files.clone(), Some(asset_id)),
                        cursor,
                        FILE_PAGE_LIMIT,
                    )
                    .await?;
                ids.extend(page.items.iter().map(|a| a.id));
                match page.next_cursor {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
            }
            Ok(ids)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_endpoints_resolve_under_project() {
        let api = HttpResourceApi::new("https://api.example.com", "plant-a", None).unwrap();
        let url = api.endpoint(&mappings_path(ModelHandle::new(1, 10))).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/api/v1/projects/plant-a/3d/models/1/revisions/10/mappings"
        );
    }

    #[test]
    fn test_box_matrix_bounds() {
        // Scale 2 on x, translate by (10, 0, 0)
        let matrix = [
            2.0, 0.0, 0.0, 10.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ];
        let bounds = box_matrix_bounds(&matrix).unwrap();
        assert_eq!(bounds.min.to_array(), [9.0, -0.5, -0.5]);
        assert_eq!(bounds.max.to_array(), [11.0, 0.5, 0.5]);
        assert!(box_matrix_bounds(&[1.0; 3]).is_none());
    }

    #[test]
    fn test_wire_annotation_conversion() {
        let json = r#"{
            "id": 5001,
            "annotatedResourceId": 2,
            "annotatedResourceType": "threedmodel",
            "annotationType": "pointcloud.BoundingVolume",
            "data": {
                "assetRef": { "id": 901 },
                "region": [
                    { "box": { "matrix": [1,0,0,0, 0,1,0,0, 0,0,1,0, 0,0,0,1] } },
                    { "cylinder": { "centerA": [0,0,0], "centerB": [0,0,1], "radius": 1 } }
                ]
            }
        }"#;
        let wire: WireAnnotation = serde_json::from_str(json).unwrap();
        let record = wire.into_record();
        assert_eq!(record.asset_ref, Some(901));
        assert_eq!(
            record.bounding_box,
            Some(BoundingBox::from_arrays([-0.5, -0.5, -0.5], [0.5, 0.5, 0.5]))
        );
    }

    #[test]
    fn test_filter_serialization() {
        let filter: WireAnnotationFilter =
            AnnotationFilter::bounding_volumes(ModelHandle::new(2, 20), Some(901)).into();
        let json = serde_json::to_value(&filter).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "annotatedResourceType": "threedmodel",
                "annotationType": "pointcloud.BoundingVolume",
                "annotatedResourceIds": [{ "id": 2 }],
                "data": { "assetRef": { "id": 901 } }
            })
        );
    }

    #[test]
    fn test_wire_node_bounds() {
        let node: WireNode = serde_json::from_str(
            r#"{"id":7,"treeIndex":3,"depth":1,"boundingBox":{"min":[0,0,0],"max":[1,2,3]}}"#,
        )
        .unwrap();
        let record = NodeRecord::from(node);
        assert_eq!(
            record.bounding_box,
            Some(BoundingBox::from_arrays([0.0, 0.0, 0.0], [1.0, 2.0, 3.0]))
        );
    }
}
