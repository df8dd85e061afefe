//! Shareable view state encoded as URL query parameters
//!
//! Scalars are written verbatim; composite values (`secondaryModels`,
//! `images360`, `viewerState`) are JSON-stringified. Only applied secondary
//! models and 360° collections are persisted, and decoding marks every
//! listed entry as applied.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::desired::{DesiredImage360, DesiredSecondaryModel};
use crate::geometry::CameraState;
use crate::handle::AssetId;

pub const KEY_VIEWER_STATE: &str = "viewerState";
pub const KEY_SLICING_STATE: &str = "slicingState";
pub const KEY_SELECTED_ASSET: &str = "selectedAssetId";
pub const KEY_EXPANDED: &str = "expanded";
pub const KEY_HIGHLIGHT_MODE: &str = "hl_mode";
pub const KEY_SECONDARY_MODELS: &str = "secondaryModels";
pub const KEY_REVISION: &str = "revisionId";
pub const KEY_IMAGES_360: &str = "images360";

#[derive(Error, Debug)]
pub enum UrlStateError {
    #[error("Invalid number for {key}: {value}")]
    InvalidNumber { key: &'static str, value: String },

    #[error("Invalid boolean for {key}: {value}")]
    InvalidBool { key: &'static str, value: String },

    #[error("Invalid JSON for {key}: {source}")]
    InvalidJson {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Persisted camera (and future viewer) state
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera: Option<CameraState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecondaryModelParam {
    model_id: i64,
    revision_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Image360Param {
    site_id: String,
}

/// Everything needed to reproduce a 3D view from a link
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewUrlState {
    pub revision_id: Option<i64>,
    pub selected_asset_id: Option<AssetId>,
    pub expanded: bool,
    pub highlight_mode: bool,
    pub secondary_models: Vec<DesiredSecondaryModel>,
    pub images360: Vec<DesiredImage360>,
    pub viewer_state: Option<ViewerState>,
    /// Opaque slicing planes state, passed through untouched
    pub slicing_state: Option<String>,
}

impl ViewUrlState {
    /// Encode as a query string (without the leading `?`)
    pub fn to_query(&self) -> String {
        let mut out = url::form_urlencoded::Serializer::new(String::new());

        if let Some(revision_id) = self.revision_id {
            out.append_pair(KEY_REVISION, &revision_id.to_string());
        }
        if let Some(asset_id) = self.selected_asset_id {
            out.append_pair(KEY_SELECTED_ASSET, &asset_id.to_string());
        }
        if self.expanded {
            out.append_pair(KEY_EXPANDED, "true");
        }
        if self.highlight_mode {
            out.append_pair(KEY_HIGHLIGHT_MODE, "true");
        }

        let models: Vec<_> = self
            .secondary_models
            .iter()
            .filter(|m| m.applied)
            .map(|m| SecondaryModelParam {
                model_id: m.model_id,
                revision_id: m.revision_id,
            })
            .collect();
        if !models.is_empty() {
            if let Ok(json) = serde_json::to_string(&models) {
                out.append_pair(KEY_SECONDARY_MODELS, &json);
            }
        }

        let images: Vec<_> = self
            .images360
            .iter()
            .filter(|i| i.applied)
            .map(|i| Image360Param {
                site_id: i.site_id.clone(),
            })
            .collect();
        if !images.is_empty() {
            if let Ok(json) = serde_json::to_string(&images) {
                out.append_pair(KEY_IMAGES_360, &json);
            }
        }

        if let Some(viewer_state) = &self.viewer_state {
            if let Ok(json) = serde_json::to_string(viewer_state) {
                out.append_pair(KEY_VIEWER_STATE, &json);
            }
        }
        if let Some(slicing) = &self.slicing_state {
            out.append_pair(KEY_SLICING_STATE, slicing);
        }

        out.finish()
    }

    /// Decode from a query string; a leading `?` is accepted and unknown keys are ignored
    pub fn from_query(query: &str) -> Result<Self, UrlStateError> {
        let query = query.strip_prefix('?').unwrap_or(query);
        let mut state = ViewUrlState::default();

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match &*key {
                KEY_REVISION => state.revision_id = Some(parse_number(KEY_REVISION, &value)?),
                KEY_SELECTED_ASSET => {
                    state.selected_asset_id = Some(parse_number(KEY_SELECTED_ASSET, &value)?)
                }
                KEY_EXPANDED => state.expanded = parse_bool(KEY_EXPANDED, &value)?,
                KEY_HIGHLIGHT_MODE => {
                    state.highlight_mode = parse_bool(KEY_HIGHLIGHT_MODE, &value)?
                }
                KEY_SECONDARY_MODELS => {
                    let models: Vec<SecondaryModelParam> =
                        parse_json(KEY_SECONDARY_MODELS, &value)?;
                    state.secondary_models = models
                        .into_iter()
                        .map(|m| DesiredSecondaryModel::new(m.model_id, m.revision_id, true))
                        .collect();
                }
                KEY_IMAGES_360 => {
                    let images: Vec<Image360Param> = parse_json(KEY_IMAGES_360, &value)?;
                    state.images360 = images
                        .into_iter()
                        .map(|i| DesiredImage360::new(i.site_id, true))
                        .collect();
                }
                KEY_VIEWER_STATE => {
                    state.viewer_state = Some(parse_json(KEY_VIEWER_STATE, &value)?)
                }
                KEY_SLICING_STATE => state.slicing_state = Some(value.into_owned()),
                _ => {}
            }
        }

        Ok(state)
    }
}

fn parse_number(key: &'static str, value: &str) -> Result<i64, UrlStateError> {
    value
        .trim()
        .parse()
        .map_err(|_| UrlStateError::InvalidNumber {
            key,
            value: value.to_string(),
        })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, UrlStateError> {
    match value.trim() {
        "true" | "1" => Ok(true),
        "false" | "0" | "" => Ok(false),
        other => Err(UrlStateError::InvalidBool {
            key,
            value: other.to_string(),
        }),
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(
    key: &'static str,
    value: &str,
) -> Result<T, UrlStateError> {
    serde_json::from_str(value).map_err(|source| UrlStateError::InvalidJson { key, source })
}
