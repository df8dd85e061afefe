//! Style directives and the pure selection → style resolution table

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::handle::AssetId;

/// 8-bit RGB color, serialized as `#rrggbb`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    /// Parse `#rrggbb` (leading `#` optional)
    pub fn from_hex(s: &str) -> Option<Self> {
        let s = s.trim().trim_start_matches('#');
        if s.len() != 6 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let r = u8::from_str_radix(s.get(0..2)?, 16).ok()?;
        let g = u8::from_str_radix(s.get(2..4)?, 16).ok()?;
        let b = u8::from_str_radix(s.get(4..6)?, 16).ok()?;
        Some(Self(r, g, b))
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }
}

impl Serialize for Rgb {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Rgb {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Rgb::from_hex(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid color: {}", s)))
    }
}

/// How a node collection, annotation or whole model is drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "color", rename_all = "lowercase")]
pub enum Appearance {
    Default,
    Highlighted,
    Ghosted,
    Color(Rgb),
}

/// The main effect of a directive on one model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "assetId", rename_all = "lowercase")]
pub enum StyleKind {
    /// Untouched default appearance
    Default,
    /// The asset's geometry is highlighted
    Highlighted(AssetId),
    /// Everything is ghosted; the asset (if any) keeps its default look
    Ghosted(Option<AssetId>),
}

/// The single style active on a loaded model.
///
/// `dim_unmapped` is the inverted selector: everything except the
/// asset-mapped geometry is dimmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleDirective {
    pub kind: StyleKind,
    pub dim_unmapped: bool,
}

impl StyleDirective {
    pub const DEFAULT: StyleDirective = StyleDirective {
        kind: StyleKind::Default,
        dim_unmapped: false,
    };

    pub fn new(kind: StyleKind, dim_unmapped: bool) -> Self {
        Self { kind, dim_unmapped }
    }

    pub fn is_default(&self) -> bool {
        *self == Self::DEFAULT
    }
}

impl Default for StyleDirective {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Selection and mode flags that drive styling
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StylingInputs {
    pub selected_asset_id: Option<AssetId>,
    pub asset_details_expanded: bool,
    pub asset_highlight_mode: bool,
    pub labels_visibility: bool,
}

/// Resolved styling for every loaded model plus the overlay tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StylePlan {
    /// Directive for the primary model or 360° collection
    pub primary: StyleDirective,
    /// Directive for every loaded secondary model
    pub secondary: StyleDirective,
    /// Whether the overlay tool is visible
    pub overlay_visible: bool,
    /// Whether per-asset label overlays should be populated
    pub asset_labels: bool,
}

impl StylingInputs {
    /// Map the inputs to a style plan.
    ///
    /// | selected | expanded | primary                                 |
    /// |----------|----------|-----------------------------------------|
    /// | set      | true     | Ghosted(asset), overlay hidden          |
    /// | set      | false    | Highlighted(asset), dim if highlight mode |
    /// | unset    | any      | Default, dim if highlight mode          |
    pub fn resolve(&self) -> StylePlan {
        match (self.selected_asset_id, self.asset_details_expanded) {
            (Some(asset_id), true) => StylePlan {
                primary: StyleDirective::new(StyleKind::Ghosted(Some(asset_id)), false),
                secondary: StyleDirective::new(StyleKind::Ghosted(None), false),
                overlay_visible: false,
                asset_labels: false,
            },
            (Some(asset_id), false) => StylePlan {
                primary: StyleDirective::new(
                    StyleKind::Highlighted(asset_id),
                    self.asset_highlight_mode,
                ),
                secondary: StyleDirective::DEFAULT,
                overlay_visible: self.labels_visibility,
                asset_labels: self.asset_highlight_mode && self.labels_visibility,
            },
            (None, _) => StylePlan {
                primary: StyleDirective::new(StyleKind::Default, self.asset_highlight_mode),
                secondary: StyleDirective::DEFAULT,
                overlay_visible: self.labels_visibility,
                asset_labels: self.asset_highlight_mode && self.labels_visibility,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_expanded_selection_ghosts_everything() {
        let plan = StylingInputs {
            selected_asset_id: Some(7),
            asset_details_expanded: true,
            asset_highlight_mode: true,
            labels_visibility: true,
        }
        .resolve();

        assert_eq!(plan.primary.kind, StyleKind::Ghosted(Some(7)));
        assert!(!plan.primary.dim_unmapped);
        assert_eq!(plan.secondary.kind, StyleKind::Ghosted(None));
        assert!(!plan.overlay_visible);
        assert!(!plan.asset_labels);
    }

    #[test]
    fn test_collapsed_selection_highlights() {
        let plan = StylingInputs {
            selected_asset_id: Some(7),
            asset_details_expanded: false,
            asset_highlight_mode: true,
            labels_visibility: false,
        }
        .resolve();

        assert_eq!(
            plan.primary,
            StyleDirective::new(StyleKind::Highlighted(7), true)
        );
        assert!(plan.secondary.is_default());
        assert!(!plan.overlay_visible);
    }

    #[test]
    fn test_no_selection() {
        let plain = StylingInputs::default().resolve();
        assert!(plain.primary.is_default());
        assert!(!plain.overlay_visible);

        let highlight = StylingInputs {
            asset_highlight_mode: true,
            labels_visibility: true,
            ..Default::default()
        }
        .resolve();
        assert_eq!(highlight.primary, StyleDirective::new(StyleKind::Default, true));
        assert!(highlight.overlay_visible);
        assert!(highlight.asset_labels);
    }

    #[test]
    fn test_rgb_hex() {
        assert_eq!(Rgb::from_hex("#111111"), Some(Rgb(17, 17, 17)));
        assert_eq!(Rgb::from_hex("4d6af2"), Some(Rgb(77, 106, 242)));
        assert_eq!(Rgb::from_hex("#12"), None);
        assert_eq!(Rgb::from_hex("+1+1+1"), None);
        assert_eq!(Rgb(77, 106, 242).to_hex(), "#4d6af2");
    }

    #[test]
    fn test_rgb_hex_rejects_multibyte_input() {
        // Six bytes, but not six hex digits
        assert_eq!(Rgb::from_hex("a\u{e9}\u{e9}a"), None);
        assert!(serde_json::from_str::<Rgb>("\"a\u{e9}\u{e9}a\"").is_err());
    }

    #[test]
    fn test_appearance_json() {
        let json = serde_json::to_string(&Appearance::Color(Rgb(17, 17, 17))).unwrap();
        assert_eq!(json, r##"{"type":"color","color":"#111111"}"##);
        let back: Appearance = serde_json::from_str(r#"{"type":"ghosted"}"#).unwrap();
        assert_eq!(back, Appearance::Ghosted);
    }
}
