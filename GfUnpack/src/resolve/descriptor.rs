//! Required image descriptors
//!
//! Descriptors come from the upstream prefab reader as a JSON array:
//!
//! ```json
//! [{"ownerName": "M4A1", "index": 0, "colorPathId": 10, "alphaPathId": 11}]
//! ```

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

fn default_scale() -> f32 {
    1.0
}

/// One image a downstream consumer needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequiredImageDescriptor {
    /// Character or owner the image belongs to
    pub owner_name: String,
    /// Position within the owner's image list
    pub index: u32,
    pub color_path_id: i64,
    /// 0 when the descriptor has no separate mask
    #[serde(default)]
    pub alpha_path_id: i64,
    #[serde(default)]
    pub display_name: String,
    #[serde(default = "default_scale")]
    pub scale: f32,
    #[serde(default)]
    pub offset_x: f32,
    #[serde(default)]
    pub offset_y: f32,
}

impl RequiredImageDescriptor {
    /// Descriptor with only the identifying fields set
    #[must_use]
    pub fn new(owner_name: impl Into<String>, index: u32, color_path_id: i64, alpha_path_id: i64) -> Self {
        Self {
            owner_name: owner_name.into(),
            index,
            color_path_id,
            alpha_path_id,
            display_name: String::new(),
            scale: default_scale(),
            offset_x: 0.0,
            offset_y: 0.0,
        }
    }

    /// Result map key, `{owner}/{index}`
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/{}", self.owner_name, self.index)
    }

    /// Output directory relative to the output root
    #[must_use]
    pub fn output_dir(&self) -> String {
        self.owner_name.to_lowercase()
    }

    #[must_use]
    pub fn has_alpha(&self) -> bool {
        self.alpha_path_id != 0
    }
}

/// The descriptors of one run and the path ids they reference
#[derive(Debug, Clone, Default)]
pub struct RequirementSet {
    descriptors: Vec<RequiredImageDescriptor>,
    ids: BTreeSet<i64>,
}

impl RequirementSet {
    #[must_use]
    pub fn from_descriptors(descriptors: Vec<RequiredImageDescriptor>) -> Self {
        let ids = descriptors
            .iter()
            .flat_map(|d| [d.color_path_id, d.alpha_path_id])
            .filter(|id| *id != 0)
            .collect();
        Self { descriptors, ids }
    }

    /// Read a JSON array of descriptors
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not a descriptor array.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let descriptors: Vec<RequiredImageDescriptor> = serde_json::from_str(&text)?;
        Ok(Self::from_descriptors(descriptors))
    }

    #[must_use]
    pub fn descriptors(&self) -> &[RequiredImageDescriptor] {
        &self.descriptors
    }

    /// Every non-zero color or alpha path id, ascending
    #[must_use]
    pub fn ids(&self) -> &BTreeSet<i64> {
        &self.ids
    }

    #[must_use]
    pub fn is_color_id(&self, id: i64) -> bool {
        self.descriptors.iter().any(|d| d.color_path_id == id)
    }

    /// Descriptors that reference `id` as their alpha companion
    pub fn referencing_alpha(&self, id: i64) -> impl Iterator<Item = &RequiredImageDescriptor> {
        self.descriptors.iter().filter(move |d| d.alpha_path_id == id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_descriptor_json() {
        let json = r#"[
            {"ownerName": "M4A1", "index": 0, "colorPathId": 10, "alphaPathId": 11, "displayName": "M4A1", "scale": 0.5},
            {"ownerName": "M4A1", "index": 1, "colorPathId": 12}
        ]"#;
        let descriptors: Vec<RequiredImageDescriptor> = serde_json::from_str(json).unwrap();
        assert_eq!(descriptors[0].key(), "M4A1/0");
        assert_eq!(descriptors[0].output_dir(), "m4a1");
        assert_eq!(descriptors[1].alpha_path_id, 0);
        assert!((descriptors[1].scale - 1.0).abs() < f32::EPSILON);

        let set = RequirementSet::from_descriptors(descriptors);
        assert_eq!(set.ids().iter().copied().collect::<Vec<_>>(), vec![10, 11, 12]);
        assert!(set.is_color_id(12));
        assert!(!set.is_color_id(11));
        assert_eq!(set.referencing_alpha(11).count(), 1);
    }
}
