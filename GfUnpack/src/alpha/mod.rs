//! Alpha mask matching
//!
//! Color textures and their alpha masks are stored as separate objects. The
//! matcher pairs them with an ordered chain of rules; the first rule that
//! yields a candidate wins:
//!
//! 0. the alpha path id given by the descriptor, if it is a distinct mask
//! 1. `{name}_alpha` among the masks decoded from the same bundles
//! 2. `{name}_alpha` among every mask in the index
//! 3. rules 1 and 2 again with a trailing `_<digits>` stripped from `name`
//! 4. the override table
//!
//! Names compare case-insensitively. When several candidates qualify at the
//! same rule, the lexicographically smallest name wins.

mod overrides;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::bundle::DecodedImage;
use crate::index::ImageRecord;

pub use overrides::{OverrideTable, OverrideTarget};

/// Suffix that marks an alpha mask
pub const ALPHA_SUFFIX: &str = "_alpha";

/// Whether `name` ends in `_alpha` (any case)
#[must_use]
pub fn is_alpha_name(name: &str) -> bool {
    name.len() > ALPHA_SUFFIX.len()
        && name
            .get(name.len() - ALPHA_SUFFIX.len()..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(ALPHA_SUFFIX))
}

/// Lowercased mask name for a color image name
#[must_use]
pub fn alpha_name_for(name: &str) -> String {
    format!("{}{ALPHA_SUFFIX}", name.to_lowercase())
}

/// Color image name a mask belongs to (`foo_Alpha` -> `foo`)
#[must_use]
pub fn color_name_for(alpha_name: &str) -> Option<&str> {
    if is_alpha_name(alpha_name) {
        alpha_name.get(..alpha_name.len() - ALPHA_SUFFIX.len())
    } else {
        None
    }
}

/// Strip a trailing `_<digits>` (`pic_foo_2` -> `pic_foo`)
#[must_use]
pub fn strip_numeric_suffix(name: &str) -> Option<&str> {
    let (base, digits) = name.rsplit_once('_')?;
    if !base.is_empty() && !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        Some(base)
    } else {
        None
    }
}

/// Alpha masks decoded alongside the required images
#[derive(Debug, Clone, Default)]
pub struct ImageGroup {
    /// Lowercased name -> candidates, sorted by name then bundle
    masks: BTreeMap<String, Vec<Arc<DecodedImage>>>,
}

impl ImageGroup {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mask; non-mask images are ignored
    pub fn insert(&mut self, image: Arc<DecodedImage>) {
        if !image.is_alpha_mask() {
            return;
        }
        let candidates = self.masks.entry(image.name.to_lowercase()).or_default();
        if candidates
            .iter()
            .any(|c| c.path_id == image.path_id && c.bundle == image.bundle)
        {
            return;
        }
        candidates.push(image);
        candidates.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.bundle.cmp(&b.bundle)));
    }

    /// Best mask named `alpha_name` (compared case-insensitively)
    #[must_use]
    pub fn find(&self, alpha_name: &str) -> Option<&Arc<DecodedImage>> {
        self.masks.get(&alpha_name.to_lowercase()).and_then(|c| c.first())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.masks.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }
}

/// Every `_alpha` texture in the index, by lowercased name
#[derive(Debug, Clone, Default)]
pub struct AlphaCatalog {
    masks: BTreeMap<String, Vec<ImageRecord>>,
}

impl AlphaCatalog {
    /// Build from index records; records without the mask suffix are skipped
    #[must_use]
    pub fn from_records(records: impl IntoIterator<Item = ImageRecord>) -> Self {
        let mut masks: BTreeMap<String, Vec<ImageRecord>> = BTreeMap::new();
        for record in records {
            if is_alpha_name(&record.name) {
                masks.entry(record.name.to_lowercase()).or_default().push(record);
            }
        }
        for candidates in masks.values_mut() {
            candidates.sort_by(|a, b| {
                a.name
                    .cmp(&b.name)
                    .then_with(|| a.bundle.cmp(&b.bundle))
                    .then_with(|| a.path_id.cmp(&b.path_id))
            });
        }
        Self { masks }
    }

    #[must_use]
    pub fn find(&self, alpha_name: &str) -> Option<&ImageRecord> {
        self.masks.get(&alpha_name.to_lowercase()).and_then(|c| c.first())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.masks.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }
}

/// Rule that produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum MatchRule {
    Descriptor,
    Group,
    Catalog,
    NumericSuffix,
    Override,
}

impl MatchRule {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Descriptor => "descriptor alpha",
            Self::Group => "same bundle",
            Self::Catalog => "index catalog",
            Self::NumericSuffix => "numeric suffix stripped",
            Self::Override => "override table",
        }
    }
}

/// Where the matched mask comes from
#[derive(Debug, Clone)]
pub enum AlphaSource {
    /// Already decoded
    Decoded(Arc<DecodedImage>),
    /// Indexed but not yet decoded
    Indexed(ImageRecord),
    /// Object name to look up in the index
    Named(String),
    /// Output path of an image written earlier in the run
    Output(String),
}

/// A matched mask
#[derive(Debug, Clone)]
pub struct AlphaMatch {
    pub rule: MatchRule,
    pub source: AlphaSource,
}

/// One color image to find a mask for
#[derive(Debug, Clone, Copy)]
pub struct MatchQuery<'a> {
    pub color: &'a DecodedImage,
    /// Output path of the color image (`{owner dir}/{name}.png`)
    pub output_path: &'a str,
    /// The descriptor's alpha companion, if it resolved
    pub explicit_alpha: Option<&'a Arc<DecodedImage>>,
}

/// The rule chain over precomputed lookup structures
#[derive(Debug, Clone, Default)]
pub struct AlphaMatcher {
    group: ImageGroup,
    catalog: AlphaCatalog,
    overrides: OverrideTable,
}

impl AlphaMatcher {
    #[must_use]
    pub fn new(group: ImageGroup, catalog: AlphaCatalog, overrides: OverrideTable) -> Self {
        Self {
            group,
            catalog,
            overrides,
        }
    }

    #[must_use]
    pub fn group(&self) -> &ImageGroup {
        &self.group
    }

    /// Find the mask for a color image, or `None` if no rule applies
    #[must_use]
    pub fn find_alpha(&self, query: &MatchQuery<'_>) -> Option<AlphaMatch> {
        let color = query.color;

        if let Some(explicit) = query.explicit_alpha
            && explicit.path_id != color.path_id
            && explicit.is_alpha_mask()
        {
            return Some(AlphaMatch {
                rule: MatchRule::Descriptor,
                source: AlphaSource::Decoded(Arc::clone(explicit)),
            });
        }

        if let Some(found) = self.by_name(&color.name, MatchRule::Group, MatchRule::Catalog) {
            return Some(found);
        }

        if let Some(base) = strip_numeric_suffix(&color.name)
            && let Some(found) = self.by_name(base, MatchRule::NumericSuffix, MatchRule::NumericSuffix)
        {
            return Some(found);
        }

        self.overrides.get(query.output_path).map(|target| AlphaMatch {
            rule: MatchRule::Override,
            source: match target {
                OverrideTarget::Asset(name) => AlphaSource::Named(name.clone()),
                OverrideTarget::Output(path) => AlphaSource::Output(path.clone()),
            },
        })
    }

    fn by_name(&self, name: &str, group_rule: MatchRule, catalog_rule: MatchRule) -> Option<AlphaMatch> {
        let alpha_name = alpha_name_for(name);
        if let Some(mask) = self.group.find(&alpha_name) {
            return Some(AlphaMatch {
                rule: group_rule,
                source: AlphaSource::Decoded(Arc::clone(mask)),
            });
        }
        self.catalog.find(&alpha_name).map(|record| AlphaMatch {
            rule: catalog_rule,
            source: AlphaSource::Indexed(record.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::ImageKind;
    use image::RgbaImage;
    use pretty_assertions::assert_eq;

    fn image(path_id: i64, name: &str, bundle: &str) -> Arc<DecodedImage> {
        Arc::new(DecodedImage {
            path_id,
            name: name.to_string(),
            kind: ImageKind::Texture2D,
            bundle: bundle.to_string(),
            container: String::new(),
            pixels: RgbaImage::new(1, 1),
        })
    }

    fn record(path_id: i64, name: &str, bundle: &str) -> ImageRecord {
        ImageRecord {
            path_id,
            name: name.to_string(),
            kind: ImageKind::Texture2D,
            width: 1,
            height: 1,
            bundle: bundle.to_string(),
            container: String::new(),
        }
    }

    fn matched_name(m: &AlphaMatch) -> String {
        match &m.source {
            AlphaSource::Decoded(img) => img.name.clone(),
            AlphaSource::Indexed(rec) => rec.name.clone(),
            AlphaSource::Named(name) | AlphaSource::Output(name) => name.clone(),
        }
    }

    fn query<'a>(color: &'a DecodedImage, output_path: &'a str) -> MatchQuery<'a> {
        MatchQuery {
            color,
            output_path,
            explicit_alpha: None,
        }
    }

    #[test]
    fn test_name_helpers() {
        assert!(is_alpha_name("pic_foo_Alpha"));
        assert!(!is_alpha_name("_alpha"));
        assert!(!is_alpha_name("pic_foo"));
        assert_eq!(color_name_for("pic_foo_Alpha"), Some("pic_foo"));
        assert_eq!(strip_numeric_suffix("pic_foo_12"), Some("pic_foo"));
        assert_eq!(strip_numeric_suffix("pic_foo_d"), None);
        assert_eq!(strip_numeric_suffix("_3"), None);
    }

    #[test]
    fn test_exact_match_beats_numeric_suffix() {
        let mut group = ImageGroup::new();
        group.insert(image(2, "foo_alpha", "b1"));
        group.insert(image(3, "foo_1_alpha", "b1"));
        let matcher = AlphaMatcher::new(group, AlphaCatalog::default(), OverrideTable::default());

        let color = image(1, "foo_1", "b1");
        let found = matcher.find_alpha(&query(&color, "foo/foo_1.png")).unwrap();
        assert_eq!(found.rule, MatchRule::Group);
        assert_eq!(matched_name(&found), "foo_1_alpha");

        let color = image(4, "foo_2", "b1");
        let found = matcher.find_alpha(&query(&color, "foo/foo_2.png")).unwrap();
        assert_eq!(found.rule, MatchRule::NumericSuffix);
        assert_eq!(matched_name(&found), "foo_alpha");
    }

    #[test]
    fn test_tie_break_is_lexicographic() {
        let mut group = ImageGroup::new();
        group.insert(image(5, "foo_alpha", "b2"));
        group.insert(image(6, "foo_Alpha", "b1"));
        group.insert(image(7, "foo_ALPHA", "b3"));
        let matcher = AlphaMatcher::new(group, AlphaCatalog::default(), OverrideTable::default());

        let color = image(1, "Foo", "b1");
        let found = matcher.find_alpha(&query(&color, "foo/Foo.png")).unwrap();
        assert_eq!(matched_name(&found), "foo_ALPHA");
    }

    #[test]
    fn test_group_beats_catalog_and_catalog_is_used() {
        let mut group = ImageGroup::new();
        group.insert(image(2, "foo_alpha", "b1"));
        let catalog = AlphaCatalog::from_records([
            record(20, "foo_alpha", "other"),
            record(21, "bar_alpha", "other"),
            record(22, "bar", "other"),
        ]);
        assert_eq!(catalog.len(), 2);
        let matcher = AlphaMatcher::new(group, catalog, OverrideTable::default());

        let foo = image(1, "foo", "b1");
        assert_eq!(matcher.find_alpha(&query(&foo, "foo/foo.png")).unwrap().rule, MatchRule::Group);

        let bar = image(3, "bar", "b1");
        let found = matcher.find_alpha(&query(&bar, "bar/bar.png")).unwrap();
        assert_eq!(found.rule, MatchRule::Catalog);
        assert!(matches!(found.source, AlphaSource::Indexed(ref r) if r.path_id == 21));
    }

    #[test]
    fn test_explicit_alpha_comes_first() {
        let mut group = ImageGroup::new();
        group.insert(image(2, "foo_alpha", "b1"));
        let matcher = AlphaMatcher::new(group, AlphaCatalog::default(), OverrideTable::default());

        let color = image(1, "foo", "b1");
        let explicit = image(9, "foo_special_alpha", "b1");
        let found = matcher
            .find_alpha(&MatchQuery {
                color: &color,
                output_path: "foo/foo.png",
                explicit_alpha: Some(&explicit),
            })
            .unwrap();
        assert_eq!(found.rule, MatchRule::Descriptor);
        assert_eq!(matched_name(&found), "foo_special_alpha");

        // A color-only descriptor alpha is not a mask
        let same = image(1, "foo", "b1");
        let found = matcher
            .find_alpha(&MatchQuery {
                color: &color,
                output_path: "foo/foo.png",
                explicit_alpha: Some(&same),
            })
            .unwrap();
        assert_eq!(found.rule, MatchRule::Group);
    }

    #[test]
    fn test_override_is_last_resort() {
        let matcher = AlphaMatcher::new(
            ImageGroup::new(),
            AlphaCatalog::default(),
            OverrideTable::bundled().unwrap(),
        );
        let color = image(1, "AR18_N_1", "b1");
        let found = matcher.find_alpha(&query(&color, "ar18/AR18_N_1.png")).unwrap();
        assert_eq!(found.rule, MatchRule::Override);
        assert_eq!(matched_name(&found), "ar18/AR18_N_0.png");

        let color = image(1, "nothing", "b1");
        assert!(matcher.find_alpha(&query(&color, "x/nothing.png")).is_none());
    }
}
