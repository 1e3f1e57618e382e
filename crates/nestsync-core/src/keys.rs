//! Composite field keys for flattened repeater forms.
//!
//! A nested tree of repeater rows is rendered as a flat form. Every leaf field
//! is named `blocks[<relation>-<childId>][<attribute>]`, optionally followed by
//! `[<locale>]`, and every nested repeater list is keyed
//! `blocks-<relation>-<childId>_<repeater>`. These strings are the wire
//! contract with the form layer; this module builds and parses them.

use crate::persistence::{Fields, RowId};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// `images-9`
pub fn block_id(relation: &str, id: RowId) -> String {
    format!("{relation}-{id}")
}

/// `blocks[images-9][caption]`
pub fn field_name(relation: &str, id: RowId, attribute: &str) -> String {
    format!("blocks[{relation}-{id}][{attribute}]")
}

/// `blocks[images-9][caption][en]`
pub fn localized_field_name(relation: &str, id: RowId, attribute: &str, locale: &str) -> String {
    format!("blocks[{relation}-{id}][{attribute}][{locale}]")
}

/// Prefix applied to repeater keys nested under one child: `blocks-images-9_`.
pub fn nested_prefix(relation: &str, id: RowId) -> String {
    format!("blocks-{relation}-{id}_")
}

/// `blocks-images-9_tags`
pub fn nested_repeater_key(relation: &str, id: RowId, repeater: &str) -> String {
    format!("{}{repeater}", nested_prefix(relation, id))
}

fn field_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^blocks\[([^\[\]]+)\]\[([^\[\]]+)\](?:\[([^\[\]]+)\])?$")
            .expect("composite field regex must compile")
    })
}

/// A parsed `blocks[...]` field name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeKey {
    /// `<relation>-<childId>` (or `<relation>-<token>` for unsaved rows).
    pub block: String,
    pub attribute: String,
    pub locale: Option<String>,
}

impl CompositeKey {
    pub fn parse(name: &str) -> Option<Self> {
        let captures = field_name_re().captures(name)?;
        Some(Self {
            block: captures.get(1)?.as_str().to_string(),
            attribute: captures.get(2)?.as_str().to_string(),
            locale: captures.get(3).map(|m| m.as_str().to_string()),
        })
    }

    /// Split the block into relation and persisted id, when the suffix is
    /// numeric.
    pub fn relation_and_id(&self) -> Option<(&str, RowId)> {
        let (relation, id) = self.block.rsplit_once('-')?;
        Some((relation, id.parse().ok()?))
    }
}

/// Regroup a flat `blocks[...]` payload into one field map per block.
///
/// Localized keys collapse into `{ attribute: { locale: value } }`. Keys that
/// are not composite field names are ignored.
pub fn group_block_fields(flat: &Fields) -> BTreeMap<String, Fields> {
    let mut blocks: BTreeMap<String, Fields> = BTreeMap::new();
    for (name, value) in flat {
        let Some(key) = CompositeKey::parse(name) else {
            continue;
        };
        let block = blocks.entry(key.block).or_default();
        match key.locale {
            None => {
                block.insert(key.attribute, value.clone());
            }
            Some(locale) => {
                let slot = block
                    .entry(key.attribute)
                    .or_insert_with(|| Value::Object(Fields::new()));
                if !slot.is_object() {
                    *slot = Value::Object(Fields::new());
                }
                if let Value::Object(per_locale) = slot {
                    per_locale.insert(locale, value.clone());
                }
            }
        }
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builds_wire_names() {
        assert_eq!(field_name("images", RowId(9), "caption"), "blocks[images-9][caption]");
        assert_eq!(
            localized_field_name("images", RowId(9), "image", "fr"),
            "blocks[images-9][image][fr]"
        );
        assert_eq!(nested_repeater_key("images", RowId(9), "tags"), "blocks-images-9_tags");
        assert_eq!(block_id("images", RowId(9)), "images-9");
    }

    #[test]
    fn parses_plain_and_localized_names() {
        let key = CompositeKey::parse("blocks[images-9][caption]").expect("plain key");
        assert_eq!(key.block, "images-9");
        assert_eq!(key.attribute, "caption");
        assert_eq!(key.locale, None);
        assert_eq!(key.relation_and_id(), Some(("images", RowId(9))));

        let key = CompositeKey::parse("blocks[image-blocks-4][cover][en]").expect("localized key");
        assert_eq!(key.locale.as_deref(), Some("en"));
        assert_eq!(key.relation_and_id(), Some(("image-blocks", RowId(4))));
    }

    #[test]
    fn rejects_non_composite_names() {
        assert!(CompositeKey::parse("title").is_none());
        assert!(CompositeKey::parse("blocks[images-9]").is_none());
        assert!(CompositeKey::parse("blocks[a][b][c][d]").is_none());
    }

    #[test]
    fn groups_flat_payload_per_block() {
        let flat = match json!({
            "blocks[images-9][caption]": "Sunset",
            "blocks[images-9][image][en]": [1],
            "blocks[images-9][image][fr]": [2],
            "blocks[tags-4][label]": "sky",
            "title": "ignored",
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };

        let blocks = group_block_fields(&flat);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks["images-9"].get("caption"), Some(&json!("Sunset")));
        assert_eq!(
            blocks["images-9"].get("image"),
            Some(&json!({ "en": [1], "fr": [2] }))
        );
        assert_eq!(blocks["tags-4"].get("label"), Some(&json!("sky")));
    }
}
