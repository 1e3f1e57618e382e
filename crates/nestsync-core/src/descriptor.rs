//! Repeater descriptor resolution.
//!
//! A repeater is declared by a short name (`images`, `page_repeater`). The
//! relation it reconciles and the entity type it stores come from explicit
//! overrides when given, otherwise from naming convention:
//!
//! ```text
//! relation    = camelCase(name)          page_repeater -> pageRepeater
//! entity type = Studly(singular(name))   page_repeaters -> PageRepeater
//! ```
//!
//! Resolution is pure: no registry lookups happen here. Unknown names surface
//! when the catalog is validated or when a collaborator is first used.

use crate::persistence::RowId;
use convert_case::{Case, Casing};
use serde::{Deserialize, Serialize};

/// How a repeater's child rows hang off the parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelationKind {
    /// One-to-many through a `<parent>_id` foreign key.
    #[default]
    Plain,
    /// Association-table relation. Every submission recreates the children.
    ManyToMany {
        #[serde(default = "default_keep_existing")]
        keep_existing: bool,
    },
    /// One-to-many through `<morph>_type` / `<morph>_id` columns.
    Polymorphic {
        #[serde(default)]
        morph: Option<String>,
    },
}

fn default_keep_existing() -> bool {
    true
}

/// Explicit per-repeater overrides. Empty strings count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepeaterOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Fully resolved repeater: name, relation and target entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepeaterDescriptor {
    pub name: String,
    pub relation_name: String,
    pub target_entity_type: String,
}

impl RepeaterDescriptor {
    /// Prefix carried by client ids that point at existing rows
    /// (`images-` for relation `images`).
    pub fn id_prefix(&self) -> String {
        format!("{}-", self.relation_name)
    }

    /// Persisted id encoded in a relation-prefixed client id.
    ///
    /// Returns `None` when `client_id` is not prefixed with this relation.
    /// `Some(Err(..))` means the prefix matched but the suffix is not a row id.
    pub fn existing_row_id(
        &self,
        client_id: &str,
    ) -> Option<Result<RowId, std::num::ParseIntError>> {
        client_id
            .strip_prefix(self.relation_name.as_str())
            .and_then(|rest| rest.strip_prefix('-'))
            .map(str::parse)
    }

    /// Relation-prefixed client id for a persisted row (`images-42`).
    pub fn client_id_for(&self, id: RowId) -> String {
        format!("{}-{id}", self.relation_name)
    }
}

/// Resolve a repeater name plus optional overrides into a descriptor.
pub fn resolve(repeater_name: &str, overrides: &RepeaterOverrides) -> RepeaterDescriptor {
    let relation_name = non_empty(overrides.relation.as_deref())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| infer_relation(repeater_name));
    let target_entity_type = non_empty(overrides.model.as_deref())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| infer_entity_type(repeater_name));

    RepeaterDescriptor {
        name: repeater_name.to_string(),
        relation_name,
        target_entity_type,
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Lower camel case relation name (`user_groups` -> `userGroups`).
///
/// Only `_`, `-` and spaces separate words; letters inside a word keep their
/// case, so digits and acronyms survive (`image2s` -> `image2s`).
pub fn infer_relation(repeater_name: &str) -> String {
    let studly = studly(repeater_name);
    let mut chars = studly.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => studly,
    }
}

/// Singular upper camel case entity type (`article_types` -> `ArticleType`,
/// `HTMLBlocks` -> `HTMLBlock`).
pub fn infer_entity_type(repeater_name: &str) -> String {
    studly(&singular(repeater_name))
}

// First letter of every separator-delimited word upper-cased, the rest kept.
fn studly(name: &str) -> String {
    name.split(['_', '-', ' '])
        .flat_map(|word| {
            let mut chars = word.chars();
            let first = chars.next().into_iter().flat_map(char::to_uppercase);
            first.chain(chars)
        })
        .collect()
}

/// Foreign key column a parent of `entity_type` leaves on its children
/// (`ArticleType` -> `article_type_id`).
pub fn foreign_key_for(entity_type: &str) -> String {
    format!("{}_id", entity_type.to_case(Case::Snake))
}

/// Singularize the last word of an English identifier.
///
/// Regular plurals only. Anything irregular
/// should be spelled out with a `model` override.
pub fn singular(word: &str) -> String {
    const ES_SUFFIXES: [&str; 5] = ["sses", "xes", "ches", "shes", "zzes"];
    const KEEP_SUFFIXES: [&str; 3] = ["ss", "us", "is"];

    let lower = word.to_ascii_lowercase();
    if lower.len() > 3 && lower.ends_with("ies") {
        return format!("{}y", &word[..word.len() - 3]);
    }
    if ES_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix)) {
        return word[..word.len() - 2].to_string();
    }
    if KEEP_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix)) {
        return word.to_string();
    }
    if lower.len() > 1 && lower.ends_with('s') {
        return word[..word.len() - 1].to_string();
    }
    word.to_string()
}

/// The parent side of a relation being reconciled or projected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentRef {
    pub entity_type: String,
    pub id: RowId,
    /// Column on plain children pointing back to this parent.
    pub foreign_key: String,
}

impl ParentRef {
    pub fn new(entity_type: impl Into<String>, id: RowId) -> Self {
        let entity_type = entity_type.into();
        let foreign_key = foreign_key_for(&entity_type);
        Self {
            entity_type,
            id,
            foreign_key,
        }
    }

    pub fn with_foreign_key(mut self, foreign_key: impl Into<String>) -> Self {
        self.foreign_key = foreign_key.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_relation_and_entity_type_by_convention() {
        let descriptor = resolve("page_repeaters", &RepeaterOverrides::default());
        assert_eq!(descriptor.relation_name, "pageRepeaters");
        assert_eq!(descriptor.target_entity_type, "PageRepeater");
    }

    #[test]
    fn explicit_overrides_win() {
        let overrides = RepeaterOverrides {
            relation: Some("pages".to_string()),
            model: Some("Page".to_string()),
        };
        let descriptor = resolve("page_repeater", &overrides);
        assert_eq!(descriptor.relation_name, "pages");
        assert_eq!(descriptor.target_entity_type, "Page");
    }

    #[test]
    fn partial_and_blank_overrides_fall_back_per_field() {
        let overrides = RepeaterOverrides {
            relation: Some(" ".to_string()),
            model: Some("Photo".to_string()),
        };
        let descriptor = resolve("images", &overrides);
        assert_eq!(descriptor.relation_name, "images");
        assert_eq!(descriptor.target_entity_type, "Photo");
    }

    #[test]
    fn resolution_is_deterministic() {
        let overrides = RepeaterOverrides::default();
        assert_eq!(resolve("tasks", &overrides), resolve("tasks", &overrides));
    }

    #[test]
    fn singular_handles_regular_plurals() {
        assert_eq!(singular("categories"), "category");
        assert_eq!(singular("boxes"), "box");
        assert_eq!(singular("branches"), "branch");
        assert_eq!(singular("images"), "image");
        assert_eq!(singular("address"), "address");
        assert_eq!(singular("status"), "status");
        assert_eq!(singular("team"), "team");
    }

    #[test]
    fn existing_row_id_requires_relation_prefix() {
        let descriptor = resolve("images", &RepeaterOverrides::default());
        assert_eq!(
            descriptor.existing_row_id("images-12").map(Result::ok),
            Some(Some(RowId(12)))
        );
        assert!(descriptor.existing_row_id("tmp-x").is_none());
        assert!(descriptor.existing_row_id("imagesx-1").is_none());
        assert!(matches!(descriptor.existing_row_id("images-abc"), Some(Err(_))));
    }

    #[test]
    fn inference_keeps_digits_and_acronyms_inside_words() {
        assert_eq!(infer_relation("image2s"), "image2s");
        assert_eq!(infer_entity_type("image2s"), "Image2");
        assert_eq!(infer_entity_type("HTMLBlocks"), "HTMLBlock");
        assert_eq!(infer_relation("h2_headings"), "h2Headings");
        assert_eq!(infer_entity_type("h2_headings"), "H2Heading");
        assert_eq!(infer_relation("page-repeater blocks"), "pageRepeaterBlocks");
    }

    #[test]
    fn parent_foreign_key_is_snake_entity_plus_id() {
        assert_eq!(ParentRef::new("ArticleType", RowId(1)).foreign_key, "article_type_id");
        assert_eq!(ParentRef::new("Article", RowId(1)).foreign_key, "article_id");
    }
}
