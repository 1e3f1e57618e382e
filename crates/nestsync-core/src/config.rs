//! Repeater configuration: which repeaters each parent entity type carries,
//! how their relations are shaped, and how their blocks render.
//!
//! ```toml
//! [media]
//! translated_form_fields = false
//!
//! [entities.Article]
//! repeaters = [
//!     "images",
//!     { name = "page_repeater", relation = "pages", model = "Page" },
//!     { name = "tags", kind = "many_to_many", keep_existing = false },
//!     { name = "comments", kind = "polymorphic", morph = "commentable" },
//! ]
//!
//! [blocks.images]
//! component = "a17-block-images"
//! title = "Image"
//! title_field = "caption"
//! ```

use crate::descriptor::{self, RelationKind, RepeaterDescriptor, RepeaterOverrides};
use crate::error::RepeaterError;
use crate::persistence::RepositoryRegistry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {message}")]
    Io { path: String, message: String },

    #[error("invalid repeater config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Raw configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RepeaterConfig {
    pub media: MediaConfig,
    pub entities: BTreeMap<String, EntityConfig>,
    pub blocks: BTreeMap<String, BlockMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Media and file fields are partitioned by locale.
    pub translated_form_fields: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EntityConfig {
    pub repeaters: Vec<RepeaterDecl>,
}

/// One repeater declaration: a bare name, or a name with overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RepeaterDecl {
    Name(String),
    Detailed(DetailedDecl),
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetailedDecl {
    pub name: String,
    #[serde(default)]
    pub relation: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub kind: Option<KindName>,
    #[serde(default)]
    pub morph: Option<String>,
    #[serde(default)]
    pub keep_existing: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KindName {
    Plain,
    ManyToMany,
    Polymorphic,
}

/// Rendering metadata for one repeater block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMetadata {
    pub component: String,
    pub title: String,
    #[serde(default)]
    pub title_field: Option<String>,
    #[serde(default)]
    pub hide_title_prefix: bool,
}

/// Metadata lookup consumed by projection.
pub trait MetadataLookup {
    fn lookup(&self, name: &str) -> Option<&BlockMetadata>;
}

impl MetadataLookup for BTreeMap<String, BlockMetadata> {
    fn lookup(&self, name: &str) -> Option<&BlockMetadata> {
        self.get(name)
    }
}

impl RepeaterConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Resolve every declaration into descriptors.
    pub fn into_catalog(self) -> RepeaterCatalog {
        let mut catalog = RepeaterCatalog::new();
        catalog.media_partitioned = self.media.translated_form_fields;
        catalog.blocks = self.blocks;
        for (entity_type, entity) in self.entities {
            for decl in entity.repeaters {
                catalog.declare(&entity_type, decl.resolve());
            }
        }
        catalog
    }
}

impl RepeaterDecl {
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::Detailed(detailed) => &detailed.name,
        }
    }

    pub fn resolve(&self) -> RepeaterDef {
        match self {
            Self::Name(name) => RepeaterDef {
                descriptor: descriptor::resolve(name, &RepeaterOverrides::default()),
                kind: RelationKind::Plain,
            },
            Self::Detailed(detailed) => {
                let overrides = RepeaterOverrides {
                    relation: detailed.relation.clone(),
                    model: detailed.model.clone(),
                };
                let kind = match detailed.kind.unwrap_or(KindName::Plain) {
                    KindName::Plain => RelationKind::Plain,
                    KindName::ManyToMany => RelationKind::ManyToMany {
                        keep_existing: detailed.keep_existing.unwrap_or(true),
                    },
                    KindName::Polymorphic => RelationKind::Polymorphic {
                        morph: detailed.morph.clone(),
                    },
                };
                RepeaterDef {
                    descriptor: descriptor::resolve(&detailed.name, &overrides),
                    kind,
                }
            }
        }
    }
}

/// A resolved repeater plus the shape of its relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeaterDef {
    pub descriptor: RepeaterDescriptor,
    pub kind: RelationKind,
}

impl RepeaterDef {
    pub fn new(descriptor: RepeaterDescriptor, kind: RelationKind) -> Self {
        Self { descriptor, kind }
    }
}

/// Resolved repeaters per parent entity type, plus block metadata.
#[derive(Debug, Clone, Default)]
pub struct RepeaterCatalog {
    entities: BTreeMap<String, Vec<RepeaterDef>>,
    blocks: BTreeMap<String, BlockMetadata>,
    media_partitioned: bool,
}

impl RepeaterCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a repeater to `entity_type`, keeping declaration order.
    pub fn declare(&mut self, entity_type: &str, repeater: RepeaterDef) -> &mut Self {
        self.entities
            .entry(entity_type.to_string())
            .or_default()
            .push(repeater);
        self
    }

    pub fn with_block(mut self, name: impl Into<String>, metadata: BlockMetadata) -> Self {
        self.blocks.insert(name.into(), metadata);
        self
    }

    pub fn with_media_partitioned(mut self, partitioned: bool) -> Self {
        self.media_partitioned = partitioned;
        self
    }

    pub fn media_partitioned(&self) -> bool {
        self.media_partitioned
    }

    /// Repeaters declared on `entity_type`, in declaration order.
    pub fn repeaters_of(&self, entity_type: &str) -> &[RepeaterDef] {
        self.entities
            .get(entity_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Lookup one declared repeater by name.
    pub fn repeater(&self, entity_type: &str, repeater_name: &str) -> Option<&RepeaterDef> {
        self.repeaters_of(entity_type)
            .iter()
            .find(|repeater| repeater.descriptor.name == repeater_name)
    }

    pub fn blocks(&self) -> &BTreeMap<String, BlockMetadata> {
        &self.blocks
    }

    /// Check every declared repeater against the registered collaborators.
    ///
    /// Reports all missing entity types and association stores at once.
    pub fn validate(&self, repositories: &RepositoryRegistry) -> Result<(), RepeaterError> {
        let mut problems = Vec::new();
        for (parent, repeaters) in &self.entities {
            for repeater in repeaters {
                let entity_type = &repeater.descriptor.target_entity_type;
                if !repositories.contains(entity_type) {
                    problems.push(format!(
                        "{parent}.{}: unknown entity type `{entity_type}`",
                        repeater.descriptor.name
                    ));
                }
                if matches!(repeater.kind, RelationKind::ManyToMany { .. })
                    && repositories
                        .association(&repeater.descriptor.relation_name)
                        .is_err()
                {
                    problems.push(format!(
                        "{parent}.{}: no association store for relation `{}`",
                        repeater.descriptor.name, repeater.descriptor.relation_name
                    ));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(RepeaterError::configuration(problems.join("; ")))
        }
    }
}

impl MetadataLookup for RepeaterCatalog {
    fn lookup(&self, name: &str) -> Option<&BlockMetadata> {
        self.blocks.get(name)
    }
}
