//! Projection of persisted rows back into composite-keyed form fields.

use nestsync_core::{
    AssociationStore, BlockMetadata, ChildRecord, FieldSet, Fields, ParentRef, Projector,
    Reconciler, RepeaterCatalog, RepeaterConfig, RepeaterError, RepositoryRegistry, RowId,
    SessionRegistry, group_block_fields,
};
use nestsync_memory::{MemoryAssociations, MemoryTable};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

const CATALOG: &str = r#"
[entities.Article]
repeaters = ["images", { name = "tags", kind = "many_to_many" }]

[entities.Image]
repeaters = ["credits"]

[blocks.images]
component = "a17-block-images"
title = "Image"
title_field = "caption"

[blocks.Credit]
component = "a17-block-credit"
title = "Credit"

[blocks.tags]
component = "a17-block-tags"
title = "Tag"
hide_title_prefix = true
"#;

fn object(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object fixture, got {other}"),
    }
}

fn catalog(partitioned: bool) -> RepeaterCatalog {
    RepeaterConfig::from_toml_str(CATALOG)
        .expect("fixture config should parse")
        .into_catalog()
        .with_media_partitioned(partitioned)
}

fn image_rows(medias: Value) -> Vec<ChildRecord> {
    vec![
        ChildRecord::new(
            RowId(9),
            object(json!({
                "article_id": 1,
                "position": 2,
                "caption": { "en": "Sun", "fr": "Soleil" },
                "alt": "sun",
                "medias": medias,
                "files": { "en": { "pdf": [ { "id": 2 } ] } },
                "browsers": { "related": [7] },
            })),
        ),
        ChildRecord::new(
            RowId(10),
            object(json!({
                "article_id": 1,
                "position": 3,
                "alt": "gone",
                "deleted_at": "2026-01-01T00:00:00+00:00",
            })),
        ),
        ChildRecord::new(
            RowId(11),
            object(json!({ "article_id": 2, "position": 1, "alt": "elsewhere" })),
        ),
        ChildRecord::new(
            RowId(12),
            object(json!({ "article_id": 1, "position": 1, "alt": "moon" })),
        ),
    ]
}

fn registry(image_medias: Value) -> RepositoryRegistry {
    let mut registry = RepositoryRegistry::new();
    registry.register(
        MemoryTable::from_rows("Image", image_rows(image_medias))
            .with_translated(["caption"])
            .with_repeater_array(),
    );
    registry.register(MemoryTable::from_rows(
        "Credit",
        vec![ChildRecord::new(
            RowId(4),
            object(json!({ "image_id": 9, "position": 1, "name": "Ann" })),
        )],
    ));
    registry.register(MemoryTable::from_rows(
        "Tag",
        vec![
            ChildRecord::new(RowId(5), object(json!({ "label": "blue" }))),
            ChildRecord::new(
                RowId(6),
                object(json!({ "label": "old", "deleted_at": "2026-01-01T00:00:00+00:00" })),
            ),
        ],
    ));

    let mut tags = MemoryAssociations::new();
    tags.attach(RowId(1), RowId(5)).expect("attach");
    tags.attach(RowId(1), RowId(6)).expect("attach");
    registry.register_association("tags", tags);
    registry
}

fn project_article(registry: &RepositoryRegistry, catalog: &RepeaterCatalog) -> FieldSet {
    let mut fieldset = FieldSet::new();
    Projector::new(registry, catalog)
        .project_all(&ParentRef::new("Article", RowId(1)), &mut fieldset)
        .expect("projection should succeed");
    fieldset
}

fn role_medias() -> Value {
    json!({ "image": [ { "id": 10 } ] })
}

#[test]
fn repeater_lists_cover_every_relation_and_nesting_level() {
    let catalog = catalog(false);
    let registry = registry(role_medias());
    let fieldset = project_article(&registry, &catalog);

    insta::assert_json_snapshot!(fieldset.repeaters, @r#"
    {
      "blocks-images-12_credits": [],
      "blocks-images-9_credits": [
        {
          "id": "credits-4",
          "type": "a17-block-credit",
          "title": "Credit",
          "titleField": null,
          "hideTitlePrefix": false
        }
      ],
      "images": [
        {
          "id": "images-12",
          "type": "a17-block-images",
          "title": "Image",
          "titleField": "caption",
          "hideTitlePrefix": false
        },
        {
          "id": "images-9",
          "type": "a17-block-images",
          "title": "Image",
          "titleField": "caption",
          "hideTitlePrefix": false
        }
      ],
      "tags": [
        {
          "id": "tags-5",
          "type": "a17-block-tags",
          "title": "Tag",
          "titleField": null,
          "hideTitlePrefix": true
        }
      ]
    }
    "#);
}

#[test]
fn leaf_fields_use_composite_names_and_skip_other_rows() {
    let catalog = catalog(false);
    let registry = registry(role_medias());
    let fieldset = project_article(&registry, &catalog);
    let fields = fieldset.flat_fields("images");

    assert_eq!(
        fields.get("blocks[images-9][caption]"),
        Some(&json!({ "en": "Sun", "fr": "Soleil" }))
    );
    assert_eq!(fields.get("blocks[images-9][alt]"), Some(&json!("sun")));
    assert_eq!(fields.get("blocks[images-9][id]"), Some(&json!(9)));
    assert_eq!(fields.get("blocks[images-12][alt]"), Some(&json!("moon")));
    assert!(!fields.contains_key("blocks[images-9][medias]"));
    assert!(!fields.contains_key("blocks[images-9][browsers]"));
    assert!(!fields.keys().any(|name| name.contains("images-10")));
    assert!(!fields.keys().any(|name| name.contains("images-11")));

    // Nested rows keep their own unprefixed leaf names.
    assert_eq!(fields.get("blocks[credits-4][name]"), Some(&json!("Ann")));
    assert_eq!(fields.get("blocks[credits-4][image_id]"), Some(&json!(9)));

    let tag_fields = fieldset.flat_fields("tags");
    assert_eq!(tag_fields.get("blocks[tags-5][label]"), Some(&json!("blue")));
    assert!(!tag_fields.keys().any(|name| name.contains("tags-6")));
}

#[test]
fn translated_fields_come_before_plain_attributes() {
    let catalog = catalog(false);
    let registry = registry(role_medias());
    let fieldset = project_article(&registry, &catalog);

    let names: Vec<&str> = fieldset.repeater_fields["images"]
        .iter()
        .map(|field| field.name.as_str())
        .filter(|name| name.starts_with("blocks[images-9]"))
        .collect();
    assert_eq!(
        names,
        vec![
            "blocks[images-9][caption]",
            "blocks[images-9][alt]",
            "blocks[images-9][article_id]",
            "blocks[images-9][id]",
            "blocks[images-9][position]",
        ]
    );
}

#[test]
fn medias_files_and_browsers_are_keyed_per_child() {
    let catalog = catalog(false);
    let registry = registry(role_medias());
    let fieldset = project_article(&registry, &catalog);

    assert_eq!(
        fieldset.repeater_medias["images"].get("blocks[images-9][image]"),
        Some(&json!([ { "id": 10 } ]))
    );
    assert_eq!(
        fieldset.repeater_files["images"].get("blocks[images-9][pdf][en]"),
        Some(&json!([ { "id": 2 } ]))
    );
    assert_eq!(
        fieldset.repeater_browsers["images"].get("blocks[images-9][related]"),
        Some(&json!([7]))
    );
    assert!(fieldset.repeater_medias["tags"].is_empty());
}

#[test]
fn locale_partitioned_medias_carry_a_locale_suffix() {
    let catalog = catalog(true);
    let registry = registry(json!({
        "en": { "image": [ { "id": 10 } ] },
        "fr": { "image": [ { "id": 11 } ] },
    }));
    let fieldset = project_article(&registry, &catalog);
    let medias = &fieldset.repeater_medias["images"];

    assert_eq!(medias.get("blocks[images-9][image][en]"), Some(&json!([ { "id": 10 } ])));
    assert_eq!(medias.get("blocks[images-9][image][fr]"), Some(&json!([ { "id": 11 } ])));
    assert!(!medias.contains_key("blocks[images-9][image]"));

    let flat: Fields = medias.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    let grouped = group_block_fields(&flat);
    assert_eq!(
        Value::Object(grouped["images-9"].clone()),
        json!({ "image": { "en": [ { "id": 10 } ], "fr": [ { "id": 11 } ] } })
    );
}

#[test]
fn missing_block_metadata_is_a_configuration_error() {
    let catalog = catalog(false);
    let registry = registry(role_medias());
    let empty: BTreeMap<String, BlockMetadata> = BTreeMap::new();

    let mut fieldset = FieldSet::new();
    let err = Projector::new(&registry, &catalog)
        .with_metadata(&empty)
        .project_all(&ParentRef::new("Article", RowId(1)), &mut fieldset)
        .expect_err("projection without metadata must fail");
    assert!(matches!(err, RepeaterError::Configuration(_)));
}

#[test]
fn projection_reflects_a_reconciled_submission() {
    let catalog = catalog(false);
    let mut registry = RepositoryRegistry::new();
    registry.register(MemoryTable::new("Image"));
    registry.register(MemoryTable::new("Credit"));
    registry.register(MemoryTable::new("Tag"));
    registry.register_association("tags", MemoryAssociations::new());
    catalog.validate(&registry).expect("catalog should validate");

    let session = SessionRegistry::new();
    let parent = ParentRef::new("Article", RowId(1));
    let fields = object(json!({
        "repeaters": {
            "images": [
                { "id": "tmp-a", "alt": "first", "repeaters": { "credits": [ { "name": "Bo" } ] } },
                { "id": "tmp-b", "alt": "second" },
            ],
        },
    }));
    Reconciler::new(&mut registry, &catalog, &session)
        .reconcile_all(&parent, &fields)
        .expect("reconcile should succeed");

    let fieldset = project_article(&registry, &catalog);
    let ids: Vec<&str> = fieldset.repeaters["images"]
        .iter()
        .map(|entry| entry.id.as_str())
        .collect();
    assert_eq!(ids, vec!["images-1", "images-2"]);
    assert_eq!(fieldset.repeaters["blocks-images-1_credits"].len(), 1);
    assert!(fieldset.repeaters["tags"].is_empty());

    let flat = fieldset.flat_fields("images");
    assert_eq!(flat.get("blocks[images-2][position]"), Some(&json!(2)));
    assert_eq!(flat.get("blocks[credits-1][name]"), Some(&json!("Bo")));
    assert_eq!(flat.get("blocks[credits-1][image_id]"), Some(&json!(1)));

    let grouped = group_block_fields(&flat);
    assert_eq!(grouped["images-1"].get("alt"), Some(&json!("first")));
}

#[test]
fn jsonl_snapshot_round_trips_through_projection() {
    let catalog = catalog(false);
    let original = registry(role_medias());
    let expected = project_article(&original, &catalog);

    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock should be after unix epoch")
        .as_nanos();
    let path = std::env::temp_dir().join(format!(
        "nestsync-images-{}-{unique}.jsonl",
        std::process::id()
    ));
    MemoryTable::from_rows("Image", image_rows(role_medias()))
        .save_jsonl(&path)
        .expect("snapshot should save");

    let mut reloaded = registry(role_medias());
    reloaded.register(
        MemoryTable::load_jsonl("Image", &path)
            .expect("snapshot should load")
            .with_translated(["caption"])
            .with_repeater_array(),
    );
    assert_eq!(project_article(&reloaded, &catalog), expected);

    let _ = std::fs::remove_file(path);
}
