//! Submitted repeater payloads.
//!
//! A form submission carries its repeaters under
//! `fields["repeaters"][<repeater name>]` as an ordered array of objects. Each
//! object may carry a client `id` (a relation-prefixed persisted id, or an
//! opaque client token), a per-locale `active` map, nested `repeaters`, and
//! any number of plain attributes.

use crate::error::RepeaterError;
use crate::persistence::{Fields, POSITION};
use serde_json::Value;
use std::collections::BTreeMap;

/// Key holding repeaters inside a submission (and inside nested items).
pub const REPEATERS_KEY: &str = "repeaters";
/// Key of the per-locale active map on an item and on the parent.
pub const ACTIVE_KEY: &str = "active";
/// Key of the explicit languages list on an item.
pub const LANGUAGES_KEY: &str = "languages";
/// Key of the client identifier on an item.
pub const ID_KEY: &str = "id";

/// One submitted repeater item.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedItem {
    pub client_id: Option<String>,
    /// 1-based position from submission order.
    pub position: u64,
    pub active_by_locale: Option<BTreeMap<String, bool>>,
    /// Nested repeater payloads, keyed by repeater name.
    pub nested: Option<Fields>,
    /// Attributes to persist. Never contains `id` or `repeaters`.
    pub fields: Fields,
}

impl SubmittedItem {
    /// Parse one item at `index` (0-based) of its repeater list.
    pub fn from_value(index: usize, value: &Value) -> Result<Self, RepeaterError> {
        let Value::Object(object) = value else {
            return Err(RepeaterError::configuration(format!(
                "repeater item {index} must be an object, got {}",
                type_name(value)
            )));
        };

        let mut fields = object.clone();
        let client_id = fields.remove(ID_KEY).and_then(|id| match id {
            Value::String(s) if !s.is_empty() => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        let nested = match fields.remove(REPEATERS_KEY) {
            Some(Value::Object(nested)) => Some(nested),
            _ => None,
        };
        let active_by_locale = match fields.get(ACTIVE_KEY) {
            Some(Value::Object(active)) => Some(
                active
                    .iter()
                    .map(|(locale, flag)| (locale.clone(), truthy(flag)))
                    .collect(),
            ),
            _ => None,
        };

        let position = index as u64 + 1;
        fields.insert(POSITION.to_string(), Value::from(position));

        Ok(Self {
            client_id,
            position,
            active_by_locale,
            nested,
            fields,
        })
    }

    pub fn has_languages(&self) -> bool {
        self.fields
            .get(LANGUAGES_KEY)
            .is_some_and(|value| !value.is_null())
    }

    /// Fill `languages` from the parent's per-locale active flags when the
    /// item has an `active` map but no explicit languages.
    ///
    /// One entry per locale of the item's `active` map:
    /// `{ "value": <locale>, "published": fields[<locale>].active }`.
    pub fn derive_languages(&mut self, parent_fields: &Fields) {
        if self.has_languages() {
            return;
        }
        let Some(active) = &self.active_by_locale else {
            return;
        };

        let languages: Vec<Value> = active
            .keys()
            .map(|locale| {
                let published = parent_fields
                    .get(locale)
                    .and_then(|locale_fields| locale_fields.get(ACTIVE_KEY))
                    .is_some_and(truthy);
                serde_json::json!({ "value": locale, "published": published })
            })
            .collect();
        self.fields
            .insert(LANGUAGES_KEY.to_string(), Value::Array(languages));
    }
}

/// Items submitted for `repeater_name`, in submission order.
///
/// A missing or `null` entry means "nothing submitted".
pub fn submitted_items(
    fields: &Fields,
    repeater_name: &str,
) -> Result<Vec<SubmittedItem>, RepeaterError> {
    let Some(repeaters) = fields.get(REPEATERS_KEY) else {
        return Ok(Vec::new());
    };
    let list = match repeaters {
        Value::Null => return Ok(Vec::new()),
        Value::Object(repeaters) => repeaters.get(repeater_name),
        other => {
            return Err(RepeaterError::configuration(format!(
                "`repeaters` must be an object, got {}",
                type_name(other)
            )));
        }
    };

    match list {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(index, item)| SubmittedItem::from_value(index, item))
            .collect(),
        Some(other) => Err(RepeaterError::configuration(format!(
            "repeater `{repeater_name}` must be an array, got {}",
            type_name(other)
        ))),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty() && s != "0" && s != "false",
        Value::Null => false,
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
