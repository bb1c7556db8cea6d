use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A reference to another instance: `{ [mapping_key]: id, ...extra }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reference(Map<String, Value>);

impl Reference {
    pub fn from_id(mapping_key: &str, id: &str) -> Self {
        let mut map = Map::new();
        map.insert(mapping_key.to_string(), Value::String(id.to_string()));
        Reference(map)
    }

    /// Normalize a raw value: objects are kept, bare strings are taken as ids.
    pub fn from_raw(mapping_key: &str, raw: &Value) -> Option<Self> {
        match raw {
            Value::Object(map) if map.get(mapping_key).and_then(Value::as_str).is_some() => {
                Some(Reference(map.clone()))
            }
            Value::String(id) if !id.trim().is_empty() => Some(Self::from_id(mapping_key, id)),
            _ => None,
        }
    }

    pub fn id(&self, mapping_key: &str) -> Option<&str> {
        self.0.get(mapping_key).and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

/// Normalize a raw reference list. A bare object or id is wrapped in a list,
/// entries without an identifier are dropped.
pub(crate) fn normalize_references(field: &str, mapping_key: &str, raw: &Value) -> Vec<Reference> {
    let items: Vec<&Value> = match raw {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().collect(),
        other => {
            log::warn!("Field '{field}' expected a list of references, wrapping single value");
            vec![other]
        }
    };
    let mut refs: Vec<Reference> = Vec::with_capacity(items.len());
    for item in items {
        match Reference::from_raw(mapping_key, item) {
            Some(r) => {
                let duplicate = refs
                    .iter()
                    .any(|existing| existing.id(mapping_key) == r.id(mapping_key));
                if !duplicate {
                    refs.push(r);
                }
            }
            None => log::warn!("Field '{field}' dropped a reference without '{mapping_key}': {item}"),
        }
    }
    refs
}

pub(crate) fn reference_ids<'a>(refs: &'a [Reference], mapping_key: &str) -> Vec<&'a str> {
    refs.iter().filter_map(|r| r.id(mapping_key)).collect()
}
