use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Default property holding a reference's identifier
pub const DEFAULT_MAPPING_KEY: &str = "@id";

/// Property carrying the type names of a nested row or a save payload
pub const TYPE_KEY: &str = "@type";

/// Definition of a single field as delivered by the server.
///
/// This is a read-only template: field stores are built from it and
/// `clone_with_initial_value` produces a new one carrying a value snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldDefinition {
    pub widget: String,
    pub label: Option<String>,
    pub fully_qualified_name: Option<String>,
    pub order: Option<i64>,
    pub is_required: bool,
    pub is_read_only: bool,
    pub is_public: bool,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub regex: Option<String>,
    /// Candidate target types of a reference field, or row types of a nested field
    pub target_types: Vec<TargetType>,
    pub default_target_type: Option<String>,
    pub allow_custom_values: bool,
    pub lazy_show_links: bool,
    pub mapping_key: Option<String>,
    /// Row template of a nested field when it does not come from the type registry
    pub fields: Option<BTreeMap<String, FieldDefinition>>,
    /// Raw value, only present on instance payloads
    pub value: Option<Value>,
    pub alternatives: Vec<Alternative>,
    pub warning: Option<String>,
}

impl FieldDefinition {
    pub fn new(widget: &str) -> Self {
        FieldDefinition {
            widget: widget.to_string(),
            ..Default::default()
        }
    }

    pub fn mapping_key(&self) -> &str {
        self.mapping_key.as_deref().unwrap_or(DEFAULT_MAPPING_KEY)
    }

    pub fn display_label<'a>(&'a self, name: &'a str) -> &'a str {
        self.label.as_deref().unwrap_or(name)
    }

    pub fn target_type_names(&self) -> Vec<String> {
        self.target_types.iter().map(|t| t.name.clone()).collect()
    }
}

/// A type a reference may point to (or a nested row may be typed as)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TargetType {
    pub name: String,
    pub label: Option<String>,
    pub color: Option<String>,
}

impl TargetType {
    pub fn named(name: &str) -> Self {
        TargetType {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

/// A value proposed by another user for the same field
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Alternative {
    pub value: Value,
    pub selected: bool,
    pub users: Vec<UserSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserSummary {
    pub id: String,
    pub name: Option<String>,
}

/// Definition of an instance type and the template of its fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TypeDefinition {
    pub name: String,
    pub label: Option<String>,
    pub color: Option<String>,
    pub label_field: Option<String>,
    pub fields: BTreeMap<String, FieldDefinition>,
    /// Spaces instances of this type may be created in
    pub spaces: Vec<String>,
}

impl TypeDefinition {
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    /// The type as it appears on an instance payload
    pub fn summary(&self) -> TypeSummary {
        TypeSummary {
            name: self.name.clone(),
            label: self.label.clone(),
            color: self.color.clone(),
            label_field: self.label_field.clone(),
        }
    }
}

/// Compact type descriptor carried by instance payloads
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TypeSummary {
    pub name: String,
    pub label: Option<String>,
    pub color: Option<String>,
    pub label_field: Option<String>,
}

/// A workspace the current user has access to
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpaceInfo {
    pub name: String,
    pub can_create: bool,
}
