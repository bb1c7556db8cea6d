use crate::schema::{FieldDefinition, TypeSummary};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// What the current user may do with an instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Permissions {
    pub can_read: bool,
    pub can_create: bool,
    pub can_write: bool,
    pub can_delete: bool,
    pub can_release: bool,
}

impl Permissions {
    pub fn all() -> Self {
        Permissions {
            can_read: true,
            can_create: true,
            can_write: true,
            can_delete: true,
            can_release: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IncomingLink {
    pub id: String,
    pub label: Option<String>,
    pub space: Option<String>,
}

/// One page of instances linking to an instance through a property
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IncomingLinkPage {
    pub data: Vec<IncomingLink>,
    pub size: usize,
    pub total: usize,
}

/// Incoming links grouped by property, then by source type
pub type IncomingLinks = BTreeMap<String, BTreeMap<String, IncomingLinkPage>>;

/// An instance as delivered by the server.
///
/// Label fetches deliver the same shape with only identity, name and types.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawInstance {
    pub id: String,
    pub name: Option<String>,
    pub types: Vec<TypeSummary>,
    pub space: Option<String>,
    pub label_field: Option<String>,
    pub fields: BTreeMap<String, FieldDefinition>,
    pub permissions: Permissions,
    pub incoming_links: IncomingLinks,
}

/// Entries of a batched fetch, keyed by identifier: a raw instance or `{ "error": ... }`
pub type BatchResponse = BTreeMap<String, Value>;

/// Unnormalized instance data plus the caller's permissions on it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawInstanceData {
    pub data: Value,
    pub permissions: Permissions,
}

/// Parameters of a suggestion search
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionRequest {
    pub instance_id: String,
    pub field: String,
    /// Types of the instance owning the field, as search context
    pub source_types: Vec<String>,
    pub target_type: Option<String>,
    pub from: usize,
    pub size: usize,
    pub search_term: String,
    /// Current save payload of the owning instance
    pub payload: Value,
}
