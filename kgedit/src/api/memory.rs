use super::types::{
    BatchResponse, IncomingLink, IncomingLinkPage, IncomingLinks, Permissions, RawInstance,
    RawInstanceData, SuggestionRequest,
};
use super::{Api, ApiResult};
use crate::error::{RequestError, Result};
use crate::field::options::{SuggestionData, SuggestionTypeInfo};
use crate::field::{Suggestion, SuggestionResponse};
use crate::schema::{SpaceInfo, TargetType, TypeDefinition, TypeRegistry, TypeSummary, TYPE_KEY};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Incoming links delivered with a full fetch, per property and source type
const INCOMING_LINKS_PAGE: usize = 10;

/// An instance as held by [`MemoryApi`]: plain field values keyed by name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoredInstance {
    pub id: String,
    pub types: Vec<String>,
    pub space: Option<String>,
    pub values: Map<String, Value>,
    pub permissions: Option<Permissions>,
}

/// Content of a fixture file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryFixture {
    pub types: Vec<TypeDefinition>,
    pub spaces: Vec<SpaceInfo>,
    pub instances: Vec<StoredInstance>,
}

impl MemoryFixture {
    /// Parse a YAML (or JSON) fixture
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }
}

/// In-memory backend serving instances from a [`MemoryFixture`]
#[derive(Debug, Default)]
pub struct MemoryApi {
    types: TypeRegistry,
    spaces: Vec<SpaceInfo>,
    instances: RwLock<BTreeMap<String, StoredInstance>>,
    /// Identifiers answered with an error marker in batched fetches
    failing: RwLock<HashMap<String, RequestError>>,
    offline: RwLock<bool>,
    assign_ids: bool,
}

impl MemoryApi {
    pub fn new(fixture: MemoryFixture) -> Self {
        let instances = fixture
            .instances
            .into_iter()
            .map(|i| (i.id.clone(), i))
            .collect();
        MemoryApi {
            types: TypeRegistry::from_types(fixture.types),
            spaces: fixture.spaces,
            instances: RwLock::new(instances),
            ..Default::default()
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        Ok(Self::new(MemoryFixture::from_path(path)?))
    }

    /// Let the server pick identifiers of created instances instead of
    /// keeping the client-generated ones
    pub fn with_server_ids(mut self) -> Self {
        self.assign_ids = true;
        self
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn spaces(&self) -> &[SpaceInfo] {
        &self.spaces
    }

    pub fn insert(&self, instance: StoredInstance) {
        self.instances.write().insert(instance.id.clone(), instance);
    }

    pub fn stored(&self, id: &str) -> Option<StoredInstance> {
        self.instances.read().get(id).cloned()
    }

    /// Answer `id` with an error marker in batched fetches
    pub fn fail_with(&self, id: &str, error: RequestError) {
        self.failing.write().insert(id.to_string(), error);
    }

    /// Reject every call as a network failure
    pub fn set_offline(&self, offline: bool) {
        *self.offline.write() = offline;
    }

    fn check_online(&self) -> ApiResult<()> {
        if *self.offline.read() {
            Err(RequestError::new("Network unreachable"))
        } else {
            Ok(())
        }
    }

    fn primary_type(&self, stored: &StoredInstance) -> Option<&TypeDefinition> {
        self.types.resolve(stored.types.iter().map(String::as_str))
    }

    fn display_name(&self, stored: &StoredInstance) -> Option<String> {
        let label_field = self.primary_type(stored)?.label_field.as_deref()?;
        stored
            .values
            .get(label_field)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn type_summaries(&self, stored: &StoredInstance) -> Vec<TypeSummary> {
        stored
            .types
            .iter()
            .map(|name| match self.types.get(name) {
                Some(def) => def.summary(),
                None => TypeSummary {
                    name: name.clone(),
                    ..Default::default()
                },
            })
            .collect()
    }

    fn label(&self, stored: &StoredInstance) -> RawInstance {
        RawInstance {
            id: stored.id.clone(),
            name: self.display_name(stored),
            types: self.type_summaries(stored),
            space: stored.space.clone(),
            ..Default::default()
        }
    }

    fn full(&self, stored: &StoredInstance, all: &BTreeMap<String, StoredInstance>) -> RawInstance {
        let mut raw = self.label(stored);
        if let Some(def) = self.primary_type(stored) {
            raw.label_field = def.label_field.clone();
            raw.fields = def
                .fields
                .iter()
                .map(|(name, field)| {
                    let mut field = field.clone();
                    field.value = stored.values.get(name).cloned();
                    (name.clone(), field)
                })
                .collect();
        }
        raw.permissions = stored.permissions.clone().unwrap_or_else(Permissions::all);
        raw.incoming_links = self.incoming_links(&stored.id, all, 0, INCOMING_LINKS_PAGE);
        raw
    }

    /// Instances referencing `id`, grouped by property and source type
    fn incoming_links(
        &self,
        id: &str,
        all: &BTreeMap<String, StoredInstance>,
        from: usize,
        size: usize,
    ) -> IncomingLinks {
        let mut grouped: BTreeMap<String, BTreeMap<String, Vec<IncomingLink>>> = BTreeMap::new();
        for source in all.values().filter(|s| s.id != id) {
            let Some(def) = self.primary_type(source) else {
                continue;
            };
            for (property, field) in &def.fields {
                if field.target_types.is_empty() {
                    continue;
                }
                let Some(value) = source.values.get(property) else {
                    continue;
                };
                if references(value, field.mapping_key()).contains(&id) {
                    grouped
                        .entry(property.clone())
                        .or_default()
                        .entry(def.name.clone())
                        .or_default()
                        .push(IncomingLink {
                            id: source.id.clone(),
                            label: self.display_name(source),
                            space: source.space.clone(),
                        });
                }
            }
        }
        grouped
            .into_iter()
            .map(|(property, by_type)| {
                let pages = by_type
                    .into_iter()
                    .map(|(type_name, links)| {
                        let total = links.len();
                        let data: Vec<IncomingLink> = links.into_iter().skip(from).take(size).collect();
                        let page = IncomingLinkPage {
                            size: data.len(),
                            data,
                            total,
                        };
                        (type_name, page)
                    })
                    .collect();
                (property, pages)
            })
            .collect()
    }

    fn batch(
        &self,
        ids: &[String],
        project: impl Fn(&StoredInstance) -> RawInstance,
    ) -> ApiResult<BatchResponse> {
        self.check_online()?;
        let instances = self.instances.read();
        let failing = self.failing.read();
        let mut response = BatchResponse::new();
        for id in ids {
            if let Some(error) = failing.get(id) {
                let marker = json!({
                    "error": { "message": error.message, "status": error.status, "data": error.data }
                });
                response.insert(id.clone(), marker);
            } else if let Some(stored) = instances.get(id) {
                let raw = serde_json::to_value(project(stored))
                    .map_err(|e| RequestError::new(e.to_string()))?;
                response.insert(id.clone(), raw);
            }
        }
        Ok(response)
    }

    fn store_payload(&self, stored: &mut StoredInstance, payload: Value) -> ApiResult<()> {
        let Value::Object(map) = payload else {
            return Err(RequestError::with_status("Payload must be an object", 400));
        };
        for (key, value) in map {
            if key == TYPE_KEY {
                if let Value::Array(names) = value {
                    stored.types = names
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect();
                }
            } else if value.is_null() {
                stored.values.remove(&key);
            } else {
                stored.values.insert(key, value);
            }
        }
        Ok(())
    }
}

/// Identifiers referenced by a raw reference value (object or list of objects)
fn references<'a>(value: &'a Value, mapping_key: &str) -> Vec<&'a str> {
    match value {
        Value::Object(map) => map.get(mapping_key).and_then(Value::as_str).into_iter().collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.get(mapping_key).and_then(Value::as_str))
            .collect(),
        _ => Vec::new(),
    }
}

fn not_found(id: &str) -> RequestError {
    RequestError::with_status(format!("Instance {id} not found"), 404)
}

#[async_trait]
impl Api for MemoryApi {
    async fn get_instances_list(&self, _stage: &str, ids: &[String]) -> ApiResult<BatchResponse> {
        let all = self.instances.read().clone();
        self.batch(ids, |stored| self.full(stored, &all))
    }

    async fn get_instances_label(&self, _stage: &str, ids: &[String]) -> ApiResult<BatchResponse> {
        self.batch(ids, |stored| self.label(stored))
    }

    async fn get_suggestions(&self, request: SuggestionRequest) -> ApiResult<SuggestionResponse> {
        self.check_online()?;
        let term = request.search_term.to_lowercase();
        let instances = self.instances.read();
        let matches: Vec<&StoredInstance> = instances
            .values()
            .filter(|s| s.id != request.instance_id)
            .filter(|s| match &request.target_type {
                Some(target) => s.types.contains(target),
                None => true,
            })
            .filter(|s| {
                term.is_empty()
                    || self
                        .display_name(s)
                        .is_some_and(|name| name.to_lowercase().contains(&term))
            })
            .collect();

        let data = matches
            .iter()
            .skip(request.from)
            .take(request.size)
            .map(|s| Suggestion {
                id: s.id.clone(),
                name: self.display_name(s),
                type_info: self.primary_type(s).map(|def| TargetType {
                    name: def.name.clone(),
                    label: def.label.clone(),
                    color: def.color.clone(),
                }),
                space: s.space.clone(),
            })
            .collect();

        let types = request
            .target_type
            .iter()
            .filter_map(|name| self.types.get(name))
            .map(|def| {
                let info = SuggestionTypeInfo {
                    label: def.label.clone(),
                    color: def.color.clone(),
                    space: def.spaces.clone(),
                };
                (def.name.clone(), info)
            })
            .collect();

        Ok(SuggestionResponse {
            suggestions: SuggestionData {
                data,
                total: matches.len(),
            },
            types,
        })
    }

    async fn create_instance(&self, space: &str, id: &str, payload: Value) -> ApiResult<RawInstance> {
        self.check_online()?;
        let mut instances = self.instances.write();
        let id = if self.assign_ids {
            uuid::Uuid::new_v4().to_string()
        } else {
            id.to_string()
        };
        if instances.contains_key(&id) {
            return Err(RequestError::with_status(format!("Instance {id} already exists"), 409));
        }
        let mut stored = StoredInstance {
            id: id.clone(),
            space: Some(space.to_string()),
            ..Default::default()
        };
        self.store_payload(&mut stored, payload)?;
        log::debug!("Created instance {id} in space {space}");
        instances.insert(id.clone(), stored);
        let all = instances.clone();
        Ok(self.full(&all[&id], &all))
    }

    async fn patch_instance(&self, id: &str, payload: Value) -> ApiResult<RawInstance> {
        self.check_online()?;
        let mut instances = self.instances.write();
        let stored = instances.get_mut(id).ok_or_else(|| not_found(id))?;
        if !stored.permissions.as_ref().map_or(true, |p| p.can_write) {
            return Err(RequestError::with_status(format!("No write access to {id}"), 403));
        }
        self.store_payload(stored, payload)?;
        let all = instances.clone();
        Ok(self.full(&all[id], &all))
    }

    async fn get_raw_instance(&self, id: &str) -> ApiResult<RawInstanceData> {
        self.check_online()?;
        let instances = self.instances.read();
        let stored = instances.get(id).ok_or_else(|| not_found(id))?;
        let mut data = stored.values.clone();
        data.insert("@id".to_string(), Value::String(stored.id.clone()));
        data.insert(TYPE_KEY.to_string(), json!(stored.types));
        Ok(RawInstanceData {
            data: Value::Object(data),
            permissions: stored.permissions.clone().unwrap_or_else(Permissions::all),
        })
    }

    async fn get_more_incoming_links(
        &self,
        id: &str,
        property: &str,
        type_name: &str,
        from: usize,
        size: usize,
    ) -> ApiResult<IncomingLinkPage> {
        self.check_online()?;
        let all = self.instances.read().clone();
        if !all.contains_key(id) {
            return Err(not_found(id));
        }
        Ok(self
            .incoming_links(id, &all, from, size)
            .remove(property)
            .and_then(|mut by_type| by_type.remove(type_name))
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const FIXTURE: &str = r#"
types:
  - name: Person
    labelField: fullName
    spaces: [common, private]
    fields:
      fullName:
        widget: InputText
      knows:
        widget: DynamicDropdown
        targetTypes: [{ name: Person }]
spaces:
  - { name: common, canCreate: true }
  - { name: private, canCreate: false }
instances:
  - id: p1
    types: [Person]
    space: common
    values: { fullName: Ada Lovelace, knows: [{ "@id": p2 }] }
  - id: p2
    types: [Person]
    space: common
    values: { fullName: Charles Babbage }
  - id: p3
    types: [Person]
    space: common
    values: { fullName: Mary Somerville, knows: [{ "@id": p2 }] }
"#;

    fn api() -> MemoryApi {
        MemoryApi::new(MemoryFixture::from_yaml_str(FIXTURE).unwrap())
    }

    #[tokio::test]
    async fn test_batch_fetch_and_missing_ids() {
        let api = api();
        api.fail_with("p3", RequestError::with_status("boom", 500));
        let ids = vec!["p1".to_string(), "p3".to_string(), "nope".to_string()];
        let response = api.get_instances_list("IN_PROGRESS", &ids).await.unwrap();

        assert_eq!(response.len(), 2);
        assert_eq!(response["p1"]["name"], json!("Ada Lovelace"));
        assert_eq!(response["p1"]["fields"]["fullName"]["value"], json!("Ada Lovelace"));
        assert_eq!(response["p3"]["error"]["status"], json!(500));
    }

    #[tokio::test]
    async fn test_labels_carry_no_fields() {
        let api = api();
        let response = api
            .get_instances_label("IN_PROGRESS", &["p2".to_string()])
            .await
            .unwrap();
        let raw: RawInstance = serde_json::from_value(response["p2"].clone()).unwrap();
        assert_eq!(raw.name.as_deref(), Some("Charles Babbage"));
        assert!(raw.fields.is_empty());
    }

    #[tokio::test]
    async fn test_incoming_links_paged() {
        let api = api();
        let response = api
            .get_instances_list("IN_PROGRESS", &["p2".to_string()])
            .await
            .unwrap();
        let raw: RawInstance = serde_json::from_value(response["p2"].clone()).unwrap();
        assert_eq!(raw.incoming_links["knows"]["Person"].total, 2);

        let page = api
            .get_more_incoming_links("p2", "knows", "Person", 1, 10)
            .await
            .unwrap();
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.data[0].id, "p3");
    }

    #[tokio::test]
    async fn test_suggestions_filtered_by_term() {
        let api = api();
        let response = api
            .get_suggestions(SuggestionRequest {
                instance_id: "p1".into(),
                field: "knows".into(),
                target_type: Some("Person".into()),
                size: 10,
                search_term: "ar".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let ids: Vec<&str> = response.suggestions.data.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["p2", "p3"]);
        assert_eq!(response.types["Person"].space, vec!["common", "private"]);
    }

    #[tokio::test]
    async fn test_create_and_patch() {
        let api = api().with_server_ids();
        let created = api
            .create_instance(
                "common",
                "client-id",
                json!({ "@type": ["Person"], "fullName": "Alan Turing" }),
            )
            .await
            .unwrap();
        assert_ne!(created.id, "client-id");
        assert_eq!(created.name.as_deref(), Some("Alan Turing"));

        let patched = api
            .patch_instance(&created.id, json!({ "fullName": null }))
            .await
            .unwrap();
        assert_eq!(patched.name, None);

        let err = api.patch_instance("nope", json!({})).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_offline_rejects_everything() {
        let api = api();
        api.set_offline(true);
        assert!(api.get_instances_list("IN_PROGRESS", &[]).await.is_err());
        assert!(api.get_raw_instance("p1").await.is_err());
    }
}
