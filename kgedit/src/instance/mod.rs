//! The instance aggregate: identity, types, permissions and one field store
//! per field, plus the fetch and save state the instance store drives.

pub mod state;

pub use state::{FetchError, FetchState};

use crate::api::{IncomingLinkPage, IncomingLinks, Permissions, RawInstance};
use crate::field::{FieldContext, FieldStore};
use crate::schema::{FieldDefinition, TypeDefinition, TypeSummary, TYPE_KEY};
use indexmap::{IndexMap, IndexSet};
use serde_json::{Map, Value};

/// A changed field as shown by a "compare changes" view.
///
/// Both sides are definitions carrying a value, so each can be turned back
/// into a read-only field store.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDiff {
    pub name: String,
    pub label: String,
    pub before: FieldDefinition,
    pub after: FieldDefinition,
}

#[derive(Debug)]
pub struct Instance {
    id: String,
    name: Option<String>,
    types: Vec<TypeSummary>,
    space: Option<String>,
    permissions: Permissions,
    label_field: Option<String>,
    fields: IndexMap<String, Box<dyn FieldStore>>,
    incoming_links: IncomingLinks,
    is_new: bool,
    fetch_state: FetchState,
    label_fetch_state: FetchState,
    is_saving: bool,
    save_error: Option<String>,
}

impl Instance {
    pub fn new(id: &str) -> Self {
        Instance {
            id: id.to_string(),
            name: None,
            types: Vec::new(),
            space: None,
            permissions: Permissions::default(),
            label_field: None,
            fields: IndexMap::new(),
            incoming_links: IncomingLinks::new(),
            is_new: false,
            fetch_state: FetchState::NotFetched,
            label_fetch_state: FetchState::NotFetched,
            is_saving: false,
            save_error: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn set_id(&mut self, id: &str) {
        self.id = id.to_string();
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Current value of the label field, else the fetched name, else the id
    pub fn display_name(&self) -> String {
        self.label_field
            .as_deref()
            .and_then(|f| self.fields.get(f))
            .and_then(|store| match store.value() {
                Value::String(s) if !s.trim().is_empty() => Some(s),
                _ => None,
            })
            .or_else(|| self.name.clone())
            .unwrap_or_else(|| self.id.clone())
    }

    pub fn types(&self) -> &[TypeSummary] {
        &self.types
    }

    pub fn primary_type(&self) -> Option<&TypeSummary> {
        self.types.first()
    }

    pub fn type_names(&self) -> Vec<String> {
        self.types.iter().map(|t| t.name.clone()).collect()
    }

    pub fn space(&self) -> Option<&str> {
        self.space.as_deref()
    }

    pub fn permissions(&self) -> &Permissions {
        &self.permissions
    }

    pub fn label_field(&self) -> Option<&str> {
        self.label_field.as_deref()
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn fetch_state(&self) -> &FetchState {
        &self.fetch_state
    }

    pub fn label_fetch_state(&self) -> &FetchState {
        &self.label_fetch_state
    }

    pub(crate) fn begin_fetch(&mut self, force: bool) -> bool {
        self.fetch_state.begin(force)
    }

    pub(crate) fn begin_label_fetch(&mut self, force: bool) -> bool {
        self.label_fetch_state.begin(force)
    }

    pub(crate) fn fail_fetch(&mut self, error: FetchError) {
        self.fetch_state = FetchState::Error(error);
    }

    pub(crate) fn fail_label_fetch(&mut self, error: FetchError) {
        self.label_fetch_state = FetchState::Error(error);
    }

    pub fn is_saving(&self) -> bool {
        self.is_saving
    }

    pub fn save_error(&self) -> Option<&str> {
        self.save_error.as_deref()
    }

    pub fn clear_save_error(&mut self) {
        self.save_error = None;
    }

    pub(crate) fn begin_save(&mut self) {
        self.is_saving = true;
        self.save_error = None;
    }

    pub(crate) fn fail_save(&mut self, message: String) {
        self.is_saving = false;
        self.save_error = Some(message);
    }

    pub(crate) fn finish_save(&mut self) {
        self.is_saving = false;
    }

    pub fn incoming_links(&self) -> &IncomingLinks {
        &self.incoming_links
    }

    pub fn has_more_incoming_links(&self, property: &str, type_name: &str) -> bool {
        self.incoming_links
            .get(property)
            .and_then(|by_type| by_type.get(type_name))
            .is_some_and(|page| page.data.len() < page.total)
    }

    pub(crate) fn append_incoming_links(
        &mut self,
        property: &str,
        type_name: &str,
        page: IncomingLinkPage,
    ) {
        let current = self
            .incoming_links
            .entry(property.to_string())
            .or_default()
            .entry(type_name.to_string())
            .or_default();
        current.data.extend(page.data);
        current.size = current.data.len();
        current.total = page.total;
    }

    /// Load a full server payload.
    ///
    /// Stores of fields that keep their widget are reused, so per-field UI
    /// state such as a running suggestion search survives a refetch.
    pub fn initialize_data(&mut self, raw: RawInstance, ctx: &FieldContext) {
        self.name = raw.name;
        if !raw.types.is_empty() {
            self.types = raw.types;
        }
        if raw.space.is_some() {
            self.space = raw.space;
        }
        self.permissions = raw.permissions;
        self.incoming_links = raw.incoming_links;
        self.label_field = raw
            .label_field
            .or_else(|| self.types.first().and_then(|t| t.label_field.clone()));

        let template = ctx
            .types
            .resolve(self.types.iter().map(|t| t.name.as_str()))
            .map(|def| def.fields.clone())
            .unwrap_or_default();

        let mut previous = std::mem::take(&mut self.fields);
        let mut fields = IndexMap::with_capacity(raw.fields.len());
        for (name, definition) in raw.fields {
            let definition = self.normalize_definition(&name, definition, template.get(&name));
            let warning = definition.warning.clone();
            let mut store = match previous.shift_remove(&name) {
                Some(mut store) if store.widget() == definition.widget => {
                    let value = definition.value.clone().unwrap_or(Value::Null);
                    store.update_value(&value);
                    store.set_alternatives(definition.alternatives);
                    store
                }
                _ => ctx.build_store(&name, definition),
            };
            if let Some(warning) = warning {
                store.set_warning(warning);
            }
            fields.insert(name, store);
        }
        self.fields = fields;
        self.is_new = false;
        self.fetch_state = FetchState::Fetched;
        self.label_fetch_state = FetchState::Fetched;
    }

    fn normalize_definition(
        &self,
        name: &str,
        mut definition: FieldDefinition,
        template: Option<&FieldDefinition>,
    ) -> FieldDefinition {
        definition.is_public = self.label_field.as_deref() == Some(name);
        if definition.widget.is_empty() {
            match template {
                Some(t) => definition.widget = t.widget.clone(),
                None => log::warn!("Field '{name}' of instance {} has no widget", self.id),
            }
        }
        if definition.target_types.is_empty() {
            if let Some(t) = template {
                definition.target_types = t.target_types.clone();
            }
        }
        definition
    }

    /// Load the identity part of a label fetch
    pub fn initialize_label_data(&mut self, raw: RawInstance) {
        if raw.name.is_some() {
            self.name = raw.name;
        }
        if !raw.types.is_empty() {
            self.types = raw.types;
        }
        if raw.space.is_some() {
            self.space = raw.space;
        }
        self.label_fetch_state = FetchState::Fetched;
    }

    /// Populate a new, unsaved instance from a type template
    pub fn initialize_from_type(&mut self, def: &TypeDefinition, space: &str, ctx: &FieldContext) {
        self.types = vec![def.summary()];
        self.space = Some(space.to_string());
        self.label_field = def.label_field.clone();
        self.permissions = Permissions::all();
        self.fields = def
            .fields
            .iter()
            .map(|(name, field)| {
                let field = self.normalize_definition(name, field.clone(), None);
                (name.clone(), ctx.build_store(name, field))
            })
            .collect();
        self.is_new = true;
        self.fetch_state = FetchState::Fetched;
        self.label_fetch_state = FetchState::Fetched;
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &dyn FieldStore)> {
        self.fields.iter().map(|(name, f)| (name.as_str(), f.as_ref()))
    }

    pub fn field(&self, name: &str) -> Option<&dyn FieldStore> {
        self.fields.get(name).map(|f| f.as_ref())
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Box<dyn FieldStore>> {
        self.fields.get_mut(name)
    }

    /// Typed access to a field store
    pub fn field_as<T: FieldStore>(&self, name: &str) -> Option<&T> {
        self.fields.get(name)?.downcast_ref::<T>()
    }

    pub fn field_as_mut<T: FieldStore>(&mut self, name: &str) -> Option<&mut T> {
        self.fields.get_mut(name)?.downcast_mut::<T>()
    }

    /// Field names in display order: label field first, then by declared
    /// order, fields without one last
    pub fn ordered_field_names(&self) -> Vec<&str> {
        let mut names: Vec<(&str, &dyn FieldStore)> = self.fields().collect();
        names.sort_by_key(|(name, f)| {
            let is_label = self.label_field.as_deref() == Some(*name);
            (!is_label, f.definition().order.is_none(), f.definition().order)
        });
        names.into_iter().map(|(name, _)| name).collect()
    }

    pub fn has_changed(&self) -> bool {
        self.is_new || self.fields.values().any(|f| f.has_changed())
    }

    /// Discard every local edit
    pub fn reset_changes(&mut self) {
        for field in self.fields.values_mut() {
            field.reset();
        }
    }

    /// Identifiers of every instance this one references, in field order,
    /// without duplicates or self references
    pub fn children_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for field in self.fields.values() {
            field.collect_reference_ids(&mut ids);
        }
        ids.into_iter()
            .filter(|id| id != &self.id)
            .collect::<IndexSet<String>>()
            .into_iter()
            .collect()
    }

    fn tagged(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(
            TYPE_KEY.to_string(),
            Value::Array(self.types.iter().map(|t| Value::String(t.name.clone())).collect()),
        );
        map
    }

    /// Every field, used to materialize a new instance
    pub fn payload(&self) -> Value {
        let mut map = self.tagged();
        for (name, field) in &self.fields {
            map.insert(name.clone(), field.return_value());
        }
        Value::Object(map)
    }

    /// Changed fields only, used for partial updates
    pub fn return_value(&self) -> Value {
        let mut map = self.tagged();
        for (name, field) in self.fields.iter().filter(|(_, f)| f.has_changed()) {
            map.insert(name.clone(), field.return_value());
        }
        Value::Object(map)
    }

    pub fn field_diffs(&self) -> Vec<FieldDiff> {
        self.ordered_field_names()
            .into_iter()
            .filter_map(|name| {
                let field = self.fields.get(name)?;
                if !field.has_changed() {
                    return None;
                }
                let mut before = field.definition().clone();
                before.value = Some(field.initial_value());
                before.alternatives = Vec::new();
                Some(FieldDiff {
                    name: name.to_string(),
                    label: field.definition().display_label(name).to_string(),
                    before,
                    after: field.clone_with_initial_value(),
                })
            })
            .collect()
    }

    /// Current validation messages, by field name in display order
    pub fn validation_warnings(&self) -> Vec<(String, String)> {
        self.ordered_field_names()
            .into_iter()
            .filter_map(|name| {
                let warning = self.fields.get(name)?.validation_warning()?;
                Some((name.to_string(), warning))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EditorConfig;
    use crate::field::{InputTextFieldStore, LinksFieldStore};
    use crate::schema::TypeRegistry;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const TYPES: &str = r#"
- name: Dataset
  labelField: title
  spaces: [common]
  fields:
    title:
      widget: InputText
      order: 2
      isRequired: true
    contributors:
      widget: DynamicDropdown
      order: 1
      targetTypes: [{ name: Person }]
    custodian:
      widget: SimpleDropdown
      targetTypes: [{ name: Person }]
    funding:
      widget: Nested
      targetTypes: [{ name: Funding }]
- name: Funding
  fields:
    funder:
      widget: SimpleDropdown
"#;

    fn ctx() -> FieldContext {
        FieldContext::new(TypeRegistry::from_yaml_str(TYPES).unwrap(), EditorConfig::default())
    }

    fn raw() -> RawInstance {
        serde_json::from_value(json!({
            "id": "d1",
            "name": "Brain atlas",
            "types": [{ "name": "Dataset", "labelField": "title" }],
            "space": "common",
            "permissions": { "canRead": true, "canWrite": true },
            "fields": {
                "title": {
                    "widget": "InputText",
                    "order": 2,
                    "isRequired": true,
                    "value": "Brain atlas"
                },
                "contributors": {
                    "widget": "DynamicDropdown",
                    "order": 1,
                    "value": [{ "@id": "p1" }, { "@id": "p2" }, { "@id": "d1" }]
                },
                "custodian": { "widget": "SimpleDropdown", "value": { "@id": "p1" } },
                "funding": {
                    "widget": "Nested",
                    "targetTypes": [{ "name": "Funding" }],
                    "value": [{ "@type": ["Funding"], "funder": { "@id": "org1" } }]
                },
                "map": { "widget": "MapPicker", "value": { "lat": 1 } }
            }
        }))
        .unwrap()
    }

    fn loaded() -> Instance {
        let mut instance = Instance::new("d1");
        instance.initialize_data(raw(), &ctx());
        instance
    }

    #[test]
    fn test_initialize_data() {
        let instance = loaded();
        assert!(instance.fetch_state().is_fetched());
        assert!(instance.label_fetch_state().is_fetched());
        assert_eq!(instance.label_field(), Some("title"));
        assert!(instance.field("title").unwrap().definition().is_public);
        assert!(!instance.field("custodian").unwrap().definition().is_public);
        assert!(instance.permissions().can_write);
        assert!(!instance.has_changed());
        // Unknown widgets degrade with a warning instead of failing the load
        assert!(instance.field("map").unwrap().state().warning.is_some());
    }

    #[test]
    fn test_children_ids_dedup_and_skip_self() {
        let instance = loaded();
        assert_eq!(instance.children_ids(), vec!["p1", "p2", "org1"]);
    }

    #[test]
    fn test_payload_and_return_value() {
        let mut instance = loaded();
        instance
            .field_as_mut::<InputTextFieldStore>("title")
            .unwrap()
            .set_text("Mouse atlas");
        assert!(instance.has_changed());
        assert_eq!(
            instance.return_value(),
            json!({ "@type": ["Dataset"], "title": "Mouse atlas" })
        );
        let payload = instance.payload();
        assert_eq!(payload["custodian"], json!({ "@id": "p1" }));
        assert_eq!(payload["map"], json!({ "lat": 1 }));
        assert_eq!(instance.display_name(), "Mouse atlas");

        let diffs = instance.field_diffs();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].before.value, Some(json!("Brain atlas")));
        assert_eq!(diffs[0].after.value, Some(json!("Mouse atlas")));

        instance.reset_changes();
        assert!(!instance.has_changed());
    }

    #[test]
    fn test_reinitialize_reuses_stores() {
        let mut instance = loaded();
        instance
            .field_as_mut::<LinksFieldStore>("contributors")
            .unwrap()
            .options_mut()
            .set_search_term("smi");
        instance.initialize_data(raw(), &ctx());
        let links = instance.field_as::<LinksFieldStore>("contributors").unwrap();
        assert_eq!(links.options().search_term(), "smi");
    }

    #[test]
    fn test_ordered_field_names() {
        let instance = loaded();
        assert_eq!(
            instance.ordered_field_names(),
            vec!["title", "contributors", "custodian", "funding", "map"]
        );
    }

    #[test]
    fn test_new_instance_from_type() {
        let ctx = ctx();
        let mut instance = Instance::new("tmp");
        let def = ctx.types.get("Dataset").unwrap().clone();
        instance.initialize_from_type(&def, "common", &ctx);
        assert!(instance.is_new());
        assert!(instance.has_changed());
        assert_eq!(instance.space(), Some("common"));
        assert_eq!(instance.payload()["@type"], json!(["Dataset"]));
        // Required title is untouched and empty, so no warning yet
        assert!(instance.validation_warnings().is_empty());
    }

    #[test]
    fn test_validation_warnings() {
        let mut instance = loaded();
        assert!(instance.validation_warnings().is_empty());
        instance
            .field_as_mut::<InputTextFieldStore>("title")
            .unwrap()
            .set_text("");
        let warnings = instance.validation_warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].0, "title");
    }

    #[test]
    fn test_label_data_keeps_fields() {
        let mut instance = loaded();
        instance.initialize_label_data(RawInstance {
            id: "d1".into(),
            name: Some("Renamed".into()),
            ..Default::default()
        });
        assert_eq!(instance.name(), Some("Renamed"));
        assert_eq!(instance.types()[0].name, "Dataset");
        assert!(instance.field("title").is_some());
    }

    #[test]
    fn test_incoming_links_paging() {
        let mut instance = Instance::new("p1");
        instance.append_incoming_links(
            "author",
            "Book",
            IncomingLinkPage {
                data: vec![Default::default()],
                size: 1,
                total: 2,
            },
        );
        assert!(instance.has_more_incoming_links("author", "Book"));
        instance.append_incoming_links(
            "author",
            "Book",
            IncomingLinkPage {
                data: vec![Default::default()],
                size: 1,
                total: 2,
            },
        );
        assert!(!instance.has_more_incoming_links("author", "Book"));
    }
}
