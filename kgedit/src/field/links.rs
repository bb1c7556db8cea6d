use super::options::OptionsSearch;
use super::reference::{normalize_references, reference_ids, Reference};
use super::validation::{items_warning, required_warning, should_validate};
use super::{FieldContext, FieldState, FieldStore};
use crate::error::{KgError, Result};
use crate::schema::FieldDefinition;
use serde_json::Value;
use std::collections::HashSet;

/// Ordered list of references (`DynamicDropdown`, `DynamicTable`).
///
/// Fields with `lazyShowLinks` only mark the first few references visible on
/// load so that rendering them does not trigger a label fetch for every link.
#[derive(Debug)]
pub struct LinksFieldStore {
    name: String,
    definition: FieldDefinition,
    state: FieldState,
    mapping_key: String,
    value: Vec<Reference>,
    initial_value: Vec<Reference>,
    return_as_null: bool,
    lazy_visible_count: usize,
    visible: HashSet<String>,
    options: OptionsSearch,
}

impl LinksFieldStore {
    pub fn new(name: &str, definition: FieldDefinition, ctx: &FieldContext) -> Self {
        let options = OptionsSearch::new(&definition, ctx.config.links.page_size);
        LinksFieldStore {
            name: name.to_string(),
            mapping_key: definition.mapping_key().to_string(),
            definition,
            state: FieldState::default(),
            value: Vec::new(),
            initial_value: Vec::new(),
            return_as_null: false,
            lazy_visible_count: ctx.config.links.lazy_visible_count,
            visible: HashSet::new(),
            options,
        }
    }

    pub fn mapping_key(&self) -> &str {
        &self.mapping_key
    }

    pub fn references(&self) -> &[Reference] {
        &self.value
    }

    pub fn ids(&self) -> Vec<&str> {
        reference_ids(&self.value, &self.mapping_key)
    }

    pub fn options(&self) -> &OptionsSearch {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut OptionsSearch {
        &mut self.options
    }

    pub fn contains(&self, id: &str) -> bool {
        self.value.iter().any(|r| r.id(&self.mapping_key) == Some(id))
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.value.iter().position(|r| r.id(&self.mapping_key) == Some(id))
    }

    /// Add a reference by identifier; present identifiers are ignored
    pub fn add_id(&mut self, id: &str) {
        self.push(Reference::from_id(&self.mapping_key, id));
    }

    fn push(&mut self, reference: Reference) {
        let Some(id) = reference.id(&self.mapping_key).map(str::to_string) else {
            return;
        };
        if self.contains(&id) {
            return;
        }
        self.visible.insert(id);
        self.return_as_null = false;
        self.value.push(reference);
    }

    pub fn remove_value(&mut self, id: &str) {
        if let Some(index) = self.position(id) {
            let mut refs = self.value.clone();
            refs.remove(index);
            self.replace(refs);
        }
    }

    /// Replace the whole list, keeping the first occurrence of each identifier
    pub fn set_values(&mut self, refs: Vec<Reference>) {
        let mut unique: Vec<Reference> = Vec::with_capacity(refs.len());
        for r in refs {
            let duplicate = unique
                .iter()
                .any(|u| u.id(&self.mapping_key) == r.id(&self.mapping_key));
            if r.id(&self.mapping_key).is_some() && !duplicate {
                unique.push(r);
            }
        }
        self.replace(unique);
    }

    pub fn remove_all_values(&mut self) {
        self.replace(Vec::new());
    }

    /// Move `id` right after `after`, or to the front when `after` is `None`
    pub fn move_value_after(&mut self, id: &str, after: Option<&str>) -> Result<()> {
        let index = self.position(id).ok_or_else(|| self.missing(id))?;
        let mut refs = self.value.clone();
        let reference = refs.remove(index);
        let target = match after {
            None => 0,
            Some(after_id) => {
                refs.iter()
                    .position(|r| r.id(&self.mapping_key) == Some(after_id))
                    .ok_or_else(|| self.missing(after_id))?
                    + 1
            }
        };
        refs.insert(target, reference);
        self.value = refs;
        Ok(())
    }

    fn missing(&self, id: &str) -> KgError {
        KgError::InvalidValue {
            field: self.name.clone(),
            message: format!("no reference to '{id}'"),
        }
    }

    fn replace(&mut self, refs: Vec<Reference>) {
        if refs.is_empty() {
            self.return_as_null = self.return_as_null || !self.value.is_empty();
        } else {
            self.return_as_null = false;
        }
        for id in reference_ids(&refs, &self.mapping_key) {
            if !self.contains(id) {
                self.visible.insert(id.to_string());
            }
        }
        self.value = refs;
    }

    pub fn is_lazy(&self) -> bool {
        self.definition.lazy_show_links
    }

    pub fn is_link_visible(&self, id: &str) -> bool {
        self.visible.contains(id)
    }

    pub fn show_link(&mut self, id: &str) {
        if self.contains(id) {
            self.visible.insert(id.to_string());
        }
    }

    pub fn show_all_links(&mut self) {
        self.visible = self.ids().into_iter().map(str::to_string).collect();
    }

    /// Identifiers to resolve labels for, in field order
    pub fn visible_ids(&self) -> Vec<&str> {
        self.ids()
            .into_iter()
            .filter(|id| self.visible.contains(*id))
            .collect()
    }

    fn reset_visibility(&mut self) {
        let limit = if self.is_lazy() {
            self.lazy_visible_count
        } else {
            usize::MAX
        };
        self.visible = self
            .ids()
            .into_iter()
            .take(limit)
            .map(str::to_string)
            .collect();
    }
}

impl FieldStore for LinksFieldStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn definition(&self) -> &FieldDefinition {
        &self.definition
    }

    fn state(&self) -> &FieldState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut FieldState {
        &mut self.state
    }

    fn value(&self) -> Value {
        Value::Array(self.value.iter().map(Reference::to_value).collect())
    }

    fn initial_value(&self) -> Value {
        Value::Array(self.initial_value.iter().map(Reference::to_value).collect())
    }

    fn update_value(&mut self, raw: &Value) {
        let refs = normalize_references(&self.name, &self.mapping_key, raw);
        self.return_as_null = false;
        self.value = refs.clone();
        self.initial_value = refs;
        self.reset_visibility();
    }

    fn set_value(&mut self, raw: Value) -> Result<()> {
        let refs = normalize_references(&self.name, &self.mapping_key, &raw);
        self.replace(refs);
        Ok(())
    }

    fn add_value(&mut self, raw: Value) -> Result<()> {
        let reference = Reference::from_raw(&self.mapping_key, &raw).ok_or_else(|| {
            KgError::InvalidValue {
                field: self.name.clone(),
                message: format!("expected a reference with '{}', got {raw}", self.mapping_key),
            }
        })?;
        self.push(reference);
        Ok(())
    }

    fn remove_value_at(&mut self, index: usize) -> Result<()> {
        let id = self
            .value
            .get(index)
            .and_then(|r| r.id(&self.mapping_key))
            .map(str::to_string)
            .ok_or_else(|| KgError::InvalidValue {
                field: self.name.clone(),
                message: format!("no reference at index {index}"),
            })?;
        self.remove_value(&id);
        Ok(())
    }

    fn reset(&mut self) {
        self.return_as_null = false;
        self.value = self.initial_value.clone();
        self.reset_visibility();
    }

    fn return_value(&self) -> Value {
        if self.value.is_empty() && self.return_as_null {
            Value::Null
        } else {
            self.value()
        }
    }

    fn has_changed(&self) -> bool {
        self.ids() != reference_ids(&self.initial_value, &self.mapping_key)
    }

    fn validation_warning(&self) -> Option<String> {
        if !should_validate(self.has_changed(), self.initial_value.is_empty()) {
            return None;
        }
        required_warning(&self.definition, self.value.is_empty())
            .or_else(|| items_warning(&self.definition, self.value.len()))
    }

    fn collect_reference_ids(&self, out: &mut Vec<String>) {
        out.extend(self.ids().into_iter().map(str::to_string));
    }

    impl_any!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EditorConfig;
    use crate::schema::TypeRegistry;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn store() -> LinksFieldStore {
        LinksFieldStore::new(
            "contributors",
            FieldDefinition::new("DynamicDropdown"),
            &FieldContext::default(),
        )
    }

    fn refs(ids: &[&str]) -> Value {
        Value::Array(ids.iter().map(|id| json!({ "@id": id })).collect())
    }

    #[test]
    fn test_add_same_id_twice_keeps_one() {
        let mut s = store();
        s.update_value(&Value::Null);
        s.add_value(json!({ "@id": "p1" })).unwrap();
        s.add_value(json!({ "@id": "p1", "name": "dup" })).unwrap();
        assert_eq!(s.ids(), vec!["p1"]);
        assert!(s.has_changed());
    }

    #[test]
    fn test_bare_object_wrapped() {
        let mut s = store();
        s.update_value(&json!({ "@id": "p1" }));
        assert_eq!(s.value(), refs(&["p1"]));
        assert!(!s.has_changed());
    }

    #[test]
    fn test_reordering_is_a_change() {
        let mut s = store();
        s.update_value(&refs(&["a", "b", "c"]));
        s.move_value_after("c", None).unwrap();
        assert_eq!(s.ids(), vec!["c", "a", "b"]);
        assert!(s.has_changed());

        s.move_value_after("c", Some("b")).unwrap();
        assert_eq!(s.ids(), vec!["a", "b", "c"]);
        assert!(!s.has_changed());
        assert!(s.move_value_after("zzz", None).is_err());
    }

    #[test]
    fn test_remove_all_returns_null() {
        let mut s = store();
        s.update_value(&refs(&["a"]));
        s.remove_all_values();
        assert_eq!(s.return_value(), Value::Null);
        s.add_id("b");
        assert_eq!(s.return_value(), refs(&["b"]));
    }

    #[test]
    fn test_remove_value_at() {
        let mut s = store();
        s.update_value(&refs(&["a", "b"]));
        s.remove_value_at(0).unwrap();
        assert_eq!(s.ids(), vec!["b"]);
        assert!(s.remove_value_at(5).is_err());
    }

    #[test]
    fn test_lazy_visibility() {
        let mut config = EditorConfig::default();
        config.links.lazy_visible_count = 2;
        let ctx = FieldContext::new(TypeRegistry::default(), config);
        let mut def = FieldDefinition::new("DynamicTable");
        def.lazy_show_links = true;
        let mut s = LinksFieldStore::new("files", def, &ctx);

        s.update_value(&refs(&["a", "b", "c", "d"]));
        assert_eq!(s.visible_ids(), vec!["a", "b"]);
        assert!(!s.is_link_visible("c"));

        s.show_link("d");
        assert_eq!(s.visible_ids(), vec!["a", "b", "d"]);

        s.add_id("e");
        assert!(s.is_link_visible("e"));

        s.show_all_links();
        assert_eq!(s.visible_ids().len(), 5);

        // Every reference still counts for the instance graph
        let mut ids = Vec::new();
        s.collect_reference_ids(&mut ids);
        assert_eq!(ids.len(), 5);
    }

    #[test]
    fn test_eager_fields_show_everything() {
        let mut s = store();
        s.update_value(&refs(&["a", "b", "c"]));
        assert_eq!(s.visible_ids(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_items_validation() {
        let mut def = FieldDefinition::new("DynamicDropdown");
        def.max_items = Some(1);
        let mut s = LinksFieldStore::new("f", def, &FieldContext::default());
        s.update_value(&Value::Null);
        s.add_id("a");
        assert!(s.validation_warning().is_none());
        s.add_id("b");
        assert!(s.validation_warning().is_some());
    }
}
