use super::options::OptionsSearch;
use super::reference::Reference;
use super::validation::{required_warning, should_validate};
use super::{FieldContext, FieldState, FieldStore};
use crate::error::{KgError, Result};
use crate::schema::FieldDefinition;
use serde_json::Value;

/// Current value of a single reference field.
///
/// `Cleared` differs from `Unset` only in what is sent on save: the user
/// removed a reference, so the server must be told to drop it.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkSelection {
    Unset,
    Cleared,
    Selected(Reference),
}

/// Single reference field (`SimpleDropdown`)
#[derive(Debug)]
pub struct LinkFieldStore {
    name: String,
    definition: FieldDefinition,
    state: FieldState,
    mapping_key: String,
    value: LinkSelection,
    initial_value: Option<Reference>,
    clear_sentinel: Option<String>,
    options: OptionsSearch,
}

impl LinkFieldStore {
    pub fn new(name: &str, definition: FieldDefinition, ctx: &FieldContext) -> Self {
        let options = OptionsSearch::new(&definition, ctx.config.links.page_size);
        LinkFieldStore {
            name: name.to_string(),
            mapping_key: definition.mapping_key().to_string(),
            definition,
            state: FieldState::default(),
            value: LinkSelection::Unset,
            initial_value: None,
            clear_sentinel: ctx.config.clear_sentinel.clone(),
            options,
        }
    }

    pub fn selection(&self) -> &LinkSelection {
        &self.value
    }

    pub fn selected_id(&self) -> Option<&str> {
        match &self.value {
            LinkSelection::Selected(r) => r.id(&self.mapping_key),
            _ => None,
        }
    }

    pub fn mapping_key(&self) -> &str {
        &self.mapping_key
    }

    pub fn options(&self) -> &OptionsSearch {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut OptionsSearch {
        &mut self.options
    }

    /// Select a reference by identifier
    pub fn select_id(&mut self, id: &str) {
        self.select(Reference::from_id(&self.mapping_key, id));
    }

    fn select(&mut self, reference: Reference) {
        if reference.id(&self.mapping_key) != self.selected_id() {
            self.value = LinkSelection::Selected(reference);
        }
    }

    /// Remove the selected reference
    pub fn clear(&mut self) {
        if matches!(self.value, LinkSelection::Selected(_)) {
            self.value = LinkSelection::Cleared;
        }
    }

    fn parse(&self, raw: &Value) -> Result<Option<Reference>> {
        if super::is_empty_value(raw) {
            return Ok(None);
        }
        Reference::from_raw(&self.mapping_key, raw)
            .map(Some)
            .ok_or_else(|| KgError::InvalidValue {
                field: self.name.clone(),
                message: format!("expected a reference with '{}', got {raw}", self.mapping_key),
            })
    }

    fn initial_id(&self) -> Option<&str> {
        self.initial_value.as_ref().and_then(|r| r.id(&self.mapping_key))
    }
}

impl FieldStore for LinkFieldStore {
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
        match &self.value {
            LinkSelection::Selected(r) => r.to_value(),
            _ => Value::Null,
        }
    }

    fn initial_value(&self) -> Value {
        self.initial_value
            .as_ref()
            .map(Reference::to_value)
            .unwrap_or(Value::Null)
    }

    fn update_value(&mut self, raw: &Value) {
        let raw = match raw {
            Value::Array(items) => {
                if items.len() > 1 {
                    log::warn!(
                        "Field '{}' holds {} references, keeping the first",
                        self.name,
                        items.len()
                    );
                }
                items.first().unwrap_or(&Value::Null)
            }
            other => other,
        };
        let reference = self.parse(raw).unwrap_or_else(|e| {
            log::warn!("{e}");
            None
        });
        self.value = match &reference {
            Some(r) => LinkSelection::Selected(r.clone()),
            None => LinkSelection::Unset,
        };
        self.initial_value = reference;
    }

    fn set_value(&mut self, raw: Value) -> Result<()> {
        match self.parse(&raw)? {
            Some(reference) => self.select(reference),
            None => self.clear(),
        }
        Ok(())
    }

    /// Selecting the reference that is already selected is a no-op
    fn add_value(&mut self, raw: Value) -> Result<()> {
        self.set_value(raw)
    }

    fn reset(&mut self) {
        self.value = match &self.initial_value {
            Some(r) => LinkSelection::Selected(r.clone()),
            None => LinkSelection::Unset,
        };
    }

    fn return_value(&self) -> Value {
        match (&self.value, &self.clear_sentinel) {
            (LinkSelection::Selected(r), _) => r.to_value(),
            (LinkSelection::Cleared, Some(sentinel)) => {
                Reference::from_id(&self.mapping_key, sentinel).to_value()
            }
            _ => Value::Null,
        }
    }

    fn has_changed(&self) -> bool {
        self.selected_id() != self.initial_id()
    }

    fn validation_warning(&self) -> Option<String> {
        if !should_validate(self.has_changed(), self.initial_value.is_none()) {
            return None;
        }
        required_warning(&self.definition, self.selected_id().is_none())
    }

    fn collect_reference_ids(&self, out: &mut Vec<String>) {
        if let Some(id) = self.selected_id() {
            out.push(id.to_string());
        }
    }

    impl_any!();
}
