use super::validation::{required_warning, should_validate, text_warning};
use super::{FieldContext, FieldState, FieldStore};
use crate::error::Result;
use crate::schema::FieldDefinition;
use serde_json::Value;

/// Single-line or multi-line text, and date widgets stored as text
#[derive(Debug)]
pub struct InputTextFieldStore {
    name: String,
    definition: FieldDefinition,
    state: FieldState,
    value: String,
    initial_value: String,
    /// Set when the user emptied a field that held text; the save payload then
    /// carries `null` so the server clears it.
    return_as_null: bool,
}

impl InputTextFieldStore {
    pub fn new(name: &str, definition: FieldDefinition, _ctx: &FieldContext) -> Self {
        InputTextFieldStore {
            name: name.to_string(),
            definition,
            state: FieldState::default(),
            value: String::new(),
            initial_value: String::new(),
            return_as_null: false,
        }
    }

    pub fn text(&self) -> &str {
        &self.value
    }

    pub fn returns_null(&self) -> bool {
        self.return_as_null
    }

    /// Edit entry point taking plain text
    pub fn set_text(&mut self, text: &str) {
        if text.is_empty() {
            self.return_as_null = self.return_as_null || !self.value.is_empty();
        } else {
            self.return_as_null = false;
        }
        self.value = text.to_string();
    }
}

/// Coerce a raw value into text
pub(crate) fn normalize_text(raw: &Value) -> String {
    match raw {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items.first().map(normalize_text).unwrap_or_default(),
        Value::Object(_) => raw.to_string(),
    }
}

impl FieldStore for InputTextFieldStore {
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
        Value::String(self.value.clone())
    }

    fn initial_value(&self) -> Value {
        Value::String(self.initial_value.clone())
    }

    fn update_value(&mut self, raw: &Value) {
        if raw.is_array() {
            log::warn!("Field '{}' expected text, got a list; keeping the first item", self.name);
        }
        let text = normalize_text(raw);
        self.return_as_null = false;
        self.value = text.clone();
        self.initial_value = text;
    }

    fn set_value(&mut self, raw: Value) -> Result<()> {
        self.set_text(&normalize_text(&raw));
        Ok(())
    }

    fn reset(&mut self) {
        self.return_as_null = false;
        self.value = self.initial_value.clone();
    }

    fn return_value(&self) -> Value {
        if self.return_as_null {
            Value::Null
        } else {
            Value::String(self.value.clone())
        }
    }

    fn has_changed(&self) -> bool {
        self.value != self.initial_value
    }

    fn validation_warning(&self) -> Option<String> {
        if !should_validate(self.has_changed(), self.initial_value.is_empty()) {
            return None;
        }
        let is_empty = self.value.trim().is_empty();
        required_warning(&self.definition, is_empty)
            .or_else(|| text_warning(&self.definition, &self.value))
    }

    impl_any!();
}
