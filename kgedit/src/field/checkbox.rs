use super::{FieldContext, FieldState, FieldStore};
use crate::error::{KgError, Result};
use crate::schema::FieldDefinition;
use serde_json::Value;

#[derive(Debug)]
pub struct CheckBoxFieldStore {
    name: String,
    definition: FieldDefinition,
    state: FieldState,
    value: bool,
    initial_value: bool,
}

impl CheckBoxFieldStore {
    pub fn new(name: &str, definition: FieldDefinition, _ctx: &FieldContext) -> Self {
        CheckBoxFieldStore {
            name: name.to_string(),
            definition,
            state: FieldState::default(),
            value: false,
            initial_value: false,
        }
    }

    pub fn checked(&self) -> bool {
        self.value
    }

    pub fn toggle(&mut self) {
        self.value = !self.value;
    }
}

fn parse_bool(raw: &Value) -> Option<bool> {
    match raw {
        Value::Null => Some(false),
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

impl FieldStore for CheckBoxFieldStore {
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
        Value::Bool(self.value)
    }

    fn initial_value(&self) -> Value {
        Value::Bool(self.initial_value)
    }

    fn update_value(&mut self, raw: &Value) {
        let checked = parse_bool(raw).unwrap_or_else(|| {
            log::warn!("Field '{}' expected a boolean, got {raw}", self.name);
            false
        });
        self.value = checked;
        self.initial_value = checked;
    }

    fn set_value(&mut self, raw: Value) -> Result<()> {
        self.value = parse_bool(&raw).ok_or_else(|| KgError::InvalidValue {
            field: self.name.clone(),
            message: format!("expected a boolean, got {raw}"),
        })?;
        Ok(())
    }

    fn reset(&mut self) {
        self.value = self.initial_value;
    }

    fn return_value(&self) -> Value {
        Value::Bool(self.value)
    }

    fn has_changed(&self) -> bool {
        self.value != self.initial_value
    }

    impl_any!();
}
