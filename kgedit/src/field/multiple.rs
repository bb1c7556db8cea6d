use super::number::parse_number;
use super::text::normalize_text;
use super::validation::{
    items_warning, number_warning, required_warning, should_validate, text_warning,
};
use super::{FieldContext, FieldState, FieldStore};
use crate::error::{KgError, Result};
use crate::schema::FieldDefinition;
use serde_json::Value;

/// Item type of a [`MultiValueFieldStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Text,
    Number,
}

/// Ordered list of scalar values (`InputTextMultiple`, `InputNumberMultiple`, `Annotation`)
#[derive(Debug)]
pub struct MultiValueFieldStore {
    name: String,
    definition: FieldDefinition,
    state: FieldState,
    kind: ScalarKind,
    value: Vec<Value>,
    initial_value: Vec<Value>,
    return_as_null: bool,
}

impl MultiValueFieldStore {
    pub fn new(name: &str, definition: FieldDefinition, kind: ScalarKind) -> Self {
        MultiValueFieldStore {
            name: name.to_string(),
            definition,
            state: FieldState::default(),
            kind,
            value: Vec::new(),
            initial_value: Vec::new(),
            return_as_null: false,
        }
    }

    pub fn text(name: &str, definition: FieldDefinition, _ctx: &FieldContext) -> Self {
        Self::new(name, definition, ScalarKind::Text)
    }

    pub fn numbers(name: &str, definition: FieldDefinition, _ctx: &FieldContext) -> Self {
        Self::new(name, definition, ScalarKind::Number)
    }

    pub fn kind(&self) -> ScalarKind {
        self.kind
    }

    pub fn items(&self) -> &[Value] {
        &self.value
    }

    pub fn remove_all_values(&mut self) {
        self.replace(Vec::new());
    }

    fn normalize_item(&self, raw: &Value) -> std::result::Result<Option<Value>, String> {
        match self.kind {
            ScalarKind::Text => {
                let text = normalize_text(raw);
                Ok((!text.trim().is_empty()).then_some(Value::String(text)))
            }
            ScalarKind::Number => Ok(parse_number(raw)?.map(Value::Number)),
        }
    }

    fn normalize_list(&self, raw: &Value) -> std::result::Result<Vec<Value>, String> {
        let items: Vec<&Value> = match raw {
            Value::Null => Vec::new(),
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            if let Some(v) = self.normalize_item(item)? {
                values.push(v);
            }
        }
        Ok(values)
    }

    fn replace(&mut self, values: Vec<Value>) {
        if values.is_empty() {
            self.return_as_null = self.return_as_null || !self.value.is_empty();
        } else {
            self.return_as_null = false;
        }
        self.value = values;
    }

    fn invalid(&self, message: String) -> KgError {
        KgError::InvalidValue {
            field: self.name.clone(),
            message,
        }
    }

    fn item_warning(&self, item: &Value) -> Option<String> {
        match (self.kind, item) {
            (ScalarKind::Text, Value::String(s)) => text_warning(&self.definition, s),
            (ScalarKind::Number, Value::Number(n)) => {
                n.as_f64().and_then(|n| number_warning(&self.definition, n))
            }
            _ => None,
        }
    }
}

impl FieldStore for MultiValueFieldStore {
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
        Value::Array(self.value.clone())
    }

    fn initial_value(&self) -> Value {
        Value::Array(self.initial_value.clone())
    }

    fn update_value(&mut self, raw: &Value) {
        if !raw.is_array() && !raw.is_null() {
            log::warn!("Field '{}' expected a list, wrapping single value", self.name);
        }
        let values = self.normalize_list(raw).unwrap_or_else(|e| {
            log::warn!("Field '{}' holds invalid items: {e}", self.name);
            Vec::new()
        });
        self.return_as_null = false;
        self.value = values.clone();
        self.initial_value = values;
    }

    fn set_value(&mut self, raw: Value) -> Result<()> {
        let values = self.normalize_list(&raw).map_err(|e| self.invalid(e))?;
        self.replace(values);
        Ok(())
    }

    /// Appends a value; blank and duplicate values are ignored
    fn add_value(&mut self, raw: Value) -> Result<()> {
        let Some(item) = self.normalize_item(&raw).map_err(|e| self.invalid(e))? else {
            return Ok(());
        };
        if !self.value.contains(&item) {
            self.return_as_null = false;
            self.value.push(item);
        }
        Ok(())
    }

    fn remove_value_at(&mut self, index: usize) -> Result<()> {
        if index >= self.value.len() {
            return Err(self.invalid(format!("no value at index {index}")));
        }
        let mut values = self.value.clone();
        values.remove(index);
        self.replace(values);
        Ok(())
    }

    fn reset(&mut self) {
        self.return_as_null = false;
        self.value = self.initial_value.clone();
    }

    fn return_value(&self) -> Value {
        if self.value.is_empty() && self.return_as_null {
            Value::Null
        } else {
            self.value()
        }
    }

    fn has_changed(&self) -> bool {
        self.value != self.initial_value
    }

    fn validation_warning(&self) -> Option<String> {
        if !should_validate(self.has_changed(), self.initial_value.is_empty()) {
            return None;
        }
        required_warning(&self.definition, self.value.is_empty())
            .or_else(|| items_warning(&self.definition, self.value.len()))
            .or_else(|| self.value.iter().find_map(|item| self.item_warning(item)))
    }

    impl_any!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn keywords() -> MultiValueFieldStore {
        MultiValueFieldStore::new("keywords", FieldDefinition::new("InputTextMultiple"), ScalarKind::Text)
    }

    #[test]
    fn test_single_value_wrapped() {
        let mut s = keywords();
        s.update_value(&json!("solo"));
        assert_eq!(s.value(), json!(["solo"]));
        assert!(!s.has_changed());
    }

    #[test]
    fn test_add_value_deduplicates_and_skips_blank() {
        let mut s = keywords();
        s.update_value(&json!(["a"]));
        s.add_value(json!("b")).unwrap();
        s.add_value(json!("b")).unwrap();
        s.add_value(json!("  ")).unwrap();
        assert_eq!(s.value(), json!(["a", "b"]));
        assert!(s.has_changed());
    }

    #[test]
    fn test_reorder_is_a_change() {
        let mut s = keywords();
        s.update_value(&json!(["a", "b"]));
        s.set_value(json!(["b", "a"])).unwrap();
        assert!(s.has_changed());
    }

    #[test]
    fn test_emptying_returns_null() {
        let mut s = keywords();
        s.update_value(&json!(["a"]));
        s.remove_value_at(0).unwrap();
        assert_eq!(s.value(), json!([]));
        assert_eq!(s.return_value(), Value::Null);
        assert!(s.remove_value_at(0).is_err());

        s.add_value(json!("c")).unwrap();
        assert_eq!(s.return_value(), json!(["c"]));
    }

    #[test]
    fn test_numbers() {
        let mut s = MultiValueFieldStore::new(
            "sizes",
            FieldDefinition::new("InputNumberMultiple"),
            ScalarKind::Number,
        );
        s.update_value(&json!([1, "2"]));
        assert_eq!(s.value(), json!([1, 2]));
        assert!(s.add_value(json!("three")).is_err());
    }

    #[test]
    fn test_item_bounds_validation() {
        let mut def = FieldDefinition::new("InputTextMultiple");
        def.min_items = Some(1);
        def.max_items = Some(2);
        let mut s = MultiValueFieldStore::new("k", def, ScalarKind::Text);
        s.update_value(&Value::Null);
        assert!(s.validation_warning().is_none());

        s.set_value(json!(["a", "b", "c"])).unwrap();
        assert!(s.validation_warning().is_some());
        s.remove_value_at(2).unwrap();
        assert!(s.validation_warning().is_none());
    }
}
