use super::{not_implemented, FieldContext, FieldState, FieldStore};
use crate::error::Result;
use crate::schema::FieldDefinition;
use serde_json::Value;

/// Store for widgets without a registered implementation.
///
/// The raw value is passed through untouched and can never be edited.
#[derive(Debug)]
pub struct UnsupportedFieldStore {
    name: String,
    definition: FieldDefinition,
    state: FieldState,
    value: Value,
}

impl UnsupportedFieldStore {
    pub fn new(name: &str, definition: FieldDefinition, _ctx: &FieldContext) -> Self {
        let state = FieldState {
            warning: Some(format!(
                "Widget '{}' is not supported, the value of '{}' is read only.",
                definition.widget, name
            )),
            ..Default::default()
        };
        UnsupportedFieldStore {
            name: name.to_string(),
            definition,
            state,
            value: Value::Null,
        }
    }
}

impl FieldStore for UnsupportedFieldStore {
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
        self.value.clone()
    }

    fn initial_value(&self) -> Value {
        self.value.clone()
    }

    fn update_value(&mut self, raw: &Value) {
        self.value = raw.clone();
    }

    fn set_value(&mut self, _raw: Value) -> Result<()> {
        Err(not_implemented(&self.definition.widget, "set_value"))
    }

    fn reset(&mut self) {}

    fn return_value(&self) -> Value {
        self.value.clone()
    }

    fn has_changed(&self) -> bool {
        false
    }

    impl_any!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KgError;
    use serde_json::json;

    #[test]
    fn test_value_passes_through() {
        let ctx = FieldContext::default();
        let mut s = ctx.build_store("geo", FieldDefinition::new("MapPicker"));
        assert!(s.downcast_ref::<UnsupportedFieldStore>().is_some());
        assert!(s.state().warning.as_deref().unwrap().contains("MapPicker"));

        s.update_value(&json!({ "lat": 1.5 }));
        assert_eq!(s.return_value(), json!({ "lat": 1.5 }));
        assert!(!s.has_changed());
        assert!(matches!(
            s.set_value(json!(1)),
            Err(KgError::NotImplemented { operation: "set_value", .. })
        ));
    }
}
