use super::validation::{number_warning, required_warning, should_validate};
use super::{FieldContext, FieldState, FieldStore};
use crate::error::{KgError, Result};
use crate::schema::FieldDefinition;
use serde_json::{Number, Value};

#[derive(Debug)]
pub struct InputNumberFieldStore {
    name: String,
    definition: FieldDefinition,
    state: FieldState,
    value: Option<Number>,
    initial_value: Option<Number>,
    return_as_null: bool,
}

impl InputNumberFieldStore {
    pub fn new(name: &str, definition: FieldDefinition, _ctx: &FieldContext) -> Self {
        InputNumberFieldStore {
            name: name.to_string(),
            definition,
            state: FieldState::default(),
            value: None,
            initial_value: None,
            return_as_null: false,
        }
    }

    pub fn number(&self) -> Option<f64> {
        self.value.as_ref().and_then(Number::as_f64)
    }

    pub fn set_number(&mut self, number: Option<Number>) {
        match number {
            Some(_) => self.return_as_null = false,
            None => self.return_as_null = self.return_as_null || self.value.is_some(),
        }
        self.value = number;
    }
}

/// Parse a raw value into a JSON number. Blank strings and null are no number.
pub(crate) fn parse_number(raw: &Value) -> std::result::Result<Option<Number>, String> {
    match raw {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(Some(n.clone())),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                return Ok(Some(Number::from(i)));
            }
            s.parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Some)
                .ok_or_else(|| format!("'{s}' is not a number"))
        }
        other => Err(format!("expected a number, got {other}")),
    }
}

fn number_value(number: &Option<Number>) -> Value {
    number.clone().map(Value::Number).unwrap_or(Value::Null)
}

impl FieldStore for InputNumberFieldStore {
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
        number_value(&self.value)
    }

    fn initial_value(&self) -> Value {
        number_value(&self.initial_value)
    }

    fn update_value(&mut self, raw: &Value) {
        let number = parse_number(raw).unwrap_or_else(|e| {
            log::warn!("Field '{}' holds an invalid number: {e}", self.name);
            None
        });
        self.return_as_null = false;
        self.value = number.clone();
        self.initial_value = number;
    }

    fn set_value(&mut self, raw: Value) -> Result<()> {
        let number = parse_number(&raw).map_err(|message| KgError::InvalidValue {
            field: self.name.clone(),
            message,
        })?;
        self.set_number(number);
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
            self.value()
        }
    }

    fn has_changed(&self) -> bool {
        self.value != self.initial_value
    }

    fn validation_warning(&self) -> Option<String> {
        if !should_validate(self.has_changed(), self.initial_value.is_none()) {
            return None;
        }
        required_warning(&self.definition, self.value.is_none())
            .or_else(|| self.number().and_then(|n| number_warning(&self.definition, n)))
    }

    impl_any!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store(def: FieldDefinition) -> InputNumberFieldStore {
        InputNumberFieldStore::new("age", def, &FieldContext::default())
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(&json!("12")).unwrap(), Some(Number::from(12)));
        assert_eq!(parse_number(&json!(" 2.5 ")).unwrap().unwrap().as_f64(), Some(2.5));
        assert_eq!(parse_number(&json!("")).unwrap(), None);
        assert!(parse_number(&json!("abc")).is_err());
        assert!(parse_number(&json!(true)).is_err());
    }

    #[test]
    fn test_integer_round_trips_unchanged() {
        let mut s = store(FieldDefinition::new("InputNumber"));
        s.update_value(&json!(5));
        assert_eq!(s.value(), json!(5));
        s.set_value(json!("5")).unwrap();
        assert!(!s.has_changed());
    }

    #[test]
    fn test_invalid_edit_is_rejected() {
        let mut s = store(FieldDefinition::new("InputNumber"));
        s.update_value(&json!(1));
        let err = s.set_value(json!("one")).unwrap_err();
        assert!(matches!(err, KgError::InvalidValue { .. }));
        assert_eq!(s.value(), json!(1));
    }

    #[test]
    fn test_clearing_returns_null() {
        let mut s = store(FieldDefinition::new("InputNumber"));
        s.update_value(&json!(3));
        s.set_value(json!("")).unwrap();
        assert_eq!(s.value(), Value::Null);
        assert_eq!(s.return_value(), Value::Null);
        assert!(s.has_changed());
    }

    #[test]
    fn test_bounds() {
        let mut def = FieldDefinition::new("InputNumber");
        def.min_value = Some(0.0);
        def.max_value = Some(120.0);
        let mut s = store(def);
        s.update_value(&Value::Null);
        assert!(s.validation_warning().is_none());
        s.set_value(json!(150)).unwrap();
        assert!(s.validation_warning().unwrap().contains("120"));
        s.set_value(json!(30)).unwrap();
        assert!(s.validation_warning().is_none());
    }
}
