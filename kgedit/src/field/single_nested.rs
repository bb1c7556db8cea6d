use super::nested::{build_rows, NestedRow};
use super::validation::{required_warning, should_validate};
use super::{FieldContext, FieldState, FieldStore};
use crate::error::{KgError, Result};
use crate::schema::{FieldDefinition, TYPE_KEY};
use serde_json::{Map, Value};

/// A field holding at most one nested row (`SingleNested`)
#[derive(Debug)]
pub struct SingleNestedFieldStore {
    name: String,
    definition: FieldDefinition,
    state: FieldState,
    ctx: FieldContext,
    row: Option<NestedRow>,
    initial_value: Value,
}

impl SingleNestedFieldStore {
    pub fn new(name: &str, definition: FieldDefinition, ctx: &FieldContext) -> Self {
        SingleNestedFieldStore {
            name: name.to_string(),
            definition,
            state: FieldState::default(),
            ctx: ctx.clone(),
            row: None,
            initial_value: Value::Null,
        }
    }

    pub fn row(&self) -> Option<&NestedRow> {
        self.row.as_ref()
    }

    pub fn row_mut(&mut self) -> Option<&mut NestedRow> {
        self.row.as_mut()
    }

    fn build_row(&self, raw: &Value) -> Option<NestedRow> {
        match raw {
            Value::Null => None,
            Value::Array(items) => {
                let mut rows = build_rows(&self.name, raw, &self.definition, &self.ctx);
                if items.len() > 1 {
                    log::warn!(
                        "Field '{}' holds {} nested rows, keeping the first",
                        self.name,
                        items.len()
                    );
                }
                (!rows.is_empty()).then(|| rows.swap_remove(0))
            }
            other => NestedRow::build(&self.name, other, &self.definition, &self.ctx),
        }
    }

    /// Remove the row
    pub fn delete_item(&mut self) {
        self.row = None;
    }
}

impl FieldStore for SingleNestedFieldStore {
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
        self.row.as_ref().map(NestedRow::value).unwrap_or(Value::Null)
    }

    fn initial_value(&self) -> Value {
        self.initial_value.clone()
    }

    fn update_value(&mut self, raw: &Value) {
        self.row = self.build_row(raw);
        self.initial_value = self.value();
    }

    fn set_value(&mut self, raw: Value) -> Result<()> {
        match self.build_row(&raw) {
            Some(row) => self.row = Some(row),
            None => self.delete_item(),
        }
        Ok(())
    }

    /// Create the row if there is none. `raw` is a row type name or null.
    fn add_value(&mut self, raw: Value) -> Result<()> {
        if self.row.is_some() {
            return Ok(());
        }
        let mut map = Map::new();
        match raw {
            Value::Null => {}
            Value::String(name) => {
                map.insert(TYPE_KEY.to_string(), Value::Array(vec![Value::String(name)]));
            }
            other => {
                return Err(KgError::InvalidValue {
                    field: self.name.clone(),
                    message: format!("expected a row type name, got {other}"),
                })
            }
        }
        let row = NestedRow::build(&self.name, &Value::Object(map), &self.definition, &self.ctx)
            .ok_or_else(|| KgError::Schema(format!("no row template for field '{}'", self.name)))?;
        self.row = Some(row);
        Ok(())
    }

    fn reset(&mut self) {
        let initial = self.initial_value.clone();
        self.row = self.build_row(&initial);
    }

    fn return_value(&self) -> Value {
        self.row
            .as_ref()
            .map(NestedRow::return_value)
            .unwrap_or(Value::Null)
    }

    fn has_changed(&self) -> bool {
        self.value() != self.initial_value
    }

    fn validation_warning(&self) -> Option<String> {
        if !should_validate(self.has_changed(), self.initial_value.is_null()) {
            return None;
        }
        required_warning(&self.definition, self.row.is_none())
            .or_else(|| self.row.as_ref().and_then(NestedRow::validation_warning))
    }

    fn collect_reference_ids(&self, out: &mut Vec<String>) {
        if let Some(row) = &self.row {
            row.collect_reference_ids(out);
        }
    }

    impl_any!();
}
