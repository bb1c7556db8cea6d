//! Nested sub-records. Each row owns its own field stores, built from the
//! template of the row's type.

use super::validation::{items_warning, required_warning, should_validate};
use super::{FieldContext, FieldState, FieldStore};
use crate::error::{KgError, Result};
use crate::schema::{FieldDefinition, TYPE_KEY};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One nested sub-record
#[derive(Debug)]
pub struct NestedRow {
    type_name: String,
    fields: BTreeMap<String, Box<dyn FieldStore>>,
}

/// Type names declared by a raw row (`"@type": "T"` or `"@type": ["T", ...]`)
pub(crate) fn row_type_names(raw: &Value) -> Vec<String> {
    match raw.get(TYPE_KEY) {
        Some(Value::String(name)) => vec![name.clone()],
        Some(Value::Array(names)) => names
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

impl NestedRow {
    /// Build a row from its raw value. Returns `None` when neither the type
    /// registry nor the parent definition provide a template for the row type.
    pub fn build(
        parent: &str,
        raw: &Value,
        definition: &FieldDefinition,
        ctx: &FieldContext,
    ) -> Option<NestedRow> {
        let Value::Object(values) = raw else {
            log::warn!("Field '{parent}' dropped a nested row that is not an object: {raw}");
            return None;
        };
        let mut names = row_type_names(raw);
        if names.is_empty() {
            names = default_row_type(definition).into_iter().collect();
        }

        let (type_name, template) = match ctx.types.resolve(names.iter().map(String::as_str)) {
            Some(def) => (def.name.clone(), def.fields.clone()),
            None => match (&definition.fields, names.first()) {
                (Some(fields), Some(name)) => (name.clone(), fields.clone()),
                _ => {
                    log::warn!(
                        "Field '{parent}' dropped a nested row of unknown type {:?}",
                        names
                    );
                    return None;
                }
            },
        };

        let fields = template
            .into_iter()
            .map(|(name, mut field)| {
                field.value = values.get(&name).cloned();
                let store = ctx.build_store(&name, field);
                (name, store)
            })
            .collect();
        Some(NestedRow { type_name, fields })
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn fields(&self) -> &BTreeMap<String, Box<dyn FieldStore>> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&dyn FieldStore> {
        self.fields.get(name).map(|f| f.as_ref())
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Box<dyn FieldStore>> {
        self.fields.get_mut(name)
    }

    fn tagged(&self, project: impl Fn(&dyn FieldStore) -> Value) -> Value {
        let mut map = Map::new();
        map.insert(
            TYPE_KEY.to_string(),
            Value::Array(vec![Value::String(self.type_name.clone())]),
        );
        for (name, field) in &self.fields {
            map.insert(name.clone(), project(field.as_ref()));
        }
        Value::Object(map)
    }

    pub fn value(&self) -> Value {
        self.tagged(|f| f.value())
    }

    pub fn return_value(&self) -> Value {
        self.tagged(|f| f.return_value())
    }

    pub fn has_changed(&self) -> bool {
        self.fields.values().any(|f| f.has_changed())
    }

    pub fn validation_warning(&self) -> Option<String> {
        self.fields.iter().find_map(|(name, f)| {
            f.validation_warning()
                .map(|w| format!("{}: {w}", f.definition().display_label(name)))
        })
    }

    pub fn collect_reference_ids(&self, out: &mut Vec<String>) {
        for field in self.fields.values() {
            field.collect_reference_ids(out);
        }
    }
}

/// Declared default row type, else the first candidate
fn default_row_type(definition: &FieldDefinition) -> Option<String> {
    definition
        .default_target_type
        .clone()
        .or_else(|| definition.target_types.first().map(|t| t.name.clone()))
}

/// Build rows from a raw list; a bare object is taken as a single row
pub(crate) fn build_rows(
    name: &str,
    raw: &Value,
    definition: &FieldDefinition,
    ctx: &FieldContext,
) -> Vec<NestedRow> {
    let items: Vec<&Value> = match raw {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().collect(),
        other => {
            log::warn!("Field '{name}' expected a list of nested rows, wrapping single value");
            vec![other]
        }
    };
    items
        .into_iter()
        .filter_map(|item| NestedRow::build(name, item, definition, ctx))
        .collect()
}

/// Ordered list of nested rows (`Nested`)
#[derive(Debug)]
pub struct NestedFieldStore {
    name: String,
    definition: FieldDefinition,
    state: FieldState,
    ctx: FieldContext,
    rows: Vec<NestedRow>,
    /// Row values as they were right after the last `update_value`
    initial_value: Value,
    return_as_null: bool,
}

impl NestedFieldStore {
    pub fn new(name: &str, definition: FieldDefinition, ctx: &FieldContext) -> Self {
        NestedFieldStore {
            name: name.to_string(),
            definition,
            state: FieldState::default(),
            ctx: ctx.clone(),
            rows: Vec::new(),
            initial_value: Value::Array(Vec::new()),
            return_as_null: false,
        }
    }

    pub fn rows(&self) -> &[NestedRow] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&NestedRow> {
        self.rows.get(index)
    }

    pub fn row_mut(&mut self, index: usize) -> Option<&mut NestedRow> {
        self.rows.get_mut(index)
    }

    fn out_of_range(&self, index: usize) -> KgError {
        KgError::InvalidValue {
            field: self.name.clone(),
            message: format!("no nested row at index {index}"),
        }
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.rows.len() {
            Ok(())
        } else {
            Err(self.out_of_range(index))
        }
    }

    /// Build an empty row of `type_name` (or of the default row type)
    fn new_row(&self, type_name: Option<&str>) -> Result<NestedRow> {
        let type_name = type_name
            .map(str::to_string)
            .or_else(|| default_row_type(&self.definition))
            .ok_or_else(|| KgError::InvalidValue {
                field: self.name.clone(),
                message: "no row type to add".to_string(),
            })?;
        let mut raw = Map::new();
        raw.insert(
            TYPE_KEY.to_string(),
            Value::Array(vec![Value::String(type_name.clone())]),
        );
        NestedRow::build(&self.name, &Value::Object(raw), &self.definition, &self.ctx).ok_or_else(
            || KgError::Schema(format!("unknown nested row type '{type_name}'")),
        )
    }

    fn replace(&mut self, rows: Vec<NestedRow>) {
        if rows.is_empty() {
            self.return_as_null = self.return_as_null || !self.rows.is_empty();
        } else {
            self.return_as_null = false;
        }
        self.rows = rows;
    }

    pub fn delete_item_by_index(&mut self, index: usize) -> Result<()> {
        self.check_index(index)?;
        self.rows.remove(index);
        if self.rows.is_empty() {
            self.return_as_null = true;
        }
        Ok(())
    }

    pub fn move_item_up_by_index(&mut self, index: usize) -> Result<()> {
        self.check_index(index)?;
        if index > 0 {
            self.rows.swap(index - 1, index);
        }
        Ok(())
    }

    pub fn move_item_down_by_index(&mut self, index: usize) -> Result<()> {
        self.check_index(index)?;
        if index + 1 < self.rows.len() {
            self.rows.swap(index, index + 1);
        }
        Ok(())
    }
}

impl FieldStore for NestedFieldStore {
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
        Value::Array(self.rows.iter().map(NestedRow::value).collect())
    }

    fn initial_value(&self) -> Value {
        self.initial_value.clone()
    }

    fn update_value(&mut self, raw: &Value) {
        self.rows = build_rows(&self.name, raw, &self.definition, &self.ctx);
        self.return_as_null = false;
        self.initial_value = self.value();
    }

    fn set_value(&mut self, raw: Value) -> Result<()> {
        let rows = build_rows(&self.name, &raw, &self.definition, &self.ctx);
        self.replace(rows);
        Ok(())
    }

    /// Append an empty row. `raw` is a row type name, or null for the default.
    fn add_value(&mut self, raw: Value) -> Result<()> {
        let row = match &raw {
            Value::Null => self.new_row(None)?,
            Value::String(name) => self.new_row(Some(name))?,
            other => {
                return Err(KgError::InvalidValue {
                    field: self.name.clone(),
                    message: format!("expected a row type name, got {other}"),
                })
            }
        };
        self.return_as_null = false;
        self.rows.push(row);
        Ok(())
    }

    fn remove_value_at(&mut self, index: usize) -> Result<()> {
        self.delete_item_by_index(index)
    }

    fn reset(&mut self) {
        let initial = self.initial_value.clone();
        self.rows = build_rows(&self.name, &initial, &self.definition, &self.ctx);
        self.return_as_null = false;
    }

    fn return_value(&self) -> Value {
        if self.rows.is_empty() && self.return_as_null {
            Value::Null
        } else {
            Value::Array(self.rows.iter().map(NestedRow::return_value).collect())
        }
    }

    fn has_changed(&self) -> bool {
        self.value() != self.initial_value
    }

    fn validation_warning(&self) -> Option<String> {
        let initial_is_empty = self.initial_value.as_array().map_or(true, Vec::is_empty);
        if !should_validate(self.has_changed(), initial_is_empty) {
            return None;
        }
        required_warning(&self.definition, self.rows.is_empty())
            .or_else(|| items_warning(&self.definition, self.rows.len()))
            .or_else(|| self.rows.iter().find_map(NestedRow::validation_warning))
    }

    fn collect_reference_ids(&self, out: &mut Vec<String>) {
        for row in &self.rows {
            row.collect_reference_ids(out);
        }
    }

    impl_any!();
}
