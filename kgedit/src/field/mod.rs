//! Field stores: the live, change-tracked value of one field.
//!
//! Every widget kind has one concrete [`FieldStore`] implementation. The
//! [`WidgetRegistry`] maps widget names to constructors, so supporting a new
//! widget is a single `register` call. Widgets the registry does not know are
//! built as [`UnsupportedFieldStore`], which passes its raw value through.

/// Implements the `as_any` plumbing of [`FieldStore`]
macro_rules! impl_any {
    () => {
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    };
}

pub mod checkbox;
pub mod link;
pub mod links;
pub mod multiple;
pub mod nested;
pub mod number;
pub mod options;
pub mod reference;
pub mod registry;
pub mod single_nested;
pub mod text;
pub mod unsupported;
pub mod validation;

pub use checkbox::CheckBoxFieldStore;
pub use link::LinkFieldStore;
pub use links::LinksFieldStore;
pub use multiple::{MultiValueFieldStore, ScalarKind};
pub use nested::{NestedFieldStore, NestedRow};
pub use number::InputNumberFieldStore;
pub use options::{OptionsSearch, SearchPage, Suggestion, SuggestionOption, SuggestionResponse};
pub use reference::Reference;
pub use registry::{FieldStoreFactory, WidgetRegistry};
pub use single_nested::SingleNestedFieldStore;
pub use text::InputTextFieldStore;
pub use unsupported::UnsupportedFieldStore;

use crate::config::EditorConfig;
use crate::error::{KgError, Result};
use crate::schema::{Alternative, FieldDefinition, TypeRegistry};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Everything a field store needs from its surroundings: the type registry
/// (for nested rows), the widget registry (to build child stores) and the
/// editor configuration.
#[derive(Debug, Clone)]
pub struct FieldContext {
    pub types: Arc<TypeRegistry>,
    pub widgets: Arc<WidgetRegistry>,
    pub config: Arc<EditorConfig>,
}

impl FieldContext {
    pub fn new(types: TypeRegistry, config: EditorConfig) -> Self {
        FieldContext {
            types: Arc::new(types),
            widgets: Arc::new(WidgetRegistry::default()),
            config: Arc::new(config),
        }
    }

    pub fn with_widgets(mut self, widgets: WidgetRegistry) -> Self {
        self.widgets = Arc::new(widgets);
        self
    }

    /// Build the store for `definition` and load its raw value
    pub fn build_store(&self, name: &str, definition: FieldDefinition) -> Box<dyn FieldStore> {
        let raw = definition.value.clone().unwrap_or(Value::Null);
        let alternatives = definition.alternatives.clone();
        let mut store = self.widgets.build(name, definition, self);
        store.update_value(&raw);
        store.set_alternatives(alternatives);
        store
    }
}

impl Default for FieldContext {
    fn default() -> Self {
        FieldContext::new(TypeRegistry::default(), EditorConfig::default())
    }
}

/// Advisory and error channels of a field, independent of its value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldState {
    pub warning: Option<String>,
    pub error: Option<String>,
    pub alternatives: Vec<Alternative>,
}

impl FieldState {
    /// Store alternatives with the selected ones first, keeping relative order
    pub fn set_alternatives(&mut self, mut alternatives: Vec<Alternative>) {
        alternatives.sort_by_key(|a| !a.selected);
        self.alternatives = alternatives;
    }
}

/// The contract every widget implements.
///
/// `has_changed` must be a pure function of the current and initial values,
/// and `return_value` is a read projection that never touches the value.
pub trait FieldStore: Any + Send + Sync + fmt::Debug {
    /// Name of the field within its instance or nested row
    fn name(&self) -> &str;

    fn definition(&self) -> &FieldDefinition;

    fn state(&self) -> &FieldState;

    fn state_mut(&mut self) -> &mut FieldState;

    /// Current edited value
    fn value(&self) -> Value;

    /// Baseline captured by the last `update_value`
    fn initial_value(&self) -> Value;

    /// Load a raw server/template value; sets both value and initial value.
    fn update_value(&mut self, raw: &Value);

    /// Replace the value from the edit path
    fn set_value(&mut self, raw: Value) -> Result<()>;

    /// Restore the value captured at the last `update_value`
    fn reset(&mut self);

    /// Value to send on save
    fn return_value(&self) -> Value;

    fn has_changed(&self) -> bool;

    /// Computed validation message, if any
    fn validation_warning(&self) -> Option<String> {
        None
    }

    /// Identifiers of every instance this field references
    fn collect_reference_ids(&self, _out: &mut Vec<String>) {}

    /// Append one item to a multi-valued field
    fn add_value(&mut self, _raw: Value) -> Result<()> {
        Err(not_implemented(self.widget(), "add_value"))
    }

    /// Remove the item at `index` of a multi-valued field
    fn remove_value_at(&mut self, _index: usize) -> Result<()> {
        Err(not_implemented(self.widget(), "remove_value_at"))
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn widget(&self) -> &str {
        &self.definition().widget
    }

    /// Snapshot of the definition carrying the current value.
    ///
    /// Building a store from the snapshot yields an equivalent, unchanged store.
    fn clone_with_initial_value(&self) -> FieldDefinition {
        let mut definition = self.definition().clone();
        definition.value = Some(self.value());
        definition.alternatives = Vec::new();
        definition
    }

    fn set_warning(&mut self, warning: String) {
        self.state_mut().warning = Some(warning);
    }

    fn clear_warning(&mut self) {
        self.state_mut().warning = None;
    }

    fn set_error(&mut self, error: String) {
        self.state_mut().error = Some(error);
    }

    fn clear_error(&mut self) {
        self.state_mut().error = None;
    }

    fn set_alternatives(&mut self, alternatives: Vec<Alternative>) {
        self.state_mut().set_alternatives(alternatives);
    }
}

impl dyn FieldStore {
    pub fn downcast_ref<T: FieldStore>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: FieldStore>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

pub(crate) fn not_implemented(widget: &str, operation: &'static str) -> KgError {
    KgError::NotImplemented {
        widget: widget.to_string(),
        operation,
    }
}

/// Whether a raw value carries no data (null, blank string, empty list or map)
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn alternative(value: Value, selected: bool, user: &str) -> Alternative {
        Alternative {
            value,
            selected,
            users: vec![crate::schema::UserSummary {
                id: user.into(),
                name: None,
            }],
        }
    }

    #[test]
    fn test_alternatives_selected_first_stable() {
        let mut state = FieldState::default();
        state.set_alternatives(vec![
            alternative(json!("a"), false, "u1"),
            alternative(json!("b"), true, "u2"),
            alternative(json!("c"), false, "u3"),
            alternative(json!("d"), true, "u4"),
        ]);
        let order: Vec<&str> = state
            .alternatives
            .iter()
            .map(|a| a.users[0].id.as_str())
            .collect();
        assert_eq!(order, vec!["u2", "u4", "u1", "u3"]);
    }

    #[test]
    fn test_is_empty_value() {
        assert!(is_empty_value(&Value::Null));
        assert!(is_empty_value(&json!("  ")));
        assert!(is_empty_value(&json!([])));
        assert!(is_empty_value(&json!({})));
        assert!(!is_empty_value(&json!(0)));
        assert!(!is_empty_value(&json!(false)));
        assert!(!is_empty_value(&json!(["x"])));
    }

    #[test]
    fn test_scalar_store_rejects_list_operations() {
        let ctx = FieldContext::default();
        let mut store = ctx.build_store("title", FieldDefinition::new("InputText"));
        let err = store.add_value(json!("x")).unwrap_err();
        assert!(matches!(
            err,
            KgError::NotImplemented { operation: "add_value", .. }
        ));
        assert!(err.to_string().contains("InputText"));
    }

    #[test]
    fn test_downcast_to_concrete_store() {
        let ctx = FieldContext::default();
        let store = ctx.build_store("title", FieldDefinition::new("InputText"));
        assert!(store.downcast_ref::<InputTextFieldStore>().is_some());
        assert!(store.downcast_ref::<LinksFieldStore>().is_none());
    }

    /// Every built-in widget: load, edit, reset returns to the loaded value
    #[test]
    fn test_reset_restores_loaded_value_for_every_widget() {
        let ctx = FieldContext::default();
        let cases = vec![
            ("InputText", json!("hello"), json!("bye")),
            ("TextArea", json!("a\nb"), json!("")),
            ("InputNumber", json!(4), json!(7.5)),
            ("CheckBox", json!(true), json!(false)),
            ("InputTextMultiple", json!(["a", "b"]), json!(["b"])),
            ("InputNumberMultiple", json!([1, 2]), json!([])),
            ("SimpleDropdown", json!({ "@id": "p1" }), json!({ "@id": "p2" })),
            ("DynamicDropdown", json!([{ "@id": "p1" }]), json!([{ "@id": "p2" }])),
        ];

        for (widget, loaded, edited) in cases {
            let mut store = ctx.build_store("f", FieldDefinition::new(widget));
            store.update_value(&loaded);
            let normalized = store.value();
            assert!(!store.has_changed(), "{widget} changed right after load");

            store.set_value(edited).unwrap();
            assert!(store.has_changed(), "{widget} edit not detected");

            store.reset();
            assert_eq!(store.value(), normalized, "{widget} reset");
            assert!(!store.has_changed(), "{widget} changed after reset");
        }
    }

    #[test]
    fn test_clone_with_initial_value_round_trip() {
        let ctx = FieldContext::default();
        let mut store = ctx.build_store("tags", FieldDefinition::new("InputTextMultiple"));
        store.update_value(&json!(["a"]));
        store.add_value(json!("b")).unwrap();

        let snapshot = store.clone_with_initial_value();
        let value = snapshot.value.clone().unwrap();
        let mut fresh = ctx.build_store("tags", snapshot);
        fresh.update_value(&value);
        assert!(!fresh.has_changed());
        assert_eq!(fresh.value(), json!(["a", "b"]));
    }
}
