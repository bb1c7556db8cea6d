use super::{
    CheckBoxFieldStore, FieldContext, FieldStore, InputNumberFieldStore, InputTextFieldStore,
    LinkFieldStore, LinksFieldStore, MultiValueFieldStore, NestedFieldStore,
    SingleNestedFieldStore, UnsupportedFieldStore,
};
use crate::schema::FieldDefinition;
use std::collections::HashMap;
use std::fmt;

/// Constructor of a field store for one widget
pub type FieldStoreFactory = fn(&str, FieldDefinition, &FieldContext) -> Box<dyn FieldStore>;

/// Maps widget names to field store constructors
#[derive(Clone)]
pub struct WidgetRegistry {
    factories: HashMap<String, FieldStoreFactory>,
}

impl WidgetRegistry {
    /// A registry without any widget; everything builds as unsupported
    pub fn empty() -> Self {
        WidgetRegistry {
            factories: HashMap::new(),
        }
    }

    pub fn register(&mut self, widget: &str, factory: FieldStoreFactory) {
        self.factories.insert(widget.to_string(), factory);
    }

    pub fn is_registered(&self, widget: &str) -> bool {
        self.factories.contains_key(widget)
    }

    pub fn build(
        &self,
        name: &str,
        definition: FieldDefinition,
        ctx: &FieldContext,
    ) -> Box<dyn FieldStore> {
        match self.factories.get(&definition.widget) {
            Some(factory) => factory(name, definition, ctx),
            None => {
                log::warn!(
                    "No field store registered for widget '{}' (field '{name}')",
                    definition.widget
                );
                Box::new(UnsupportedFieldStore::new(name, definition, ctx))
            }
        }
    }
}

impl Default for WidgetRegistry {
    fn default() -> Self {
        let mut registry = WidgetRegistry::empty();
        for widget in ["InputText", "TextArea", "InputDate", "InputDateTime"] {
            registry.register(widget, |n, d, c| Box::new(InputTextFieldStore::new(n, d, c)));
        }
        for widget in ["InputTextMultiple", "Annotation"] {
            registry.register(widget, |n, d, c| Box::new(MultiValueFieldStore::text(n, d, c)));
        }
        registry.register("InputNumber", |n, d, c| {
            Box::new(InputNumberFieldStore::new(n, d, c))
        });
        registry.register("InputNumberMultiple", |n, d, c| {
            Box::new(MultiValueFieldStore::numbers(n, d, c))
        });
        registry.register("CheckBox", |n, d, c| Box::new(CheckBoxFieldStore::new(n, d, c)));
        registry.register("SimpleDropdown", |n, d, c| Box::new(LinkFieldStore::new(n, d, c)));
        for widget in ["DynamicDropdown", "DynamicTable"] {
            registry.register(widget, |n, d, c| Box::new(LinksFieldStore::new(n, d, c)));
        }
        registry.register("Nested", |n, d, c| Box::new(NestedFieldStore::new(n, d, c)));
        registry.register("SingleNested", |n, d, c| {
            Box::new(SingleNestedFieldStore::new(n, d, c))
        });
        registry
    }
}

impl fmt::Debug for WidgetRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut widgets: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        widgets.sort_unstable();
        f.debug_struct("WidgetRegistry")
            .field("widgets", &widgets)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn badge(name: &str, def: FieldDefinition, ctx: &FieldContext) -> Box<dyn FieldStore> {
        Box::new(InputTextFieldStore::new(name, def, ctx))
    }

    #[test]
    fn test_builtin_widgets() {
        let registry = WidgetRegistry::default();
        for widget in [
            "InputText",
            "TextArea",
            "InputDate",
            "InputDateTime",
            "InputTextMultiple",
            "Annotation",
            "InputNumber",
            "InputNumberMultiple",
            "CheckBox",
            "SimpleDropdown",
            "DynamicDropdown",
            "DynamicTable",
            "Nested",
            "SingleNested",
        ] {
            assert!(registry.is_registered(widget), "{widget}");
        }
        assert!(!registry.is_registered("MapPicker"));
    }

    #[test]
    fn test_register_custom_widget() {
        let mut registry = WidgetRegistry::default();
        registry.register("Badge", badge);
        let ctx = FieldContext::default().with_widgets(registry);

        let mut store = ctx.build_store("badge", FieldDefinition::new("Badge"));
        assert!(store.downcast_ref::<InputTextFieldStore>().is_some());
        store.set_value(json!("gold")).unwrap();
        assert!(store.has_changed());
    }

    #[test]
    fn test_empty_registry_builds_unsupported() {
        let ctx = FieldContext::default().with_widgets(WidgetRegistry::empty());
        let store = ctx.build_store("title", FieldDefinition::new("InputText"));
        assert!(store.downcast_ref::<UnsupportedFieldStore>().is_some());
    }
}
