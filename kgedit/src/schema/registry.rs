use super::types::TypeDefinition;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Registry of the instance types known to the current workspace.
///
/// Nested rows resolve their declared `@type` here to find the row template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeRegistry {
    #[serde(default)]
    types: HashMap<String, TypeDefinition>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_types(types: impl IntoIterator<Item = TypeDefinition>) -> Self {
        let mut registry = TypeRegistry::new();
        for def in types {
            registry.insert(def);
        }
        registry
    }

    /// Parse a YAML (or JSON) list of type definitions
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let types: Vec<TypeDefinition> = serde_yaml::from_str(content)?;
        Ok(Self::from_types(types))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn insert(&mut self, def: TypeDefinition) {
        self.types.insert(def.name.clone(), def);
    }

    pub fn get(&self, name: &str) -> Option<&TypeDefinition> {
        self.types.get(name)
    }

    /// Resolve the first known type among `names`
    pub fn resolve<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Option<&TypeDefinition> {
        names.into_iter().find_map(|name| self.types.get(name))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TYPES: &str = r#"
- name: Person
  labelField: name
  spaces: [common, team]
  fields:
    name: { widget: InputText, isRequired: true }
    affiliation:
      widget: Nested
      targetTypes: [{ name: Affiliation }]
- name: Affiliation
  fields:
    organization: { widget: SimpleDropdown, targetTypes: [{ name: Organization }] }
    startDate: { widget: InputDate }
"#;

    #[test]
    fn test_parse_registry() {
        let registry = TypeRegistry::from_yaml_str(TYPES).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["Affiliation", "Person"]);

        let person = registry.get("Person").unwrap();
        assert_eq!(person.label_field.as_deref(), Some("name"));
        assert!(person.fields["name"].is_required);
        assert_eq!(person.spaces.len(), 2);
    }

    #[test]
    fn test_resolve_first_known() {
        let registry = TypeRegistry::from_yaml_str(TYPES).unwrap();
        let resolved = registry.resolve(["Unknown", "Affiliation"]).unwrap();
        assert_eq!(resolved.name, "Affiliation");
        assert!(registry.resolve(["Unknown"]).is_none());
    }
}
