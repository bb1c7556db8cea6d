use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Editor data-layer configuration, usually parsed from a YAML file.
///
/// Every key is optional; missing keys fall back to the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Release stage passed to batched fetches
    pub stage: String,
    pub queues: QueuesConfig,
    pub links: LinksConfig,
    /// Identifier emitted instead of `null` when a reference field was cleared.
    /// Only needed when talking to a server that expects a reset marker.
    pub clear_sentinel: Option<String>,
}

impl Default for EditorConfig {
    fn default() -> Self {
        EditorConfig {
            stage: "IN_PROGRESS".to_string(),
            queues: QueuesConfig::default(),
            links: LinksConfig::default(),
            clear_sentinel: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueuesConfig {
    pub full: QueueConfig,
    pub label: QueueConfig,
}

impl Default for QueuesConfig {
    fn default() -> Self {
        QueuesConfig {
            full: QueueConfig {
                threshold: 10,
                debounce_ms: 250,
            },
            label: QueueConfig {
                threshold: 50,
                debounce_ms: 250,
            },
        }
    }
}

/// Batching parameters of one fetch queue
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Pending size at which the queue flushes without waiting for the debounce
    pub threshold: usize,
    pub debounce_ms: u64,
}

impl QueueConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinksConfig {
    /// Number of links marked visible on load for lazily displayed fields
    pub lazy_visible_count: usize,
    /// Suggestions requested per page
    pub page_size: usize,
    pub search_debounce_ms: u64,
}

impl Default for LinksConfig {
    fn default() -> Self {
        LinksConfig {
            lazy_visible_count: 10,
            page_size: 50,
            search_debounce_ms: 250,
        }
    }
}

impl LinksConfig {
    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }
}

impl EditorConfig {
    /// Parse a configuration file
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse a configuration YAML string
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(EditorConfig::default());
        }
        let config: EditorConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_from_empty_document() {
        let config = EditorConfig::from_yaml_str("").unwrap();
        assert_eq!(config, EditorConfig::default());
        assert_eq!(config.queues.full.threshold, 10);
        assert_eq!(config.queues.label.threshold, 50);
        assert_eq!(config.links.lazy_visible_count, 10);
    }

    #[test]
    fn test_partial_override() {
        let config = EditorConfig::from_yaml_str(
            r#"
stage: RELEASED
queues:
  label: { threshold: 5, debounce_ms: 10 }
clear_sentinel: "https://core.kg.ebrains.eu/vocab/resetValue"
"#,
        )
        .unwrap();
        assert_eq!(config.stage, "RELEASED");
        assert_eq!(config.queues.label.threshold, 5);
        assert_eq!(config.queues.label.debounce(), Duration::from_millis(10));
        // Unspecified queue keeps its defaults
        assert_eq!(config.queues.full.threshold, 10);
        assert_eq!(config.links.page_size, 50);
        assert!(config.clear_sentinel.is_some());
    }

    #[test]
    fn test_from_path() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("kgedit.yaml");
        std::fs::write(&path, "links: { lazy_visible_count: 3 }").unwrap();

        let config = EditorConfig::from_path(&path).unwrap();
        assert_eq!(config.links.lazy_visible_count, 3);
        assert_eq!(config.links.search_debounce_ms, 250);
    }
}
