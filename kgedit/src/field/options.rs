//! Paginated, searchable suggestions of a reference field.
//!
//! A search goes through three steps: [`OptionsSearch::begin_search`] captures
//! a [`SearchPage`] for the current term, the caller performs the request, and
//! [`OptionsSearch::apply_suggestions`] merges the response. A response whose
//! term or target type no longer matches the field's current state is stale
//! and is dropped.

use crate::schema::{FieldDefinition, SpaceInfo, TargetType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An existing instance proposed as a reference value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub type_info: Option<TargetType>,
    #[serde(default)]
    pub space: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestionData {
    pub data: Vec<Suggestion>,
    pub total: usize,
}

/// Spaces a suggested type can be created in
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestionTypeInfo {
    pub label: Option<String>,
    pub color: Option<String>,
    pub space: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestionResponse {
    pub suggestions: SuggestionData,
    pub types: BTreeMap<String, SuggestionTypeInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SuggestionOption {
    Existing(Suggestion),
    /// Pseudo option creating a new instance of `type_name` in `space`
    New {
        type_name: String,
        type_label: Option<String>,
        space: String,
    },
}

impl SuggestionOption {
    pub fn is_new(&self) -> bool {
        matches!(self, SuggestionOption::New { .. })
    }
}

/// A suggestion request captured when the search was dispatched
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPage {
    pub search_term: String,
    pub target_type: Option<String>,
    pub from: usize,
    pub size: usize,
    pub append: bool,
}

#[derive(Debug, Clone)]
pub struct OptionsSearch {
    target_types: Vec<TargetType>,
    target_type: Option<String>,
    allow_custom_values: bool,
    page_size: usize,
    search_term: String,
    /// Term of the last applied page
    fetched_term: Option<String>,
    options: Vec<SuggestionOption>,
    fetched_count: usize,
    total: usize,
    is_fetching: bool,
    /// Most recently dispatched page; only its answer ends the fetching state
    last_request: Option<SearchPage>,
    error: Option<String>,
}

impl OptionsSearch {
    pub fn new(definition: &FieldDefinition, page_size: usize) -> Self {
        let target_types = definition.target_types.clone();
        let target_type = definition
            .default_target_type
            .as_ref()
            .filter(|name| target_types.iter().any(|t| &t.name == *name))
            .cloned()
            .or_else(|| target_types.first().map(|t| t.name.clone()));
        OptionsSearch {
            target_types,
            target_type,
            allow_custom_values: definition.allow_custom_values,
            page_size: page_size.max(1),
            search_term: String::new(),
            fetched_term: None,
            options: Vec::new(),
            fetched_count: 0,
            total: 0,
            is_fetching: false,
            last_request: None,
            error: None,
        }
    }

    pub fn target_types(&self) -> &[TargetType] {
        &self.target_types
    }

    pub fn target_type(&self) -> Option<&str> {
        self.target_type.as_deref()
    }

    /// Select another candidate target type. Loaded options are discarded.
    pub fn set_target_type(&mut self, name: &str) -> bool {
        if !self.target_types.iter().any(|t| t.name == name) {
            return false;
        }
        if self.target_type.as_deref() != Some(name) {
            self.target_type = Some(name.to_string());
            self.clear_options();
        }
        true
    }

    pub fn search_term(&self) -> &str {
        &self.search_term
    }

    pub fn set_search_term(&mut self, term: &str) {
        self.search_term = term.to_string();
    }

    pub fn options(&self) -> &[SuggestionOption] {
        &self.options
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_fetching(&self) -> bool {
        self.is_fetching
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn has_more_options(&self) -> bool {
        self.fetched_term.as_deref() == Some(self.search_term.as_str())
            && self.fetched_count < self.total
    }

    pub fn clear_options(&mut self) {
        self.options.clear();
        self.fetched_term = None;
        self.fetched_count = 0;
        self.total = 0;
        self.error = None;
    }

    /// Capture the next request. Appending is only possible while the term
    /// is the one of the previously fetched page.
    pub fn begin_search(&mut self, append: bool) -> Option<SearchPage> {
        if append && !self.has_more_options() {
            return None;
        }
        self.is_fetching = true;
        self.error = None;
        let page = SearchPage {
            search_term: self.search_term.clone(),
            target_type: self.target_type.clone(),
            from: if append { self.fetched_count } else { 0 },
            size: self.page_size,
            append,
        };
        self.last_request = Some(page.clone());
        Some(page)
    }

    /// A response for `page` arrived, applied or not
    fn settle(&mut self, page: &SearchPage) {
        if self.last_request.as_ref() == Some(page) {
            self.last_request = None;
            self.is_fetching = false;
        }
    }

    fn is_stale(&self, page: &SearchPage) -> bool {
        page.search_term != self.search_term || page.target_type != self.target_type
    }

    /// Merge a response. Returns false when the page is stale and was ignored.
    pub fn apply_suggestions(
        &mut self,
        page: &SearchPage,
        response: SuggestionResponse,
        current_space: Option<&str>,
        spaces: &[SpaceInfo],
    ) -> bool {
        self.settle(page);
        if self.is_stale(page) {
            log::debug!("Dropping stale suggestions for '{}'", page.search_term);
            return false;
        }
        let received = response.suggestions.data.len();
        let existing = response
            .suggestions
            .data
            .into_iter()
            .map(SuggestionOption::Existing);
        if page.append {
            self.options.extend(existing);
            self.fetched_count += received;
        } else {
            let mut options =
                self.new_instance_options(&page.search_term, &response.types, current_space, spaces);
            options.extend(existing);
            self.options = options;
            self.fetched_count = received;
        }
        self.total = response.suggestions.total;
        self.fetched_term = Some(page.search_term.clone());
        true
    }

    pub fn fail_search(&mut self, page: &SearchPage, message: String) -> bool {
        self.settle(page);
        if self.is_stale(page) {
            return false;
        }
        self.error = Some(message);
        true
    }

    fn new_instance_options(
        &self,
        term: &str,
        types: &BTreeMap<String, SuggestionTypeInfo>,
        current_space: Option<&str>,
        spaces: &[SpaceInfo],
    ) -> Vec<SuggestionOption> {
        if !self.allow_custom_values || term.trim().is_empty() {
            return Vec::new();
        }
        let can_create = |space: &str| spaces.iter().any(|s| s.name == space && s.can_create);
        let mut options = Vec::new();
        for (type_name, info) in types {
            for space in info.space.iter().filter(|space| can_create(space.as_str())) {
                options.push(SuggestionOption::New {
                    type_name: type_name.clone(),
                    type_label: info.label.clone(),
                    space: space.clone(),
                });
            }
        }
        options.sort_by(|a, b| match (a, b) {
            (
                SuggestionOption::New { type_name: ta, space: sa, .. },
                SuggestionOption::New { type_name: tb, space: sb, .. },
            ) => {
                let other_a = Some(sa.as_str()) != current_space;
                let other_b = Some(sb.as_str()) != current_space;
                other_a.cmp(&other_b).then_with(|| ta.cmp(tb)).then_with(|| sa.cmp(sb))
            }
            _ => std::cmp::Ordering::Equal,
        });
        options
    }
}
