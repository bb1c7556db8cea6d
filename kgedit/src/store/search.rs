//! Suggestion searches of reference fields, run through the store so the
//! request carries the owning instance's context.

use super::InstanceStore;
use crate::api::SuggestionRequest;
use crate::error::{KgError, Result};
use crate::field::{LinkFieldStore, LinksFieldStore, OptionsSearch};
use crate::instance::Instance;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Suggestion state of a single or multiple reference field
fn options_of<'a>(instance: &'a mut Instance, field: &str) -> Option<&'a mut OptionsSearch> {
    if instance.field_as::<LinkFieldStore>(field).is_some() {
        instance
            .field_as_mut::<LinkFieldStore>(field)
            .map(LinkFieldStore::options_mut)
    } else {
        instance
            .field_as_mut::<LinksFieldStore>(field)
            .map(LinksFieldStore::options_mut)
    }
}

fn no_suggestions(field: &str) -> KgError {
    KgError::InvalidValue {
        field: field.to_string(),
        message: "field does not offer suggestions".to_string(),
    }
}

impl InstanceStore {
    /// Fetch a page of suggestions for the current search term of `field`.
    ///
    /// With `append` the next page is added to the loaded options. Returns
    /// false when nothing was requested or the response was stale.
    pub async fn search_options(&self, id: &str, field: &str, append: bool) -> Result<bool> {
        let handle = self
            .get(id)
            .ok_or_else(|| KgError::NotFound { id: id.to_string() })?;
        let (page, request) = {
            let mut guard = handle.lock();
            let instance = &mut *guard;
            let source_types = instance.type_names();
            let payload = instance.payload();
            let options = options_of(instance, field).ok_or_else(|| no_suggestions(field))?;
            let Some(page) = options.begin_search(append) else {
                return Ok(false);
            };
            let request = SuggestionRequest {
                instance_id: id.to_string(),
                field: field.to_string(),
                source_types,
                target_type: page.target_type.clone(),
                from: page.from,
                size: page.size,
                search_term: page.search_term.clone(),
                payload,
            };
            (page, request)
        };

        let result = self.api.get_suggestions(request).await;

        let spaces = self.user_spaces();
        let mut guard = handle.lock();
        let instance = &mut *guard;
        let space = instance.space().map(str::to_string);
        // The field may have been rebuilt by a refetch meanwhile
        let Some(options) = options_of(instance, field) else {
            return Ok(false);
        };
        match result {
            Ok(response) => Ok(options.apply_suggestions(&page, response, space.as_deref(), &spaces)),
            Err(err) => {
                log::warn!("Searching options of {id}.{field} failed: {}", err.describe());
                options.fail_search(&page, err.describe());
                Err(KgError::Request(err))
            }
        }
    }

    /// Set the search term of `field` now and search once typing settles.
    /// A later call for the same field supersedes a pending search.
    pub fn search_options_debounced(self: &Arc<Self>, id: &str, field: &str, term: &str) -> Result<()> {
        {
            let handle = self
                .get(id)
                .ok_or_else(|| KgError::NotFound { id: id.to_string() })?;
            let mut guard = handle.lock();
            options_of(&mut guard, field)
                .ok_or_else(|| no_suggestions(field))?
                .set_search_term(term);
        }

        let delay = self.context().config.links.search_debounce();
        let key = (id.to_string(), field.to_string());
        let seq = self.search_seq.fetch_add(1, Ordering::Relaxed);
        let store = Arc::clone(self);
        let task_key = key.clone();
        // Held while spawning so the task cannot unregister before it is registered
        let mut timers = self.search_timers.lock();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let (id, field) = &task_key;
            if let Err(e) = store.search_options(id, field, false).await {
                log::debug!("Debounced search of {id}.{field} failed: {e}");
            }
            let mut timers = store.search_timers.lock();
            if timers.get(&task_key).is_some_and(|(current, _)| *current == seq) {
                timers.remove(&task_key);
            }
        });
        if let Some((_, previous)) = timers.insert(key, (seq, timer)) {
            previous.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{MemoryApi, MemoryFixture, MockApi, StoredInstance};
    use crate::config::EditorConfig;
    use crate::error::RequestError;
    use crate::field::options::{SuggestionData, SuggestionTypeInfo};
    use crate::field::{FieldContext, Suggestion, SuggestionOption, SuggestionResponse};
    use crate::schema::{SpaceInfo, TypeRegistry};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    const TYPES: &str = r#"
- name: Person
  labelField: fullName
  spaces: [common]
  fields:
    fullName:
      widget: InputText
- name: Book
  labelField: title
  spaces: [common]
  fields:
    title:
      widget: InputText
    author:
      widget: DynamicDropdown
      allowCustomValues: true
      targetTypes: [{ name: Person }]
    editor:
      widget: SimpleDropdown
      targetTypes: [{ name: Person }]
"#;

    fn setup_store(api: Arc<dyn crate::api::Api>) -> Arc<InstanceStore> {
        let types = TypeRegistry::from_yaml_str(TYPES).unwrap();
        let store = InstanceStore::new(api, FieldContext::new(types, EditorConfig::default()));
        store.set_user_spaces(vec![SpaceInfo {
            name: "common".into(),
            can_create: true,
        }]);
        store
    }

    fn ada_response() -> SuggestionResponse {
        SuggestionResponse {
            suggestions: SuggestionData {
                data: vec![Suggestion {
                    id: "p1".into(),
                    name: Some("Ada".into()),
                    type_info: None,
                    space: Some("common".into()),
                }],
                total: 1,
            },
            types: [(
                "Person".to_string(),
                SuggestionTypeInfo {
                    label: None,
                    color: None,
                    space: vec!["common".into()],
                },
            )]
            .into_iter()
            .collect(),
        }
    }

    #[tokio::test]
    async fn test_search_offers_existing_and_new_options() {
        let fixture = MemoryFixture {
            types: serde_yaml::from_str(TYPES).unwrap(),
            ..Default::default()
        };
        let api = MemoryApi::new(fixture);
        for (id, name) in [("p1", "Ada"), ("p2", "Alan")] {
            api.insert(StoredInstance {
                id: id.into(),
                types: vec!["Person".into()],
                space: Some("common".into()),
                values: json!({ "fullName": name }).as_object().cloned().unwrap(),
                permissions: None,
            });
        }
        let store = setup_store(Arc::new(api));
        let book = store.create_new_instance("Book", "common").unwrap();
        let id = book.lock().id().to_string();

        book.lock()
            .field_as_mut::<LinksFieldStore>("author")
            .unwrap()
            .options_mut()
            .set_search_term("ad");
        assert!(store.search_options(&id, "author", false).await.unwrap());

        let guard = book.lock();
        let options = guard.field_as::<LinksFieldStore>("author").unwrap().options();
        assert_eq!(options.total(), 1);
        assert!(options.options()[0].is_new());
        assert!(matches!(&options.options()[1], SuggestionOption::Existing(s) if s.id == "p1"));
        assert!(!options.has_more_options());
    }

    #[tokio::test]
    async fn test_search_error_is_kept_on_the_field() {
        let mut api = MockApi::new();
        api.expect_get_suggestions()
            .returning(|_| Err(RequestError::with_status("Search unavailable", 503)));
        let store = setup_store(Arc::new(api));
        let book = store.create_new_instance("Book", "common").unwrap();
        let id = book.lock().id().to_string();

        let err = store.search_options(&id, "editor", false).await.unwrap_err();
        assert!(matches!(err, KgError::Request(_)));
        let guard = book.lock();
        let options = guard.field_as::<LinkFieldStore>("editor").unwrap().options();
        assert_eq!(options.error(), Some("Search unavailable (503)"));
        assert!(!options.is_fetching());
    }

    #[tokio::test]
    async fn test_search_on_plain_field_is_rejected() {
        let store = setup_store(Arc::new(MockApi::new()));
        let book = store.create_new_instance("Book", "common").unwrap();
        let id = book.lock().id().to_string();
        assert!(matches!(
            store.search_options(&id, "title", false).await,
            Err(KgError::InvalidValue { .. })
        ));
        assert!(matches!(
            store.search_options("missing", "author", false).await,
            Err(KgError::NotFound { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounced_search_sends_last_term_only() {
        let mut api = MockApi::new();
        api.expect_get_suggestions()
            .times(1)
            .withf(|request| request.search_term == "ada" && request.from == 0)
            .returning(|_| Ok(ada_response()));
        let store = setup_store(Arc::new(api));
        let book = store.create_new_instance("Book", "common").unwrap();
        let id = book.lock().id().to_string();

        for term in ["a", "ad", "ada"] {
            store.search_options_debounced(&id, "author", term).unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(
            book.lock()
                .field_as::<LinksFieldStore>("author")
                .unwrap()
                .options()
                .search_term(),
            "ada"
        );
        tokio::time::sleep(Duration::from_millis(500)).await;

        let guard = book.lock();
        let options = guard.field_as::<LinksFieldStore>("author").unwrap().options();
        assert_eq!(options.options().len(), 2);
        assert!(!options.is_fetching());
        assert!(store.search_timers.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_drops_pending_search() {
        let mut api = MockApi::new();
        api.expect_get_suggestions().times(0);
        let store = setup_store(Arc::new(api));
        let book = store.create_new_instance("Book", "common").unwrap();
        let id = book.lock().id().to_string();
        let other = store.create_new_instance("Book", "common").unwrap();
        let other_id = other.lock().id().to_string();

        store.search_options_debounced(&id, "author", "ada").unwrap();
        store.search_options_debounced(&other_id, "editor", "al").unwrap();
        assert_eq!(store.search_timers.lock().len(), 2);

        store.remove_instances(&[id.as_str()]);
        {
            let timers = store.search_timers.lock();
            assert_eq!(timers.len(), 1);
            assert!(timers.contains_key(&(other_id.clone(), "editor".to_string())));
        }

        store.flush();
        assert!(store.search_timers.lock().is_empty());
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}
