//! The instance store: a per-session cache owning every [`Instance`], fed by
//! two batched fetch queues (full data and labels).
//!
//! Instances are shared as [`InstanceHandle`]s. Locks are never held across
//! an `.await`; when both are needed the cache map is locked before an
//! instance.

pub mod queue;
pub mod search;

pub use queue::QueueKind;

use crate::api::{Api, RawInstanceData};
use crate::error::{KgError, Result};
use crate::field::FieldContext;
use crate::instance::{FetchError, FetchState, Instance};
use crate::schema::SpaceInfo;
use indexmap::IndexSet;
use parking_lot::{Mutex, RwLock};
use queue::FetchQueue;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Shared handle to a cached instance
pub type InstanceHandle = Arc<Mutex<Instance>>;

/// Cache of instances keyed by identifier.
///
/// Queue timers run on the Tokio runtime, so fetching must happen from
/// within one.
pub struct InstanceStore {
    api: Arc<dyn Api>,
    ctx: RwLock<FieldContext>,
    instances: Mutex<HashMap<String, InstanceHandle>>,
    full: Mutex<FetchQueue>,
    labels: Mutex<FetchQueue>,
    /// Bumped after every batch so waiters re-check their instance
    generation: watch::Sender<u64>,
    spaces: RwLock<Vec<SpaceInfo>>,
    /// Pending debounced searches per (instance, field), tagged with a sequence
    search_timers: Mutex<HashMap<(String, String), (u64, JoinHandle<()>)>>,
    search_seq: AtomicU64,
}

impl std::fmt::Debug for InstanceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceStore")
            .field("instances", &self.instances.lock().len())
            .field("pending_full", &self.full.lock().pending.len())
            .field("pending_labels", &self.labels.lock().pending.len())
            .finish()
    }
}

impl InstanceStore {
    pub fn new(api: Arc<dyn Api>, ctx: FieldContext) -> Arc<Self> {
        let (generation, _) = watch::channel(0);
        Arc::new(InstanceStore {
            api,
            ctx: RwLock::new(ctx),
            instances: Mutex::new(HashMap::new()),
            full: Mutex::new(FetchQueue::default()),
            labels: Mutex::new(FetchQueue::default()),
            generation,
            spaces: RwLock::new(Vec::new()),
            search_timers: Mutex::new(HashMap::new()),
            search_seq: AtomicU64::new(0),
        })
    }

    pub fn context(&self) -> FieldContext {
        self.ctx.read().clone()
    }

    /// Replace types, widgets or configuration, e.g. after switching workspace
    pub fn set_context(&self, ctx: FieldContext) {
        *self.ctx.write() = ctx;
    }

    /// Spaces of the current user, used to offer "create new" options
    pub fn set_user_spaces(&self, spaces: Vec<SpaceInfo>) {
        *self.spaces.write() = spaces;
    }

    pub fn user_spaces(&self) -> Vec<SpaceInfo> {
        self.spaces.read().clone()
    }

    fn queue(&self, kind: QueueKind) -> &Mutex<FetchQueue> {
        match kind {
            QueueKind::Full => &self.full,
            QueueKind::Label => &self.labels,
        }
    }

    fn notify(&self) {
        self.generation.send_modify(|g| *g += 1);
    }

    pub fn get(&self, id: &str) -> Option<InstanceHandle> {
        self.instances.lock().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.instances.lock().contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.instances.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.instances.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.lock().is_empty()
    }

    /// The cached instance for `id`, created empty on first reference
    pub fn create_instance_or_get(&self, id: &str) -> InstanceHandle {
        self.instances
            .lock()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Instance::new(id))))
            .clone()
    }

    /// A new, unsaved instance of `type_name` under a client-generated id
    pub fn create_new_instance(&self, type_name: &str, space: &str) -> Result<InstanceHandle> {
        let ctx = self.context();
        let def = ctx
            .types
            .get(type_name)
            .ok_or_else(|| KgError::Schema(format!("Unknown type '{type_name}'")))?;
        let id = uuid::Uuid::new_v4().to_string();
        let handle = self.create_instance_or_get(&id);
        handle.lock().initialize_from_type(def, space, &ctx);
        log::debug!("Created new {type_name} instance {id} in {space}");
        Ok(handle)
    }

    /// Queue a full fetch of `id` unless one is running or already done.
    /// `force` refetches an instance that is fetched or failed.
    pub fn fetch_instance(self: &Arc<Self>, id: &str, force: bool) -> InstanceHandle {
        let handle = self.create_instance_or_get(id);
        let start = handle.lock().begin_fetch(force);
        if start {
            self.enqueue(QueueKind::Full, id);
        }
        handle
    }

    /// Queue a label fetch of `id`. Instances whose full data is fetched or
    /// being fetched already have (or will have) their label.
    pub fn fetch_instance_label(self: &Arc<Self>, id: &str, force: bool) -> InstanceHandle {
        let handle = self.create_instance_or_get(id);
        let start = {
            let mut instance = handle.lock();
            let full = instance.fetch_state();
            if !force && (full.is_fetched() || full.is_fetching()) {
                false
            } else {
                instance.begin_label_fetch(force)
            }
        };
        if start {
            self.enqueue(QueueKind::Label, id);
        }
        handle
    }

    /// Fetch `id` and wait until its data is loaded or failed. Concurrent
    /// callers share one request.
    pub async fn get_instance(self: &Arc<Self>, id: &str) -> Result<InstanceHandle> {
        let handle = self.fetch_instance(id, false);
        self.wait_for(id, &handle, |instance| instance.fetch_state().clone())
            .await?;
        Ok(handle)
    }

    /// Like [`InstanceStore::get_instance`] for the label lifecycle
    pub async fn get_instance_label(self: &Arc<Self>, id: &str) -> Result<InstanceHandle> {
        let handle = self.fetch_instance_label(id, false);
        self.wait_for(id, &handle, |instance| {
            match (instance.fetch_state(), instance.label_fetch_state()) {
                (FetchState::Fetched, _) | (_, FetchState::Fetched) => FetchState::Fetched,
                (_, FetchState::Error(e)) => FetchState::Error(e.clone()),
                (FetchState::Error(e), FetchState::NotFetched) => FetchState::Error(e.clone()),
                _ => FetchState::Fetching,
            }
        })
        .await?;
        Ok(handle)
    }

    async fn wait_for(
        &self,
        id: &str,
        handle: &InstanceHandle,
        state: impl Fn(&Instance) -> FetchState,
    ) -> Result<()> {
        let mut generation = self.generation.subscribe();
        loop {
            let current = state(&*handle.lock());
            match current {
                FetchState::Fetched => return Ok(()),
                FetchState::Error(FetchError::NotFound) => {
                    return Err(KgError::NotFound { id: id.to_string() })
                }
                FetchState::Error(e) => {
                    return Err(KgError::Fetch {
                        id: id.to_string(),
                        message: e.to_string(),
                    })
                }
                FetchState::NotFetched | FetchState::Fetching => {}
            }
            if generation.changed().await.is_err() {
                return Err(KgError::Other("Instance store was dropped".to_string()));
            }
        }
    }

    /// Re-enqueue a failed instance
    pub fn retry(self: &Arc<Self>, id: &str) {
        let Some(handle) = self.get(id) else {
            return;
        };
        let (full_failed, label_failed) = {
            let instance = handle.lock();
            (
                instance.fetch_state().error().is_some(),
                instance.label_fetch_state().error().is_some(),
            )
        };
        if full_failed {
            self.fetch_instance(id, true);
        } else if label_failed {
            self.fetch_instance_label(id, true);
        }
    }

    /// Create (new instances) or patch (changed fields only) `id`, then
    /// reload it from the server response.
    ///
    /// A new instance that the server stores under another identifier is
    /// re-keyed in the cache. On failure the error is kept on the instance
    /// together with the local edits.
    pub async fn save_instance(&self, id: &str) -> Result<InstanceHandle> {
        let handle = self
            .get(id)
            .ok_or_else(|| KgError::NotFound { id: id.to_string() })?;
        let (is_new, space, payload) = {
            let mut instance = handle.lock();
            if instance.is_saving() {
                return Err(KgError::Save {
                    id: id.to_string(),
                    message: "a save is already running".to_string(),
                });
            }
            instance.begin_save();
            let payload = if instance.is_new() {
                instance.payload()
            } else {
                instance.return_value()
            };
            (
                instance.is_new(),
                instance.space().unwrap_or_default().to_string(),
                payload,
            )
        };

        let result = if is_new {
            self.api.create_instance(&space, id, payload).await
        } else {
            self.api.patch_instance(id, payload).await
        };

        match result {
            Ok(raw) => {
                if is_new && !raw.id.is_empty() && raw.id != id {
                    self.rekey(id, &raw.id, &handle);
                }
                let ctx = self.context();
                let mut instance = handle.lock();
                instance.initialize_data(raw, &ctx);
                instance.finish_save();
                drop(instance);
                self.notify();
                Ok(handle)
            }
            Err(err) => {
                let message = err.describe();
                log::warn!("Saving {id} failed: {message}");
                handle.lock().fail_save(message.clone());
                Err(KgError::Save {
                    id: id.to_string(),
                    message,
                })
            }
        }
    }

    /// Move `handle` from `old_id` to `new_id` in one critical section
    fn rekey(&self, old_id: &str, new_id: &str, handle: &InstanceHandle) {
        let mut instances = self.instances.lock();
        instances.remove(old_id);
        if let Some(existing) = instances.insert(new_id.to_string(), Arc::clone(handle)) {
            if !Arc::ptr_eq(&existing, handle) {
                log::warn!("Instance {new_id} was already cached; replacing it with the saved {old_id}");
            }
        }
        handle.lock().set_id(new_id);
        log::info!("Instance {old_id} was saved as {new_id}");
    }

    /// Unnormalized data of `id` with the caller's permissions
    pub async fn fetch_raw_instance(&self, id: &str) -> Result<RawInstanceData> {
        Ok(self.api.get_raw_instance(id).await?)
    }

    /// Load the next page of instances linking to `id` through `property`
    pub async fn fetch_more_incoming_links(
        &self,
        id: &str,
        property: &str,
        type_name: &str,
    ) -> Result<()> {
        let handle = self
            .get(id)
            .ok_or_else(|| KgError::NotFound { id: id.to_string() })?;
        let from = handle
            .lock()
            .incoming_links()
            .get(property)
            .and_then(|by_type| by_type.get(type_name))
            .map_or(0, |page| page.data.len());
        let size = self.context().config.links.page_size;
        let page = self
            .api
            .get_more_incoming_links(id, property, type_name, from, size)
            .await?;
        handle.lock().append_incoming_links(property, type_name, page);
        Ok(())
    }

    /// Every cached identifier reachable from `roots` through references,
    /// roots included, in breadth-first order
    pub fn linked_ids_closure<S: AsRef<str>>(&self, roots: &[S]) -> Vec<String> {
        let mut visited: IndexSet<String> = IndexSet::new();
        let mut queue: VecDeque<String> = roots.iter().map(|r| r.as_ref().to_string()).collect();
        while let Some(id) = queue.pop_front() {
            if !visited.insert(id.clone()) {
                continue;
            }
            if let Some(handle) = self.get(&id) {
                let children = handle.lock().children_ids();
                queue.extend(children.into_iter().filter(|c| !visited.contains(c)));
            }
        }
        visited.into_iter().collect()
    }

    /// Cached identifiers no open instance can reach; candidates for eviction
    pub fn unreachable_ids<S: AsRef<str>>(&self, open_roots: &[S]) -> Vec<String> {
        let reachable: IndexSet<String> = self.linked_ids_closure(open_roots).into_iter().collect();
        self.ids()
            .into_iter()
            .filter(|id| !reachable.contains(id))
            .collect()
    }

    /// Evict instances. Immediate and unconditional: callers decide what is
    /// safe to drop. Queued requests for them are cancelled, so their waiters
    /// resolve with an error; requests already sent complete harmlessly.
    pub fn remove_instances<S: AsRef<str>>(&self, ids: &[S]) {
        let removed: HashMap<String, InstanceHandle> = {
            let mut instances = self.instances.lock();
            ids.iter()
                .filter_map(|id| instances.remove_entry(id.as_ref()))
                .collect()
        };
        for kind in [QueueKind::Full, QueueKind::Label] {
            let cancelled: Vec<&str> = {
                let mut queue = self.queue(kind).lock();
                ids.iter()
                    .map(AsRef::as_ref)
                    .filter(|id| queue.cancel(id))
                    .collect()
            };
            for id in cancelled {
                if let Some(handle) = removed.get(id) {
                    cancel_fetch(kind, handle);
                }
            }
        }
        self.search_timers.lock().retain(|(id, _), (_, timer)| {
            let evicted = removed.contains_key(id);
            if evicted {
                timer.abort();
            }
            !evicted
        });
        self.notify();
        log::debug!("Evicted {} instance(s)", removed.len());
    }

    fn handles(&self) -> Vec<InstanceHandle> {
        self.instances.lock().values().cloned().collect()
    }

    pub fn get_unsaved_instances(&self) -> Vec<InstanceHandle> {
        self.handles()
            .into_iter()
            .filter(|handle| handle.lock().has_changed())
            .collect()
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.handles().iter().any(|handle| handle.lock().has_changed())
    }

    /// Forget everything, e.g. on logout or workspace switch. Requests in
    /// flight complete against instances no longer in the cache.
    pub fn flush(&self) {
        let dropped = std::mem::take(&mut *self.instances.lock());
        for kind in [QueueKind::Full, QueueKind::Label] {
            let cancelled = self.queue(kind).lock().clear();
            for id in cancelled {
                if let Some(handle) = dropped.get(&id) {
                    cancel_fetch(kind, handle);
                }
            }
        }
        for (_, (_, timer)) in self.search_timers.lock().drain() {
            timer.abort();
        }
        self.notify();
        log::info!("Instance store flushed");
    }
}

/// Settle a fetch whose queued request will never be sent
fn cancel_fetch(kind: QueueKind, handle: &InstanceHandle) {
    let mut instance = handle.lock();
    match kind {
        QueueKind::Full if instance.fetch_state().is_fetching() => {
            instance.fail_fetch(FetchError::Cancelled)
        }
        QueueKind::Label if instance.label_fetch_state().is_fetching() => {
            instance.fail_label_fetch(FetchError::Cancelled)
        }
        _ => {}
    }
}
