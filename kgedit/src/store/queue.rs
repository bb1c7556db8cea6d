//! Debounced, threshold-flushed batch queues.
//!
//! Enqueuing adds an identifier to the pending set and re-evaluates the
//! queue: below the threshold the debounce timer is (re)armed, at or above
//! it the queue flushes right away. At most one batch per queue is in
//! flight; when it completes the queue is re-evaluated to drain late arrivals.

use super::{InstanceHandle, InstanceStore};
use crate::api::{ApiResult, BatchResponse, RawInstance};
use crate::config::QueueConfig;
use crate::error::RequestError;
use crate::instance::FetchError;
use indexmap::IndexSet;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// Full instance data
    Full,
    /// Identity, name and types only
    Label,
}

#[derive(Debug, Default)]
pub(crate) struct FetchQueue {
    pub(crate) pending: IndexSet<String>,
    debounce: Option<JoinHandle<()>>,
    /// Incremented on every (re)arm so a superseded timer does nothing
    timer_seq: u64,
    /// An immediate flush was spawned and has not started yet
    flush_scheduled: bool,
    in_flight: bool,
    /// Identifiers of the batch in flight
    sending: IndexSet<String>,
}

impl FetchQueue {
    fn cancel_debounce(&mut self) {
        if let Some(handle) = self.debounce.take() {
            handle.abort();
        }
    }

    /// Drop `id` unless its batch is already out. True when a queued
    /// request was cancelled.
    pub(crate) fn cancel(&mut self, id: &str) -> bool {
        !self.sending.contains(id) && self.pending.shift_remove(id)
    }

    /// Drop pending identifiers and stop the timer. Returns the identifiers
    /// whose requests were never sent.
    pub(crate) fn clear(&mut self) -> Vec<String> {
        self.cancel_debounce();
        self.flush_scheduled = false;
        let sending = &self.sending;
        self.pending
            .drain(..)
            .filter(|id| !sending.contains(id))
            .collect()
    }
}

impl InstanceStore {
    fn queue_config(&self, kind: QueueKind) -> QueueConfig {
        let ctx = self.context();
        match kind {
            QueueKind::Full => ctx.config.queues.full,
            QueueKind::Label => ctx.config.queues.label,
        }
    }

    pub(crate) fn enqueue(self: &Arc<Self>, kind: QueueKind, id: &str) {
        let added = self.queue(kind).lock().pending.insert(id.to_string());
        if added {
            log::debug!("Queued {id} for {kind:?} fetch");
        }
        self.process_queue(kind);
    }

    pub(crate) fn process_queue(self: &Arc<Self>, kind: QueueKind) {
        let config = self.queue_config(kind);
        let threshold = config.threshold.max(1);
        let mut queue = self.queue(kind).lock();

        if queue.pending.is_empty() {
            queue.cancel_debounce();
            return;
        }

        if queue.pending.len() < threshold {
            queue.cancel_debounce();
            queue.timer_seq += 1;
            let seq = queue.timer_seq;
            let store = Arc::clone(self);
            let delay = config.debounce();
            queue.debounce = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                {
                    let mut queue = store.queue(kind).lock();
                    if queue.timer_seq != seq {
                        return;
                    }
                    // Forget our own handle so the flush cannot abort itself
                    queue.debounce = None;
                }
                store.fetch_queue(kind).await;
            }));
        } else if !queue.in_flight && !queue.flush_scheduled {
            queue.cancel_debounce();
            queue.flush_scheduled = true;
            let store = Arc::clone(self);
            tokio::spawn(async move { store.fetch_queue(kind).await });
        }
    }

    /// Send one batch of up to `threshold` pending identifiers
    pub(crate) async fn fetch_queue(self: &Arc<Self>, kind: QueueKind) {
        let threshold = self.queue_config(kind).threshold.max(1);
        let batch: Vec<String> = {
            let mut queue = self.queue(kind).lock();
            queue.flush_scheduled = false;
            if queue.in_flight || queue.pending.is_empty() {
                return;
            }
            queue.in_flight = true;
            let batch: Vec<String> = queue.pending.iter().take(threshold).cloned().collect();
            queue.sending = batch.iter().cloned().collect();
            batch
        };
        // Captured now so instances evicted mid-flight still settle their waiters
        let handles: Vec<(String, Option<InstanceHandle>)> =
            batch.iter().map(|id| (id.clone(), self.get(id))).collect();

        let stage = self.context().config.stage.clone();
        log::debug!("Fetching {} instance(s), {kind:?}", batch.len());
        let result = match kind {
            QueueKind::Full => self.api.get_instances_list(&stage, &batch).await,
            QueueKind::Label => self.api.get_instances_label(&stage, &batch).await,
        };
        self.apply_batch(kind, handles, result);

        {
            let mut queue = self.queue(kind).lock();
            for id in &batch {
                queue.pending.shift_remove(id);
            }
            queue.in_flight = false;
            queue.sending.clear();
        }
        self.notify();
        self.process_queue(kind);
    }

    fn apply_batch(
        &self,
        kind: QueueKind,
        handles: Vec<(String, Option<InstanceHandle>)>,
        result: ApiResult<BatchResponse>,
    ) {
        let ctx = self.context();
        match result {
            Ok(mut response) => {
                for (id, handle) in handles {
                    let Some(handle) = handle else {
                        continue;
                    };
                    let outcome = match response.remove(&id) {
                        Some(entry) => parse_entry(entry),
                        None => Err(FetchError::NotFound),
                    };
                    let mut instance = handle.lock();
                    match (kind, outcome) {
                        (QueueKind::Full, _) if !instance.fetch_state().is_fetching() => {}
                        (QueueKind::Label, _) if !instance.label_fetch_state().is_fetching() => {}
                        (QueueKind::Full, Ok(raw)) => instance.initialize_data(raw, &ctx),
                        (QueueKind::Label, Ok(raw)) => instance.initialize_label_data(raw),
                        (QueueKind::Full, Err(e)) => {
                            log::debug!("Fetching {id} failed: {e}");
                            instance.fail_fetch(e);
                        }
                        (QueueKind::Label, Err(e)) => instance.fail_label_fetch(e),
                    }
                }
            }
            Err(err) => {
                log::warn!("Batch of {} {kind:?} fetch(es) failed: {}", handles.len(), err.describe());
                let error = FetchError::from(&err);
                for handle in handles.into_iter().filter_map(|(_, h)| h) {
                    let mut instance = handle.lock();
                    match kind {
                        QueueKind::Full if instance.fetch_state().is_fetching() => {
                            instance.fail_fetch(error.clone())
                        }
                        QueueKind::Label if instance.label_fetch_state().is_fetching() => {
                            instance.fail_label_fetch(error.clone())
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

/// Classify one batch entry: raw instance data or an error marker
fn parse_entry(entry: Value) -> Result<RawInstance, FetchError> {
    if let Some(marker) = entry.get("error") {
        let message = match marker {
            Value::String(s) => s.clone(),
            other => other
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error")
                .to_string(),
        };
        let mut err = RequestError::new(message);
        err.status = marker
            .get("status")
            .and_then(Value::as_u64)
            .and_then(|s| u16::try_from(s).ok());
        err.data = marker.get("data").filter(|d| !d.is_null()).cloned();
        return Err(FetchError::from(&err));
    }
    serde_json::from_value(entry).map_err(|e| FetchError::Failed(format!("Malformed instance: {e}")))
}
