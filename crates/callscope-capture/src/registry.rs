//! Identity-keyed dispatch for in-flight calls
//!
//! Only needed by event sources that report a call id instead of passing the
//! [`CallHandle`] along. Entries are removed exactly once, on finalization.

use crate::record::FinishedCall;
use crate::tracker::{CallEvent, CallHandle};
use callscope_core::CallId;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::time::Instant;

#[derive(Debug, Default)]
pub struct CallRegistry {
    calls: DashMap<CallId, CallHandle>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a call
    ///
    /// A second registration under the same id is ignored.
    pub fn begin(&self, handle: CallHandle) -> CallId {
        let call_id = handle.call_id();
        match self.calls.entry(call_id) {
            Entry::Occupied(_) => {
                tracing::warn!(call_id = %call_id, "Call already registered, keeping the original");
            }
            Entry::Vacant(slot) => {
                slot.insert(handle);
            }
        }
        call_id
    }

    /// Route an event to its call
    ///
    /// Terminal events remove the entry and return the finished record.
    /// Events for unknown ids are ignored.
    pub fn dispatch(&self, call_id: CallId, event: CallEvent) -> Option<FinishedCall> {
        if event.is_terminal() {
            let Some((_, handle)) = self.calls.remove(&call_id) else {
                tracing::debug!(
                    call_id = %call_id,
                    event = event.name(),
                    "Terminal event for unknown call, ignoring"
                );
                return None;
            };
            return handle.finish_with(event);
        }

        match self.calls.get_mut(&call_id) {
            Some(mut handle) => handle.apply(event),
            None => tracing::debug!(
                call_id = %call_id,
                event = event.name(),
                "Event for unknown call, ignoring"
            ),
        }
        None
    }

    /// Finalize and remove a call that will never see a terminal event
    pub fn abort(&self, call_id: CallId, reason: &str) -> Option<FinishedCall> {
        let (_, handle) = self.calls.remove(&call_id)?;
        tracing::debug!(call_id = %call_id, reason = %reason, "Aborting in-flight call");
        handle.abort(reason, Instant::now())
    }

    /// Abort every in-flight call
    pub fn abort_all(&self, reason: &str) -> Vec<FinishedCall> {
        let ids: Vec<CallId> = self.calls.iter().map(|entry| *entry.key()).collect();
        ids.into_iter()
            .filter_map(|call_id| self.abort(call_id, reason))
            .collect()
    }

    pub fn contains(&self, call_id: &CallId) -> bool {
        self.calls.contains_key(call_id)
    }

    pub fn in_flight(&self) -> usize {
        self.calls.len()
    }
}
