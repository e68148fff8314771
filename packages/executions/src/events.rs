// ABOUTME: In-process publish/subscribe fan-out for execution steps
// ABOUTME: Synchronous registration-order delivery with typed unsubscribe tokens

use crate::types::AgentStep;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

pub type StepCallback = Arc<dyn Fn(&AgentStep) + Send + Sync>;

/// Capability returned by `subscribe`; consumed to unsubscribe
#[derive(Debug)]
pub struct SubscriptionToken {
    execution_id: String,
    id: u64,
}

type SubscriberMap = HashMap<String, Vec<(u64, StepCallback)>>;

#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<SubscriberMap>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, execution_id: &str, callback: StepCallback) -> SubscriptionToken {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subs = self.lock_subscribers();
        subs.entry(execution_id.to_string())
            .or_default()
            .push((id, callback));
        SubscriptionToken {
            execution_id: execution_id.to_string(),
            id,
        }
    }

    /// Remove one subscription. Unknown tokens are a no-op; the entry for an
    /// execution is dropped once its last subscriber leaves.
    pub fn unsubscribe(&self, token: SubscriptionToken) {
        let mut subs = self.lock_subscribers();
        if let Some(list) = subs.get_mut(&token.execution_id) {
            list.retain(|(id, _)| *id != token.id);
            if list.is_empty() {
                subs.remove(&token.execution_id);
            }
        }
    }

    /// Deliver a step to the subscribers registered at call time, in
    /// registration order. Callbacks run outside the lock so they may
    /// subscribe or unsubscribe without deadlocking.
    pub fn emit(&self, execution_id: &str, step: &AgentStep) {
        let callbacks: Vec<StepCallback> = {
            let subs = self.lock_subscribers();
            subs.get(execution_id)
                .map(|list| list.iter().map(|(_, cb)| cb.clone()).collect())
                .unwrap_or_default()
        };
        for callback in callbacks {
            callback(step);
        }
    }

    pub fn subscriber_count(&self, execution_id: &str) -> usize {
        self.lock_subscribers()
            .get(execution_id)
            .map(|list| list.len())
            .unwrap_or(0)
    }

    pub fn tracked_execution_count(&self) -> usize {
        self.lock_subscribers().len()
    }

    fn lock_subscribers(&self) -> MutexGuard<'_, SubscriberMap> {
        self.subscribers.lock().unwrap_or_else(|poisoned| {
            warn!("Event bus lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}
