//! Long-poll registry
//!
//! A retrieve that finds nothing can park here and wait for a commit. The
//! registry stores only an id and a one-shot slot per waiter, never a
//! connection handle, so the connection side alone decides its lifetime:
//! it deregisters on wake, timeout, or disconnect using the id it got back.

use std::collections::HashMap;

use tokio::sync::oneshot;
use tracing::trace;

use super::types::Message;

struct Waiter {
    id: u64,
    slot: oneshot::Sender<Message>,
}

/// Per-recipient lists of suspended retrieve calls.
#[derive(Default)]
pub struct Listeners {
    next_id: u64,
    waiters: HashMap<String, Vec<Waiter>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a waiter for `pub_key`. Returns the waiter id and the slot the
    /// woken message arrives on.
    pub fn register(&mut self, pub_key: &str) -> (u64, oneshot::Receiver<Message>) {
        let (tx, rx) = oneshot::channel();
        self.next_id += 1;
        let id = self.next_id;
        self.waiters
            .entry(pub_key.to_string())
            .or_default()
            .push(Waiter { id, slot: tx });
        trace!(id, "registered long-poll listener");
        (id, rx)
    }

    /// Remove one waiter. Returns whether it was still registered.
    pub fn remove(&mut self, pub_key: &str, id: u64) -> bool {
        let Some(list) = self.waiters.get_mut(pub_key) else {
            return false;
        };
        let before = list.len();
        list.retain(|w| w.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            self.waiters.remove(pub_key);
        }
        removed
    }

    /// Wake every waiter for `pub_key`, delivering the committed message.
    /// Returns how many waiters were woken.
    pub fn notify(&mut self, pub_key: &str, msg: &Message) -> usize {
        let Some(list) = self.waiters.remove(pub_key) else {
            return 0;
        };
        let woken = list.len();
        for waiter in list {
            // A dropped receiver just means the client went away first.
            let _ = waiter.slot.send(msg.clone());
        }
        trace!(woken, "woke long-poll listeners");
        woken
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.values().map(|v| v.len()).sum()
    }
}
