use parking_lot::Mutex;
use rule_controller_core::Kind;
use std::collections::VecDeque;
use tokio::sync::Notify;

/// Kinds awaiting dispatch on a connection.
///
/// The queue holds change signals, not payloads: a kind is queued at most
/// once, and the dispatcher reads the current state when it dequeues it.
#[derive(Debug, Default)]
pub(crate) struct WorkQueue {
    state: Mutex<State>,
    notify: Notify,
}

#[derive(Debug, Default)]
struct State {
    pending: VecDeque<Kind>,
    shutdown: bool,
}

// === impl WorkQueue ===

impl WorkQueue {
    /// Queues a kind, returning false if it was already pending or the queue
    /// has been shut down.
    pub(crate) fn push(&self, kind: Kind) -> bool {
        {
            let mut state = self.state.lock();
            if state.shutdown || state.pending.contains(&kind) {
                return false;
            }
            state.pending.push_back(kind);
        }
        self.notify.notify_one();
        true
    }

    /// Waits for the next pending kind. Returns `None` once the queue is shut
    /// down.
    pub(crate) async fn next(&self) -> Option<Kind> {
        loop {
            {
                let mut state = self.state.lock();
                if state.shutdown {
                    return None;
                }
                if let Some(kind) = state.pending.pop_front() {
                    return Some(kind);
                }
            }
            self.notify.notified().await;
        }
    }

    pub(crate) fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            state.shutdown = true;
            state.pending.clear();
        }
        self.notify.notify_one();
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().pending.len()
    }
}
