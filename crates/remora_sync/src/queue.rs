//! Per-identity FIFO task ordering.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
struct LaneState {
    next_ticket: u64,
    now_serving: u64,
}

#[derive(Default)]
struct Lane {
    state: Mutex<LaneState>,
    condvar: Condvar,
}

/// Strict per-key FIFO serialization of units of work.
///
/// [`TaskQueue::acquire`] hands out tickets in call order and blocks until
/// every earlier ticket for the same key has been released — so work for
/// one identity runs one at a time, in submission order, whether or not
/// earlier work succeeded. Different keys never wait on each other.
///
/// This is what guarantees that two concurrent `save()` calls on one
/// identity reach the network in issue order and apply their responses in
/// that same order.
#[derive(Default)]
pub struct TaskQueue {
    lanes: Mutex<HashMap<String, Arc<Lane>>>,
}

/// Exclusive occupancy of one key's lane; released on drop.
pub struct LaneGuard {
    lane: Arc<Lane>,
    ticket: u64,
}

impl TaskQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until every earlier acquire for `key` has been released,
    /// then returns the lane guard.
    pub fn acquire(&self, key: &str) -> LaneGuard {
        let lane = {
            let mut lanes = self.lanes.lock();
            Arc::clone(lanes.entry(key.to_string()).or_default())
        };

        let ticket = {
            let mut state = lane.state.lock();
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            ticket
        };

        let mut state = lane.state.lock();
        while state.now_serving != ticket {
            lane.condvar.wait(&mut state);
        }
        drop(state);

        LaneGuard { lane, ticket }
    }

    /// Runs `task` once every earlier task for `key` has settled.
    ///
    /// If the lane is idle the task runs immediately; the task's outcome
    /// (success or failure) releases the lane either way.
    pub fn enqueue<R>(&self, key: &str, task: impl FnOnce() -> R) -> R {
        let _guard = self.acquire(key);
        task()
    }

    /// Number of keys with waiters or a running task.
    pub fn busy_lanes(&self) -> usize {
        self.lanes
            .lock()
            .values()
            .filter(|lane| {
                let state = lane.state.lock();
                state.now_serving != state.next_ticket
            })
            .count()
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("busy_lanes", &self.busy_lanes())
            .finish()
    }
}

impl Drop for LaneGuard {
    fn drop(&mut self) {
        let mut state = self.lane.state.lock();
        debug_assert_eq!(state.now_serving, self.ticket);
        state.now_serving += 1;
        self.lane.condvar.notify_all();
    }
}
