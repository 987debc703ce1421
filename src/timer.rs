// Copyright 2026 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).


use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};

use crate::clock::Clock;
use crate::controller::Controller;
use crate::ids::GroupKey;

/// The two kinds of deferred message the Timer Service schedules (component C2).
///
/// `INFORM_LIMIT_REACHED` is not a message kind here: the spec calls it out as posted
/// "(immediate)", so the Controller dispatches it synchronously from the call site that
/// detected the crossing rather than routing it through this queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimerKind {
    CheckTimeout,
    SessionEnd,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    deadline_ms: u64,
    seq: u64,
    kind: TimerKind,
    key: GroupKey,
    epoch: u64,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deadline_ms, self.seq).cmp(&(other.deadline_ms, other.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The scheduling data structure behind the Timer Service: a deadline-ordered min-heap (built
/// the same way the workunit store orders its span-completion queue, with entries wrapped in
/// `Reverse` so the earliest deadline sits at the top of a max-heap) plus a "live slot" table
/// used for O(1) cancellation.
///
/// Cancellation is lazy: each `(kind, key)` slot owns a monotonically increasing epoch. `post`
/// bumps the epoch; `cancel` removes the slot outright. A popped heap entry is only delivered if
/// its epoch still matches the live slot — a stale or cancelled entry is silently discarded,
/// which is what makes a fired-but-superseded timer a no-op independent of any Controller-side
/// bookkeeping.
pub(crate) struct TimerQueue {
    heap: BinaryHeap<Reverse<Entry>>,
    slots: HashMap<(TimerKind, GroupKey), u64>,
    next_seq: u64,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            slots: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Schedules `kind` for `key` at `now_ms + delay_ms`, superseding any prior pending timer
    /// for the same `(kind, key)`.
    pub(crate) fn post(&mut self, kind: TimerKind, key: GroupKey, now_ms: u64, delay_ms: u64) {
        let epoch = self.slots.entry((kind, key)).or_insert(0);
        *epoch = epoch.wrapping_add(1);
        let epoch = *epoch;

        let seq = self.next_seq;
        self.next_seq += 1;

        self.heap.push(Reverse(Entry {
            deadline_ms: now_ms + delay_ms,
            seq,
            kind,
            key,
            epoch,
        }));
    }

    /// Removes all pending messages matching `(kind, key)`.
    pub(crate) fn cancel(&mut self, kind: TimerKind, key: GroupKey) {
        self.slots.remove(&(kind, key));
    }

    pub(crate) fn next_deadline(&self) -> Option<u64> {
        self.heap.peek().map(|Reverse(entry)| entry.deadline_ms)
    }

    /// Pops and returns every entry due at or before `now_ms` whose slot is still live, in
    /// deadline (then FIFO) order, discarding stale entries along the way.
    pub(crate) fn drain_due(&mut self, now_ms: u64) -> Vec<(TimerKind, GroupKey)> {
        let mut due = Vec::new();
        while let Some(Reverse(entry)) = self.heap.peek() {
            if entry.deadline_ms > now_ms {
                break;
            }
            let Reverse(entry) = self.heap.pop().expect("peeked entry must pop");
            if self.slots.get(&(entry.kind, entry.key)) == Some(&entry.epoch) {
                self.slots.remove(&(entry.kind, entry.key));
                due.push((entry.kind, entry.key));
            }
        }
        due
    }
}

/// A nudge sent to the background thread: either "re-check deadlines now" or "shut down".
enum Nudge {
    Wake,
    Shutdown,
}

/// Drives a Controller's Timer Service on a dedicated background thread, the same shape as the
/// filesystem watcher's invalidation thread: a loop that blocks on `recv_timeout` until the next
/// deadline or an explicit nudge, holding the Controller only weakly so a dropped Controller
/// lets the thread exit on its own even without an explicit shutdown.
pub struct TimerThread {
    nudge: Sender<Nudge>,
    handle: Option<thread::JoinHandle<()>>,
}

/// Fallback poll interval used when there is no pending timer, or as a defensive upper bound on
/// how long a single wait blocks even if a nudge is somehow missed.
const POLL_INTERVAL_MS: u64 = 250;

impl TimerThread {
    pub fn spawn(controller: Arc<Controller>, clock: Arc<dyn Clock>) -> Self {
        let (nudge_sender, nudge_receiver) = bounded(1);

        let weak = Arc::downgrade(&controller);
        drop(controller);

        let handle = thread::spawn(move || loop {
            let Some(controller) = weak.upgrade() else {
                break;
            };

            let now = clock.now_millis();
            controller.pump_timers(now);
            let next_deadline = controller.next_timer_deadline();
            drop(controller);

            let wait_ms = match next_deadline {
                Some(deadline) if deadline > now => (deadline - now).min(POLL_INTERVAL_MS),
                Some(_) => 0,
                None => POLL_INTERVAL_MS,
            };
            match nudge_receiver.recv_timeout(Duration::from_millis(wait_ms)) {
                Ok(Nudge::Shutdown) => break,
                Ok(Nudge::Wake) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        });

        TimerThread {
            nudge: nudge_sender,
            handle: Some(handle),
        }
    }

    /// Nudges the background thread to re-check deadlines immediately, e.g. after a test
    /// harness advances a `ManualClock`, or whenever a new timer is posted with an earlier
    /// deadline than the one the thread is currently waiting on.
    pub fn wake(&self) {
        // A full channel means a nudge is already pending; the thread will wake regardless.
        let _ = self.nudge.try_send(Nudge::Wake);
    }
}

impl Drop for TimerThread {
    fn drop(&mut self) {
        let _ = self.nudge.send(Nudge::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
