use lab_core::{JobId, OwnerId, Timestamp};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::debug;

/// Payload of a scheduled completion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CompletionCallback {
    pub owner: OwnerId,
    pub job: JobId,
    /// Deadline in the owner's effective time; the real fire time is derived
    /// from it and re-derived whenever the owner's time scale changes.
    pub effective_deadline: Timestamp,
}

/// Scheduled-callback facility.
///
/// Delivery is at-least-once: a callback returned from `take_due` stays
/// registered until it is acknowledged, so an unacknowledged callback is
/// delivered again on the next poll. Callbacks are never delivered before
/// their fire time.
pub trait CompletionScheduler: Send + Sync {
    /// Register or move the callback for `callback.job`.
    fn register_at(&self, fire_at: Timestamp, callback: CompletionCallback);

    /// Recompute fire times of `owner`'s callbacks from their effective deadlines.
    fn retime(&self, owner: &OwnerId, real_for: &dyn Fn(Timestamp) -> Timestamp);

    /// Callbacks due at `now`, earliest first.
    fn take_due(&self, now: Timestamp) -> Vec<CompletionCallback>;

    fn ack(&self, job: JobId);

    fn pending(&self) -> usize;

    fn next_fire_at(&self) -> Option<Timestamp>;
}

#[derive(Clone, Debug)]
struct Entry {
    fire_at: Timestamp,
    callback: CompletionCallback,
}

/// In-process timer table keyed by job id.
#[derive(Debug, Default)]
pub struct TimerQueue {
    entries: Mutex<BTreeMap<JobId, Entry>>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut BTreeMap<JobId, Entry>) -> R) -> R {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut entries)
    }
}

impl CompletionScheduler for TimerQueue {
    fn register_at(&self, fire_at: Timestamp, callback: CompletionCallback) {
        debug!(owner = %callback.owner, job = %callback.job, fire_at = %fire_at, "callback registered");
        self.with(|e| {
            e.insert(callback.job, Entry { fire_at, callback });
        });
    }

    fn retime(&self, owner: &OwnerId, real_for: &dyn Fn(Timestamp) -> Timestamp) {
        self.with(|entries| {
            for entry in entries.values_mut().filter(|e| &e.callback.owner == owner) {
                entry.fire_at = real_for(entry.callback.effective_deadline);
            }
        });
    }

    fn take_due(&self, now: Timestamp) -> Vec<CompletionCallback> {
        self.with(|entries| {
            let mut due: Vec<&Entry> = entries.values().filter(|e| e.fire_at <= now).collect();
            due.sort_by(|a, b| {
                a.fire_at
                    .cmp(&b.fire_at)
                    .then_with(|| a.callback.job.cmp(&b.callback.job))
            });
            due.into_iter().map(|e| e.callback.clone()).collect()
        })
    }

    fn ack(&self, job: JobId) {
        self.with(|e| {
            e.remove(&job);
        });
    }

    fn pending(&self) -> usize {
        self.with(|e| e.len())
    }

    fn next_fire_at(&self) -> Option<Timestamp> {
        self.with(|e| e.values().map(|x| x.fire_at).min())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use lab_core::add_millis;

    fn cb(owner: &str, job: u64, deadline: Timestamp) -> CompletionCallback {
        CompletionCallback {
            owner: OwnerId::new(owner),
            job: JobId(job),
            effective_deadline: deadline,
        }
    }

    #[test]
    fn unacked_callbacks_are_redelivered() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let q = TimerQueue::new();
        q.register_at(add_millis(t0, 20), cb("p", 2, t0));
        q.register_at(add_millis(t0, 10), cb("p", 1, t0));
        assert!(q.take_due(add_millis(t0, 9)).is_empty());
        let due: Vec<JobId> = q.take_due(add_millis(t0, 20)).into_iter().map(|c| c.job).collect();
        assert_eq!(due, vec![JobId(1), JobId(2)]);
        q.ack(JobId(1));
        assert_eq!(q.take_due(add_millis(t0, 20)).len(), 1);
        assert_eq!(q.pending(), 1);
    }

    #[test]
    fn registering_twice_keeps_one_entry() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let q = TimerQueue::new();
        q.register_at(add_millis(t0, 10), cb("p", 1, t0));
        q.register_at(add_millis(t0, 50), cb("p", 1, t0));
        assert_eq!(q.pending(), 1);
        assert_eq!(q.next_fire_at(), Some(add_millis(t0, 50)));
    }

    #[test]
    fn retime_only_touches_owner() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let q = TimerQueue::new();
        let deadline = add_millis(t0, 1_000);
        q.register_at(deadline, cb("p", 1, deadline));
        q.register_at(deadline, cb("q", 2, deadline));
        q.retime(&OwnerId::new("p"), &|eff| add_millis(eff, -900));
        let due = q.take_due(add_millis(t0, 100));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].owner, OwnerId::new("p"));
    }
}
