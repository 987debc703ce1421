// Copyright 2026 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).


use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use log::trace;
use parking_lot::{Mutex, MutexGuard};

use crate::clock::Clock;
use crate::config::{ColdStartMode, MonitorConfig};
use crate::error::MonitorError;
use crate::group::{Effects, SessionData, UsageGroup, Variant};
use crate::ids::{EntityName, GroupKey, GroupKind, ObserverId, Uid, UserId};
use crate::notifier::{Notifier, Opaque};
use crate::observer_table::ObserverAppData;
use crate::timer::{TimerKind, TimerQueue};
use crate::user_state::UserState;

struct Inner {
    users: HashMap<UserId, UserState>,
    uid_table: HashMap<Uid, ObserverAppData>,
    groups: HashMap<GroupKey, UsageGroup>,
    timers: TimerQueue,
}

enum PendingCallback {
    LimitReached {
        observer_id: ObserverId,
        user_id: UserId,
        limit_ms: u64,
        elapsed_ms: u64,
        callback: Opaque,
    },
    SessionEnd {
        observer_id: ObserverId,
        user_id: UserId,
        elapsed_ms: u64,
        callback: Opaque,
    },
}

/// The public façade (component C6): register/remove observers, ingest start/stop events, and
/// route timer firings. Every operation here acquires the single global lock described in the
/// concurrency model; no I/O happens while it is held.
///
/// `Controller` is meant to be held behind an `Arc` by its owner, with a `TimerThread` (or the
/// host's own scheduler calling `pump_timers`) driving deferred notifications. The Controller
/// itself never spawns that thread, so it has no opinion about who keeps it alive.
pub struct Controller {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    config: MonitorConfig,
}

impl Controller {
    pub fn new(clock: Arc<dyn Clock>, notifier: Arc<dyn Notifier>, config: MonitorConfig) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                users: HashMap::new(),
                uid_table: HashMap::new(),
                groups: HashMap::new(),
                timers: TimerQueue::new(),
            }),
            clock,
            notifier,
            config,
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn add_app_usage_observer(
        &self,
        uid: Uid,
        observer_id: ObserverId,
        observed: Vec<EntityName>,
        limit_ms: u64,
        callback: Opaque,
        user_id: UserId,
    ) -> Result<(), MonitorError> {
        self.add_observer(uid, observer_id, observed, limit_ms, callback, user_id, None)
    }

    pub fn add_usage_session_observer(
        &self,
        uid: Uid,
        observer_id: ObserverId,
        observed: Vec<EntityName>,
        limit_ms: u64,
        new_session_threshold_ms: u64,
        limit_callback: Opaque,
        session_end_callback: Opaque,
        user_id: UserId,
    ) -> Result<(), MonitorError> {
        self.add_observer(
            uid,
            observer_id,
            observed,
            limit_ms,
            limit_callback,
            user_id,
            Some(SessionData {
                last_usage_end_ms: 0,
                new_session_threshold_ms,
                session_end_callback,
            }),
        )
    }

    fn add_observer(
        &self,
        uid: Uid,
        observer_id: ObserverId,
        observed: Vec<EntityName>,
        limit_ms: u64,
        callback: Opaque,
        user_id: UserId,
        session: Option<SessionData>,
    ) -> Result<(), MonitorError> {
        if limit_ms < self.config.min_time_limit_ms {
            return Err(MonitorError::InvalidArgument(format!(
                "time limit {limit_ms}ms is below the minimum of {}ms",
                self.config.min_time_limit_ms
            )));
        }
        if observed.is_empty() {
            return Err(MonitorError::InvalidArgument(
                "observed entity set must not be empty".to_string(),
            ));
        }

        let kind = if session.is_some() {
            GroupKind::Session
        } else {
            GroupKind::App
        };
        let key = GroupKey::new(uid, observer_id, kind);

        let mut inner = self.inner.lock();

        // Upsert: replace a prior registration under the same observer_id/kind first, so the
        // quota check below sees the post-replacement count.
        if inner.groups.contains_key(&key) {
            Self::remove_group_locked(&mut inner, key, user_id);
        }

        let existing_count = {
            let table = inner.uid_table.entry(uid).or_default();
            match kind {
                GroupKind::App => table.app_group_ids.len(),
                GroupKind::Session => table.session_group_ids.len(),
            }
        };
        if existing_count >= self.config.max_observers_per_uid {
            return Err(MonitorError::QuotaExceeded(format!(
                "uid {uid} already has {existing_count} {kind:?} observers (limit {})",
                self.config.max_observers_per_uid
            )));
        }

        let variant = match session {
            Some(session_data) => Variant::Session(session_data),
            None => Variant::App,
        };
        let mut group = UsageGroup::new(key, user_id, observed.clone(), limit_ms, callback, variant);

        let now = self.clock.now_millis();
        let user = inner.users.entry(user_id).or_default();
        user.add_group(key, &observed);
        let already_active: Vec<&EntityName> =
            observed.iter().filter(|name| user.is_active(name)).collect();

        // Cold-start: entities already active when this observer registers. See DESIGN.md for
        // the source's double-count bug (`PerEntity`) versus the corrected accounting.
        let mut effects = Effects::default();
        match self.config.cold_start_mode {
            ColdStartMode::PerEntity => {
                for _ in &already_active {
                    effects.merge(group.note_usage_start(now, now));
                }
            }
            ColdStartMode::Corrected => {
                if !already_active.is_empty() {
                    effects = group.note_usage_start(now, now);
                    group.actives = already_active.len().min(group.observed.len());
                }
            }
        }

        let table = inner.uid_table.entry(uid).or_default();
        match kind {
            GroupKind::App => {
                table.app_group_ids.insert(observer_id);
            }
            GroupKind::Session => {
                table.session_group_ids.insert(observer_id);
            }
        }
        inner.groups.insert(key, group);

        let pending = self.apply_effects(&mut inner, key, user_id, effects);
        self.finish(inner, pending);
        Ok(())
    }

    pub fn remove_app_usage_observer(&self, uid: Uid, observer_id: ObserverId, user_id: UserId) {
        let mut inner = self.inner.lock();
        Self::remove_group_locked(&mut inner, GroupKey::new(uid, observer_id, GroupKind::App), user_id);
    }

    pub fn remove_usage_session_observer(&self, uid: Uid, observer_id: ObserverId, user_id: UserId) {
        let mut inner = self.inner.lock();
        Self::remove_group_locked(
            &mut inner,
            GroupKey::new(uid, observer_id, GroupKind::Session),
            user_id,
        );
    }

    pub fn note_usage_start(&self, name: &str, user_id: UserId) -> Result<(), MonitorError> {
        let mut inner = self.inner.lock();
        let user = inner.users.entry(user_id).or_default();
        if user.is_active(name) {
            return Err(MonitorError::StateConflict(format!(
                "{name} is already active for user {user_id}"
            )));
        }
        let keys = user.mark_active(name);
        let now = self.clock.now_millis();

        let mut pending = Vec::new();
        for key in keys {
            let Some(group_user_id) = inner.groups.get(&key).map(|g| g.user_id) else {
                continue;
            };
            let effects = inner
                .groups
                .get_mut(&key)
                .expect("looked up above")
                .note_usage_start(now, now);
            pending.extend(self.apply_effects(&mut inner, key, group_user_id, effects));
        }

        self.finish(inner, pending);
        Ok(())
    }

    pub fn note_usage_stop(&self, name: &str, user_id: UserId) -> Result<(), MonitorError> {
        let mut inner = self.inner.lock();
        let user = inner.users.entry(user_id).or_default();
        if !user.is_active(name) {
            return Err(MonitorError::StateConflict(format!(
                "{name} is not active for user {user_id}"
            )));
        }
        let keys = user.mark_inactive(name);
        let now = self.clock.now_millis();

        let mut pending = Vec::new();
        for key in keys {
            let Some(group_user_id) = inner.groups.get(&key).map(|g| g.user_id) else {
                continue;
            };
            let effects = inner
                .groups
                .get_mut(&key)
                .expect("looked up above")
                .note_usage_stop(now);
            pending.extend(self.apply_effects(&mut inner, key, group_user_id, effects));
        }

        self.finish(inner, pending);
        Ok(())
    }

    /// Drops the UserState for `user_id`. Groups that observed this user's entities are *not*
    /// removed: they remain reachable by uid/observerId so an explicit remove call still works,
    /// and any timer still pending for them will find no active entities on the next firing and
    /// no-op, per the spec's documented caveat.
    pub fn on_user_removed(&self, user_id: UserId) {
        let mut inner = self.inner.lock();
        inner.users.remove(&user_id);
    }

    /// Diagnostic text dump of all users and observer apps.
    pub fn dump(&self) -> String {
        let inner = self.inner.lock();
        let mut out = String::new();

        let _ = writeln!(out, "usage_monitor dump:");
        let mut user_ids: Vec<_> = inner.users.keys().copied().collect();
        user_ids.sort_unstable();
        for user_id in user_ids {
            let user = &inner.users[&user_id];
            let mut active: Vec<_> = user.active_names().collect();
            active.sort_unstable();
            let _ = writeln!(out, "  user {user_id}: active={active:?}");
        }

        let mut uids: Vec<_> = inner.uid_table.keys().copied().collect();
        uids.sort_unstable();
        for uid in uids {
            let table = &inner.uid_table[&uid];
            let _ = writeln!(
                out,
                "  uid {uid}: {} app observer(s), {} session observer(s)",
                table.app_group_ids.len(),
                table.session_group_ids.len(),
            );
        }

        out
    }

    pub fn dump_to(&self, w: &mut dyn std::fmt::Write) -> std::fmt::Result {
        write!(w, "{}", self.dump())
    }

    /// Called by a `TimerThread` (or a test harness) to deliver every timer due at `now_ms`.
    pub(crate) fn pump_timers(&self, now_ms: u64) {
        let mut inner = self.inner.lock();
        let due = inner.timers.drain_due(now_ms);

        let mut pending = Vec::new();
        for (kind, key) in due {
            let Some(group_user_id) = inner.groups.get(&key).map(|g| g.user_id) else {
                trace!("timer fired for a removed group {key:?}; dropping");
                continue;
            };

            match kind {
                TimerKind::CheckTimeout => {
                    let any_observed_active = {
                        let group = inner.groups.get(&key).expect("looked up above");
                        inner
                            .users
                            .get(&group_user_id)
                            .map(|user| user.is_any_active(&group.observed))
                            .unwrap_or(false)
                    };
                    let effects = inner
                        .groups
                        .get_mut(&key)
                        .expect("looked up above")
                        .check_timeout(now_ms, any_observed_active);
                    pending.extend(self.apply_effects(&mut inner, key, group_user_id, effects));
                }
                TimerKind::SessionEnd => {
                    if let Some((elapsed_ms, callback)) =
                        inner.groups.get(&key).and_then(|g| g.session_end_event())
                    {
                        pending.push(PendingCallback::SessionEnd {
                            observer_id: key.observer_id,
                            user_id: group_user_id,
                            elapsed_ms,
                            callback,
                        });
                    }
                }
            }
        }

        self.finish(inner, pending);
    }

    pub(crate) fn next_timer_deadline(&self) -> Option<u64> {
        self.inner.lock().timers.next_deadline()
    }

    /// Applies the timer and removal side of an `Effects` value, returning whatever Notifier
    /// calls it implies for the caller to dispatch via `finish`. Must be called with `inner`
    /// already locked.
    fn apply_effects(
        &self,
        inner: &mut Inner,
        key: GroupKey,
        user_id: UserId,
        effects: Effects,
    ) -> Vec<PendingCallback> {
        let now = self.clock.now_millis();
        for kind in effects.cancel {
            inner.timers.cancel(kind, key);
        }
        for (kind, delay_ms) in effects.post {
            inner.timers.post(kind, key, now, delay_ms);
        }

        let mut pending = Vec::new();
        if let Some((limit_ms, elapsed_ms, callback)) = effects.limit_reached {
            pending.push(PendingCallback::LimitReached {
                observer_id: key.observer_id,
                user_id,
                limit_ms,
                elapsed_ms,
                callback,
            });
        }
        if let Some((elapsed_ms, callback)) = effects.session_end {
            pending.push(PendingCallback::SessionEnd {
                observer_id: key.observer_id,
                user_id,
                elapsed_ms,
                callback,
            });
        }

        if effects.remove {
            Self::remove_group_locked(inner, key, user_id);
        }

        pending
    }

    fn remove_group_locked(inner: &mut Inner, key: GroupKey, user_id: UserId) {
        if let Some(group) = inner.groups.remove(&key) {
            if let Some(user) = inner.users.get_mut(&user_id) {
                user.remove_group(key, &group.observed);
            }
            inner.timers.cancel(TimerKind::CheckTimeout, key);
            inner.timers.cancel(TimerKind::SessionEnd, key);
        }

        if let Some(table) = inner.uid_table.get_mut(&key.uid) {
            match key.kind {
                GroupKind::App => {
                    table.app_group_ids.remove(&key.observer_id);
                }
                GroupKind::Session => {
                    table.session_group_ids.remove(&key.observer_id);
                }
            }
            if table.is_empty() {
                inner.uid_table.remove(&key.uid);
            }
        }
    }

    /// Dispatches `pending` Notifier calls either before or after releasing `inner`, per
    /// `MonitorConfig::deferred_callbacks`.
    fn finish(&self, inner: MutexGuard<'_, Inner>, pending: Vec<PendingCallback>) {
        if self.config.deferred_callbacks {
            drop(inner);
            for callback in pending {
                self.dispatch(callback);
            }
        } else {
            for callback in pending {
                self.dispatch(callback);
            }
            drop(inner);
        }
    }

    fn dispatch(&self, callback: PendingCallback) {
        match callback {
            PendingCallback::LimitReached {
                observer_id,
                user_id,
                limit_ms,
                elapsed_ms,
                callback,
            } => {
                self.notifier
                    .on_limit_reached(observer_id, user_id, limit_ms, elapsed_ms, callback);
            }
            PendingCallback::SessionEnd {
                observer_id,
                user_id,
                elapsed_ms,
                callback,
            } => {
                self.notifier
                    .on_session_end(observer_id, user_id, elapsed_ms, callback);
            }
        }
    }
}
