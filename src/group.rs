// Copyright 2026 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).


use log::warn;

use crate::ids::{EntityName, GroupKey, UserId};
use crate::notifier::Opaque;
use crate::timer::TimerKind;

/// Fields specific to a `SessionUsageGroup`.
#[derive(Clone, Debug)]
pub struct SessionData {
    pub last_usage_end_ms: u64,
    pub new_session_threshold_ms: u64,
    pub session_end_callback: Opaque,
}

/// The two `UsageGroup` flavors (component C5), modeled as a tagged variant rather than
/// inheritance: they share every accounting field, and differ only in the start/stop hooks and
/// removal policy dispatched on this tag.
#[derive(Clone, Debug)]
pub enum Variant {
    App,
    Session(SessionData),
}

/// Side effects a group transition wants applied by its owning Controller: timers to
/// post/cancel, Notifier calls to make, and whether the group should be removed. Keeping
/// `UsageGroup`'s transition methods pure functions of `&mut self` that return a small
/// effects value (rather than letting them reach into the Timer Service or Notifier directly)
/// is what makes the accounting logic independently unit-testable.
#[derive(Debug, Default)]
pub struct Effects {
    pub post: Vec<(TimerKind, u64)>,
    pub cancel: Vec<TimerKind>,
    pub limit_reached: Option<(u64, u64, Opaque)>,
    pub session_end: Option<(u64, Opaque)>,
    pub remove: bool,
}

impl Effects {
    pub fn merge(&mut self, other: Effects) {
        self.post.extend(other.post);
        self.cancel.extend(other.cancel);
        if other.limit_reached.is_some() {
            self.limit_reached = other.limit_reached;
        }
        if other.session_end.is_some() {
            self.session_end = other.session_end;
        }
        self.remove = self.remove || other.remove;
    }
}

/// The observer state machine: accounting, limit detection, and (for `Session`) rollover.
pub struct UsageGroup {
    pub key: GroupKey,
    pub user_id: UserId,
    pub observed: Vec<EntityName>,
    pub time_limit_ms: u64,
    pub usage_time_ms: u64,
    pub actives: usize,
    pub last_known_usage_ms: u64,
    pub limit_reached_callback: Opaque,
    pub variant: Variant,
}

impl UsageGroup {
    pub fn new(
        key: GroupKey,
        user_id: UserId,
        observed: Vec<EntityName>,
        time_limit_ms: u64,
        limit_reached_callback: Opaque,
        variant: Variant,
    ) -> Self {
        Self {
            key,
            user_id,
            observed,
            time_limit_ms,
            usage_time_ms: 0,
            actives: 0,
            last_known_usage_ms: 0,
            limit_reached_callback,
            variant,
        }
    }

    /// AppUsageGroup self-removes when its limit fires; SessionUsageGroup survives so a later
    /// activation can open a new session. This is the one place removal policy is dispatched on
    /// the variant, per the §9 design note.
    fn removes_on_limit(&self) -> bool {
        matches!(self.variant, Variant::App)
    }

    /// Called once per entity activation that hits this group.
    pub fn note_usage_start(&mut self, start_ms: u64, now_ms: u64) -> Effects {
        let mut eff = Effects::default();

        if self.actives == 0 {
            if let Variant::Session(session) = &mut self.variant {
                if start_ms.saturating_sub(session.last_usage_end_ms) > session.new_session_threshold_ms {
                    self.usage_time_ms = 0;
                }
                eff.cancel.push(TimerKind::SessionEnd);
            }
        }

        self.actives += 1;
        if self.actives == 1 {
            self.last_known_usage_ms = start_ms;
            // The `now - start` term back-credits a start timestamp that precedes "now".
            let time_remaining = (self.time_limit_ms as i64 - self.usage_time_ms as i64)
                + (now_ms as i64 - start_ms as i64);
            if time_remaining > 0 {
                eff.post.push((TimerKind::CheckTimeout, time_remaining as u64));
            }
        }

        if self.actives > self.observed.len() {
            warn!(
                "observer {:?}: actives {} exceeds {} observed entities; clamping",
                self.key,
                self.actives,
                self.observed.len()
            );
            self.actives = self.observed.len();
        }

        eff
    }

    pub fn note_usage_stop(&mut self, stop_ms: u64) -> Effects {
        let mut eff = Effects::default();
        let crossed_before = self.usage_time_ms < self.time_limit_ms;

        if self.actives == 0 {
            warn!(
                "observer {:?}: actives underflow on stop; clamping to 0",
                self.key
            );
        } else {
            self.actives -= 1;
        }

        if self.actives == 0 {
            self.usage_time_ms += stop_ms.saturating_sub(self.last_known_usage_ms);
            eff.cancel.push(TimerKind::CheckTimeout);

            let crossed_now = self.usage_time_ms >= self.time_limit_ms;
            if crossed_before && crossed_now {
                eff.limit_reached = Some((
                    self.time_limit_ms,
                    self.usage_time_ms,
                    self.limit_reached_callback,
                ));
                eff.remove = self.removes_on_limit();
            }

            if let Variant::Session(session) = &mut self.variant {
                session.last_usage_end_ms = stop_ms;
                if self.usage_time_ms >= self.time_limit_ms {
                    eff.post
                        .push((TimerKind::SessionEnd, session.new_session_threshold_ms));
                }
            }
        }

        eff
    }

    /// Fired by the Timer Service. `any_observed_active` must reflect the *current* UserState,
    /// not the state at post time: a stop may have raced the timer.
    pub fn check_timeout(&mut self, now_ms: u64, any_observed_active: bool) -> Effects {
        let mut eff = Effects::default();

        let remaining = self.time_limit_ms.saturating_sub(self.usage_time_ms);
        if remaining == 0 {
            return eff;
        }
        if !any_observed_active {
            return eff;
        }

        let used = now_ms.saturating_sub(self.last_known_usage_ms);
        if remaining <= used {
            // Commit usage and fire. Intentionally does not commit on the "keep waiting" branch
            // below — the stop path recomputes from `last_known_usage_ms` instead.
            self.usage_time_ms += used;
            self.last_known_usage_ms = now_ms;
            eff.limit_reached = Some((
                self.time_limit_ms,
                self.usage_time_ms,
                self.limit_reached_callback,
            ));
            eff.remove = self.removes_on_limit();
        } else {
            eff.post.push((TimerKind::CheckTimeout, remaining - used));
        }

        eff
    }

    /// The payload for an `INFORM_SESSION_END` firing, if this is a session group.
    pub fn session_end_event(&self) -> Option<(u64, Opaque)> {
        match &self.variant {
            Variant::Session(session) => Some((self.usage_time_ms, session.session_end_callback)),
            Variant::App => None,
        }
    }
}
