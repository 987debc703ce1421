// Copyright 2026 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

/// Minimum accepted `timeLimitMs` for any observer registration.
pub const MIN_TIME_LIMIT_MS: u64 = 60_000;

/// Per-uid cap on live observers, applied separately to app-limit and session-limit observers.
pub const MAX_OBSERVERS_PER_UID: usize = 1000;

/// Which of the two cold-start accounting behaviours `addXxxObserver` uses when some of the
/// newly-observed entities are already active.
///
/// The source has a known bug here (see DESIGN.md): `noteUsageStart` is invoked once per
/// already-active entity, inflating `actives` past the true concurrency. `PerEntity` reproduces
/// that literally; `Corrected` invokes the start hook once and sets `actives` to the true count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColdStartMode {
    PerEntity,
    Corrected,
}

/// Tunables for a `Controller`. `Default` matches the spec's defaults exactly.
#[derive(Clone, Copy, Debug)]
pub struct MonitorConfig {
    pub min_time_limit_ms: u64,
    pub max_observers_per_uid: usize,
    /// When `true`, Notifier callbacks are collected while the lock is held and dispatched just
    /// after it is released, instead of while still holding it. Opt-in: changes callback/event
    /// ordering as observed by a Notifier that itself calls back into the Controller.
    pub deferred_callbacks: bool,
    pub cold_start_mode: ColdStartMode,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            min_time_limit_ms: MIN_TIME_LIMIT_MS,
            max_observers_per_uid: MAX_OBSERVERS_PER_UID,
            deferred_callbacks: false,
            cold_start_mode: ColdStartMode::PerEntity,
        }
    }
}
