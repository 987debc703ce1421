// Copyright 2026 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! `usage_monitor` tracks per-user time-on-entity usage against caller-registered limits.
//!
//! A caller registers either an app-usage observer (fires once, then removes itself) or a
//! usage-session observer (fires every time a limit is crossed within a session, plus a
//! session-end notification after a configurable idle gap) for a set of observed entity names —
//! app package names, or any caller-defined token. The host reports entity activation/
//! deactivation through [`Controller::note_usage_start`]/[`Controller::note_usage_stop`]; the
//! engine maintains the accounting and dispatches [`Notifier`] callbacks as limits are crossed.
//!
//! The engine never reads wall-clock time or spawns its own threads: [`Clock`] is injected, and
//! [`TimerThread`] is an optional dedicated background thread the host may spin up to drive
//! deferred timer firings. A host that already has its own scheduler can instead call
//! `Controller::pump_timers` directly (crate-private today, exercised by the test suite).

mod clock;
mod config;
mod controller;
mod error;
mod group;
mod ids;
mod notifier;
mod observer_table;
mod timer;
mod user_state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ColdStartMode, MonitorConfig, MAX_OBSERVERS_PER_UID, MIN_TIME_LIMIT_MS};
pub use controller::Controller;
pub use error::MonitorError;
pub use ids::{EntityName, GroupKind, ObserverId, Uid, UserId};
pub use notifier::{Notifier, Opaque};
pub use timer::TimerThread;
