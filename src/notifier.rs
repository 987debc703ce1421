// Copyright 2026 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use crate::ids::{ObserverId, UserId};

/// A client-supplied correlation token, passed through unchanged.
///
/// The core never interprets this value; it exists purely so the host can find its way back to
/// whatever remote callback the registration was made on behalf of.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Opaque(pub u64);

/// The sink the Controller delivers limit/session notifications to.
///
/// Implementations are called best-effort: the engine does not observe their outcome, and a
/// panicking or slow Notifier is the host's problem, not the core's. See `MonitorConfig::deferred_callbacks`
/// for whether these are invoked with the global lock held.
pub trait Notifier: Send + Sync {
    fn on_limit_reached(
        &self,
        observer_id: ObserverId,
        user_id: UserId,
        time_limit_ms: u64,
        time_elapsed_ms: u64,
        callback: Opaque,
    );

    fn on_session_end(
        &self,
        observer_id: ObserverId,
        user_id: UserId,
        time_elapsed_ms: u64,
        callback: Opaque,
    );
}
