// Copyright 2026 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;

/// Errors reported synchronously from registration and event APIs.
///
/// Internal inconsistencies (actives underflow/overflow) are not represented here: those are
/// recovered by clamping and logging, never propagated to the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MonitorError {
    /// `limitMs` below the configured minimum, or an empty observed-entity set.
    InvalidArgument(String),
    /// The uid's per-kind observer count is already at the configured cap.
    QuotaExceeded(String),
    /// `noteUsageStart` on an already-active name, or `noteUsageStop` on an inactive one.
    StateConflict(String),
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            MonitorError::QuotaExceeded(msg) => write!(f, "quota exceeded: {msg}"),
            MonitorError::StateConflict(msg) => write!(f, "state conflict: {msg}"),
        }
    }
}

impl std::error::Error for MonitorError {}
