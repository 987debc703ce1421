// Copyright 2026 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Identifiers shared across the engine.
//!
//! `GroupKey` stands in for the back-reference a `UsageGroup` would otherwise need to hold to
//! reach the `UserState`/`ObserverAppData` containers it is shared between. Every index that
//! would naturally hold a reference to a group (the reverse entity index, the per-uid observer
//! tables, the Timer Service's pending messages) holds a `GroupKey` instead, and resolves it
//! against the Controller's single arena under the lock. A key with no matching arena entry
//! means the group was removed; this is the mechanism behind "a fired-but-stale timer must
//! become a no-op" without any weak-pointer bookkeeping.

/// A user as seen by the host platform (e.g. a multi-user device's user id).
pub type UserId = i32;

/// The uid of the process that registered an observer.
pub type Uid = i32;

/// A uid-scoped identifier distinguishing one observer registration from another.
pub type ObserverId = i32;

/// An opaque, equality-compared unit of usage: an app package, or a caller-defined group token.
pub type EntityName = String;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GroupKind {
    App,
    Session,
}

/// Arena key for a `UsageGroup`. `observerId` namespaces are disjoint between app-limit and
/// session-limit observers for a given uid, which is why `kind` is part of the key rather than
/// assumed from context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub uid: Uid,
    pub observer_id: ObserverId,
    pub kind: GroupKind,
}

impl GroupKey {
    pub fn new(uid: Uid, observer_id: ObserverId, kind: GroupKind) -> Self {
        Self {
            uid,
            observer_id,
            kind,
        }
    }
}
