// Copyright 2026 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).


use std::collections::{HashMap, HashSet};

use crate::ids::{EntityName, GroupKey};

/// Per-user active-entity set and reverse index from entity to the groups watching it
/// (component C3). Created lazily on first event for a userId, dropped wholesale on
/// `onUserRemoved`.
#[derive(Default)]
pub struct UserState {
    currently_active: HashSet<EntityName>,
    observed_index: HashMap<EntityName, Vec<GroupKey>>,
}

impl UserState {
    pub fn is_active(&self, name: &str) -> bool {
        self.currently_active.contains(name)
    }

    pub fn is_any_active(&self, names: &[EntityName]) -> bool {
        names.iter().any(|name| self.currently_active.contains(name))
    }

    pub fn active_names(&self) -> impl Iterator<Item = &str> {
        self.currently_active.iter().map(String::as_str)
    }

    /// Indexes `key` under every name in `observed`. A group appears once per distinct entity it
    /// observes, matching invariant (2) of the data model.
    pub fn add_group(&mut self, key: GroupKey, observed: &[EntityName]) {
        for name in observed {
            self.observed_index.entry(name.clone()).or_default().push(key);
        }
    }

    /// Reverses `add_group`, dropping any entity entry left empty.
    pub fn remove_group(&mut self, key: GroupKey, observed: &[EntityName]) {
        for name in observed {
            if let Some(keys) = self.observed_index.get_mut(name) {
                keys.retain(|indexed| *indexed != key);
                if keys.is_empty() {
                    self.observed_index.remove(name);
                }
            }
        }
    }

    /// Marks `name` active and returns the groups indexed under it (possibly empty).
    pub fn mark_active(&mut self, name: &str) -> Vec<GroupKey> {
        self.currently_active.insert(name.to_string());
        self.observed_index
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Marks `name` inactive and returns the groups indexed under it (possibly empty).
    pub fn mark_inactive(&mut self, name: &str) -> Vec<GroupKey> {
        self.currently_active.remove(name);
        self.observed_index
            .get(name)
            .cloned()
            .unwrap_or_default()
    }
}
