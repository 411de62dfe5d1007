//! Per-identity lock flags

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Lock flag of one identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockState {
    /// No locked request was ever dispatched under this identity
    Unset,
    Locked,
    Unlocked,
}

/// Identity -> lock flag, created lazily and never evicted
#[derive(Debug, Default)]
pub struct LockTable {
    flags: HashMap<String, bool>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, identity: &str) -> LockState {
        match self.flags.get(identity) {
            None => LockState::Unset,
            Some(true) => LockState::Locked,
            Some(false) => LockState::Unlocked,
        }
    }

    pub fn is_locked(&self, identity: &str) -> bool {
        self.state(identity) == LockState::Locked
    }

    /// Lock the identity unless it is already locked
    ///
    /// Returns false, leaving the table untouched, when it was locked.
    pub fn try_acquire(&mut self, identity: &str) -> bool {
        if self.is_locked(identity) {
            debug!(%identity, "LockTable::try_acquire: already locked");
            return false;
        }
        self.flags.insert(identity.to_string(), true);
        true
    }

    /// Unlock the identity
    pub fn release(&mut self, identity: &str) {
        debug!(%identity, "LockTable::release: called");
        self.flags.insert(identity.to_string(), false);
    }

    /// Number of identities currently locked
    pub fn locked_count(&self) -> usize {
        self.flags.values().filter(|locked| **locked).count()
    }

    pub fn snapshot(&self) -> BTreeMap<String, LockState> {
        self.flags
            .keys()
            .map(|identity| (identity.clone(), self.state(identity)))
            .collect()
    }
}
