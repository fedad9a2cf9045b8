//! Persistent whitelist of accounts demoted in the not-following-back view.
//!
//! Membership is case-insensitive; the casing an entry was added with is what
//! gets displayed and persisted. Every mutation is written through the record
//! store before the call returns.

use crate::error::Result;
use crate::model::username_key;
use crate::records::RecordStore;
use crate::sanitize::sanitize_username;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Record key the whitelist is stored under (before the namespace prefix).
pub const WHITELIST_KEY: &str = "whitelist";

/// Whitelist entries live for a year unless configured otherwise.
pub const DEFAULT_WHITELIST_MAX_AGE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Body pushed to the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistPayload {
    pub whitelist: Vec<String>,
}

/// Remote whitelist endpoint: `GET` returns the list, `POST` replaces it.
#[async_trait(?Send)]
pub trait WhitelistRemote {
    async fn fetch(&self) -> Result<Vec<String>>;
    async fn replace(&self, payload: &WhitelistPayload) -> Result<()>;
}

/// What a sync attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Caller is not authenticated; nothing was exchanged.
    Skipped,
    Synced {
        whitelist: Vec<String>,
        /// Remote entries absent locally, overwritten by the push.
        dropped_remote: Vec<String>,
    },
    Failed { reason: String },
}

pub struct WhitelistStore {
    records: Rc<RecordStore>,
    max_age: Duration,
    /// Lowercase key -> display casing.
    entries: RefCell<BTreeMap<String, String>>,
}

impl WhitelistStore {
    /// Load the persisted whitelist, or start empty.
    pub fn load(records: Rc<RecordStore>, max_age: Duration) -> Self {
        let stored: Vec<String> = records.take(WHITELIST_KEY).unwrap_or_default();
        let mut entries = BTreeMap::new();
        for name in stored {
            if let Some(name) = sanitize_username(&name) {
                entries.entry(username_key(&name)).or_insert(name);
            }
        }
        debug!(entries = entries.len(), "Loaded whitelist");
        Self {
            records,
            max_age,
            entries: RefCell::new(entries),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    #[must_use]
    pub fn is_whitelisted(&self, username: &str) -> bool {
        self.entries.borrow().contains_key(&username_key(username))
    }

    /// Flip membership of `username` and persist. Returns the new membership.
    ///
    /// Names that sanitize to nothing are never members and are not stored.
    pub fn toggle(&self, username: &str) -> bool {
        let Some(name) = sanitize_username(username) else {
            warn!(username, "Ignoring unusable whitelist entry");
            return false;
        };
        let key = username_key(&name);
        let member = {
            let mut entries = self.entries.borrow_mut();
            if entries.remove(&key).is_some() {
                false
            } else {
                entries.insert(key, name.clone());
                true
            }
        };
        debug!(username = %name, member, "Toggled whitelist entry");
        self.persist();
        member
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
        self.persist();
        info!("Whitelist cleared");
    }

    /// Entries in display casing, sorted case-insensitively.
    #[must_use]
    pub fn all(&self) -> Vec<String> {
        self.entries.borrow().values().cloned().collect()
    }

    /// Lowercase membership set for the sort/filter engine.
    #[must_use]
    pub fn as_set(&self) -> HashSet<String> {
        self.entries.borrow().keys().cloned().collect()
    }

    /// Merge a remote list into the local one. Local wins: the result is the
    /// local whitelist unchanged, and remote-only entries are dropped.
    ///
    /// Unauthenticated callers get the local list back without any merge.
    pub fn reconcile_with_remote(&self, remote: &[String], authenticated: bool) -> Vec<String> {
        let local = self.all();
        if authenticated {
            let dropped = self.remote_only(remote).len();
            debug!(
                local = local.len(),
                remote = remote.len(),
                dropped,
                "Reconciled whitelist with remote"
            );
        }
        local
    }

    /// Fetch the remote list, reconcile, and push the local list back.
    pub async fn sync_with_remote<R: WhitelistRemote>(
        &self,
        remote: &R,
        authenticated: bool,
    ) -> SyncOutcome {
        if !authenticated {
            debug!("Skipping whitelist sync, not authenticated");
            return SyncOutcome::Skipped;
        }

        let remote_list = match remote.fetch().await {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "Could not fetch remote whitelist");
                return SyncOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let dropped_remote = self.remote_only(&remote_list);
        let whitelist = self.reconcile_with_remote(&remote_list, true);
        let payload = WhitelistPayload {
            whitelist: whitelist.clone(),
        };
        if let Err(e) = remote.replace(&payload).await {
            warn!(error = %e, "Could not push whitelist to remote");
            return SyncOutcome::Failed {
                reason: e.to_string(),
            };
        }

        info!(
            entries = whitelist.len(),
            dropped = dropped_remote.len(),
            "Whitelist synced"
        );
        SyncOutcome::Synced {
            whitelist,
            dropped_remote,
        }
    }

    fn remote_only(&self, remote: &[String]) -> Vec<String> {
        let entries = self.entries.borrow();
        let mut seen = HashSet::new();
        remote
            .iter()
            .filter(|name| {
                let key = username_key(name);
                !entries.contains_key(&key) && seen.insert(key)
            })
            .cloned()
            .collect()
    }

    fn persist(&self) {
        let list = self.all();
        let outcome = self.records.put(WHITELIST_KEY, &list, self.max_age);
        if let Some(warning) = outcome.warning() {
            warn!(%warning, "Whitelist stored in a degraded tier");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FollowbackError;
    use crate::tiers::TierSelector;
    use std::cell::Cell;

    fn records() -> Rc<RecordStore> {
        Rc::new(RecordStore::new(TierSelector::memory_only(), "followback_"))
    }

    #[derive(Default)]
    struct FakeRemote {
        list: RefCell<Vec<String>>,
        fail_fetch: bool,
        pushes: Cell<usize>,
    }

    #[async_trait(?Send)]
    impl WhitelistRemote for FakeRemote {
        async fn fetch(&self) -> Result<Vec<String>> {
            if self.fail_fetch {
                return Err(FollowbackError::remote("HTTP 503"));
            }
            Ok(self.list.borrow().clone())
        }

        async fn replace(&self, payload: &WhitelistPayload) -> Result<()> {
            self.pushes.set(self.pushes.get() + 1);
            *self.list.borrow_mut() = payload.whitelist.clone();
            Ok(())
        }
    }

    #[test]
    fn test_toggle_is_involution() {
        let store = WhitelistStore::load(records(), DEFAULT_WHITELIST_MAX_AGE);
        assert!(store.toggle("carol"));
        assert!(store.is_whitelisted("carol"));
        assert!(!store.toggle("carol"));
        assert!(!store.is_whitelisted("carol"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_membership_ignores_case() {
        let store = WhitelistStore::load(records(), DEFAULT_WHITELIST_MAX_AGE);
        store.toggle("Carol");
        assert!(store.is_whitelisted("CAROL"));
        assert_eq!(store.all(), vec!["Carol".to_string()]);
        assert!(!store.toggle("carol"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_all_is_sorted() {
        let store = WhitelistStore::load(records(), DEFAULT_WHITELIST_MAX_AGE);
        for name in ["zed", "Amy", "kim"] {
            store.toggle(name);
        }
        assert_eq!(store.all(), vec!["Amy", "kim", "zed"]);
    }

    #[test]
    fn test_unusable_name_is_ignored() {
        let store = WhitelistStore::load(records(), DEFAULT_WHITELIST_MAX_AGE);
        assert!(!store.toggle("  <> "));
        assert!(store.is_empty());
    }

    #[test]
    fn test_persists_across_instances() {
        let shared = records();
        {
            let store = WhitelistStore::load(Rc::clone(&shared), DEFAULT_WHITELIST_MAX_AGE);
            store.toggle("carol");
            store.toggle("dave");
        }
        let reloaded = WhitelistStore::load(shared, DEFAULT_WHITELIST_MAX_AGE);
        assert_eq!(reloaded.all(), vec!["carol", "dave"]);
    }

    #[test]
    fn test_clear_persists() {
        let shared = records();
        let store = WhitelistStore::load(Rc::clone(&shared), DEFAULT_WHITELIST_MAX_AGE);
        store.toggle("carol");
        store.clear();
        assert!(store.all().is_empty());
        let reloaded = WhitelistStore::load(shared, DEFAULT_WHITELIST_MAX_AGE);
        assert!(reloaded.is_empty());
    }

    #[test]
    fn test_reconcile_keeps_local() {
        let store = WhitelistStore::load(records(), DEFAULT_WHITELIST_MAX_AGE);
        store.toggle("carol");
        let merged = store.reconcile_with_remote(&["dave".to_string(), "carol".to_string()], true);
        assert_eq!(merged, vec!["carol"]);
        assert!(!store.is_whitelisted("dave"));
    }

    #[test]
    fn test_reconcile_with_empty_local_drops_remote() {
        let store = WhitelistStore::load(records(), DEFAULT_WHITELIST_MAX_AGE);
        let merged = store.reconcile_with_remote(&["dave".to_string()], true);
        assert!(merged.is_empty());
    }

    #[tokio::test]
    async fn test_sync_pushes_local_list() {
        let store = WhitelistStore::load(records(), DEFAULT_WHITELIST_MAX_AGE);
        store.toggle("carol");
        let remote = FakeRemote {
            list: RefCell::new(vec!["dave".to_string(), "Dave".to_string()]),
            ..FakeRemote::default()
        };

        let outcome = store.sync_with_remote(&remote, true).await;
        assert_eq!(
            outcome,
            SyncOutcome::Synced {
                whitelist: vec!["carol".to_string()],
                dropped_remote: vec!["dave".to_string()],
            }
        );
        assert_eq!(*remote.list.borrow(), vec!["carol".to_string()]);
        assert_eq!(remote.pushes.get(), 1);
    }

    #[tokio::test]
    async fn test_sync_skipped_when_unauthenticated() {
        let store = WhitelistStore::load(records(), DEFAULT_WHITELIST_MAX_AGE);
        let remote = FakeRemote::default();
        assert_eq!(store.sync_with_remote(&remote, false).await, SyncOutcome::Skipped);
        assert_eq!(remote.pushes.get(), 0);
    }

    #[tokio::test]
    async fn test_sync_failure_is_reported() {
        let store = WhitelistStore::load(records(), DEFAULT_WHITELIST_MAX_AGE);
        store.toggle("carol");
        let remote = FakeRemote {
            fail_fetch: true,
            ..FakeRemote::default()
        };
        let outcome = store.sync_with_remote(&remote, true).await;
        assert!(matches!(outcome, SyncOutcome::Failed { ref reason } if reason.contains("503")));
        assert_eq!(remote.pushes.get(), 0);
        assert!(store.is_whitelisted("carol"));
    }
}
