//! Connection registry: the single source of truth for who is online.
//!
//! Guarded by a reader/writer lock. Every accessor hands out owned copies —
//! routing code iterates a [`snapshot`](ConnectionRegistry::snapshot) and
//! performs its transport writes with the lock already released, so one slow
//! or broken client can never stall delivery to the others.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use parley_shared::Profile;

use crate::transport::Transport;

/// One currently-known display name and its live write handle.
#[derive(Debug, Clone)]
pub struct Connection {
    pub name: String,
    pub transport: Transport,
    pub profile: Profile,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<String, Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` or replace its transport.
    ///
    /// Last login wins: a reconnect under the same name replaces the handle,
    /// never coexists with it. The profile survives the replacement.
    pub async fn upsert(&self, name: impl Into<String>, transport: Transport) {
        let name = name.into();
        let mut map = self.inner.write().await;
        match map.get_mut(&name) {
            Some(conn) => {
                debug!(name = %name, "Replacing transport for reconnected user");
                conn.transport = transport;
            }
            None => {
                map.insert(
                    name.clone(),
                    Connection {
                        name,
                        transport,
                        profile: Profile::default(),
                    },
                );
            }
        }
    }

    /// Current state for one name, as an owned copy.
    pub async fn lookup(&self, name: &str) -> Option<Connection> {
        self.inner.read().await.get(name).cloned()
    }

    /// Replace the profile in place, leaving the transport untouched.
    /// Returns false if the name is not registered.
    pub async fn update_profile(&self, name: &str, profile: Profile) -> bool {
        match self.inner.write().await.get_mut(name) {
            Some(conn) => {
                conn.profile = profile;
                true
            }
            None => false,
        }
    }

    /// Delete an entry. Removing an unknown name is a no-op.
    pub async fn remove(&self, name: &str) {
        if self.inner.write().await.remove(name).is_some() {
            debug!(name = %name, "Removed user from registry");
        }
    }

    /// Delete `name` only if its entry still holds `transport`'s connection.
    /// Returns whether an entry was removed: a closing connection whose name
    /// has since been re-registered must leave the successor in place.
    pub async fn remove_if_owner(&self, name: &str, transport: &Transport) -> bool {
        let mut map = self.inner.write().await;
        let owned = map
            .get(name)
            .is_some_and(|conn| conn.transport.same_channel(transport));
        if owned {
            map.remove(name);
            debug!(name = %name, "Removed user from registry");
        }
        owned
    }

    /// Owned copy of every entry, for fan-out outside the lock.
    pub async fn snapshot(&self) -> Vec<Connection> {
        self.inner.read().await.values().cloned().collect()
    }

    /// All registered display names, unordered.
    pub async fn names(&self) -> Vec<String> {
        self.inner.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_lookup_remove() {
        let registry = ConnectionRegistry::new();
        let (transport, _rx) = Transport::channel();

        assert!(registry.lookup("alice").await.is_none());

        registry.upsert("alice", transport).await;
        let conn = registry.lookup("alice").await.unwrap();
        assert_eq!(conn.name, "alice");
        assert_eq!(conn.profile, Profile::default());

        registry.remove("alice").await;
        assert!(registry.lookup("alice").await.is_none());

        // Idempotent.
        registry.remove("alice").await;
    }

    #[tokio::test]
    async fn test_last_login_wins_and_profile_survives() {
        let registry = ConnectionRegistry::new();

        let (first, _rx1) = Transport::channel();
        registry.upsert("alice", first).await;
        let profile = Profile {
            age: Some(30),
            gender: None,
        };
        assert!(registry.update_profile("alice", profile.clone()).await);

        let (second, mut rx2) = Transport::channel();
        registry.upsert("alice", second).await;

        let conn = registry.lookup("alice").await.unwrap();
        assert_eq!(conn.profile, profile);

        // Only the most recent transport is live.
        conn.transport.send_line("hi").unwrap();
        assert_eq!(rx2.try_recv().unwrap(), "hi");
        assert_eq!(registry.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_if_owner_spares_successor() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = Transport::channel();
        registry.upsert("alice", first.clone()).await;
        let (second, _rx2) = Transport::channel();
        registry.upsert("alice", second.clone()).await;

        // The replaced connection's teardown sees the newer registration.
        assert!(!registry.remove_if_owner("alice", &first).await);
        assert!(registry.lookup("alice").await.is_some());

        assert!(registry.remove_if_owner("alice", &second).await);
        assert!(registry.lookup("alice").await.is_none());
    }

    #[tokio::test]
    async fn test_update_profile_unknown_name() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.update_profile("ghost", Profile::default()).await);
    }
}
