//! Group registry: group name to member name set.
//!
//! Groups are created explicitly, never implicitly, and live for the whole
//! process — there is no leave or delete operation. Same snapshot-before-I/O
//! discipline as the connection registry.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GroupError {
    #[error("group {0} already exists")]
    AlreadyExists(String),
}

#[derive(Debug, Clone, Default)]
pub struct GroupRegistry {
    inner: Arc<RwLock<HashMap<String, HashSet<String>>>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a group with the creator as its sole member. A name collision
    /// leaves the existing group's membership untouched.
    pub async fn create(&self, name: impl Into<String>, creator: impl Into<String>) -> Result<(), GroupError> {
        let name = name.into();
        let mut map = self.inner.write().await;
        if map.contains_key(&name) {
            return Err(GroupError::AlreadyExists(name));
        }
        debug!(group = %name, "Created group");
        map.insert(name, HashSet::from([creator.into()]));
        Ok(())
    }

    /// Owned copy of a group's member set, or None if the group does not exist.
    pub async fn members(&self, name: &str) -> Option<HashSet<String>> {
        self.inner.read().await.get(name).cloned()
    }

    /// All group names, unordered.
    pub async fn names(&self) -> Vec<String> {
        self.inner.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_members() {
        let groups = GroupRegistry::new();
        assert!(groups.members("rustaceans").await.is_none());

        groups.create("rustaceans", "alice").await.unwrap();
        let members = groups.members("rustaceans").await.unwrap();
        assert_eq!(members, HashSet::from(["alice".to_string()]));
    }

    #[tokio::test]
    async fn test_duplicate_create_keeps_original_membership() {
        let groups = GroupRegistry::new();
        groups.create("rustaceans", "alice").await.unwrap();

        let err = groups.create("rustaceans", "bob").await.unwrap_err();
        assert_eq!(err, GroupError::AlreadyExists("rustaceans".to_string()));

        let members = groups.members("rustaceans").await.unwrap();
        assert!(members.contains("alice"));
        assert!(!members.contains("bob"));
    }
}
