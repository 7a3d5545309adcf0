//! Automation actor resolution.
//!
//! Automated incidents and timeline entries are credited to a system identity,
//! never to a human caller.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error};

use crate::error::WebhookError;
use crate::models::User;

/// User lookups the resolver needs.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Find a user by id.
    async fn find_user(&self, id: &str) -> Option<User>;

    /// Administrators in directory order.
    async fn list_admins(&self) -> Vec<User>;
}

/// In-process [`UserDirectory`] seeded from configuration.
#[derive(Debug, Default)]
pub struct StaticUserDirectory {
    users: RwLock<HashMap<String, User>>,
    admin_order: RwLock<Vec<String>>,
}

impl StaticUserDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a directory with an optional active system user and active admins.
    pub async fn seeded(system_user_id: Option<&str>, admin_ids: &[String]) -> Self {
        let directory = Self::new();
        if let Some(id) = system_user_id {
            directory
                .upsert(User {
                    id: id.to_string(),
                    active: true,
                    admin: false,
                })
                .await;
        }
        for id in admin_ids {
            directory
                .upsert(User {
                    id: id.clone(),
                    active: true,
                    admin: true,
                })
                .await;
        }
        directory
    }

    /// Insert or replace a user. New admins are appended to the admin order.
    pub async fn upsert(&self, user: User) {
        if user.admin {
            let mut order = self.admin_order.write().await;
            if !order.contains(&user.id) {
                order.push(user.id.clone());
            }
        }
        self.users.write().await.insert(user.id.clone(), user);
    }
}

#[async_trait]
impl UserDirectory for StaticUserDirectory {
    async fn find_user(&self, id: &str) -> Option<User> {
        self.users.read().await.get(id).cloned()
    }

    async fn list_admins(&self) -> Vec<User> {
        let order = self.admin_order.read().await;
        let users = self.users.read().await;
        order
            .iter()
            .filter_map(|id| users.get(id))
            .filter(|u| u.admin)
            .cloned()
            .collect()
    }
}

/// Picks the author of automated records.
#[derive(Clone)]
pub struct ActorResolver {
    system_user_id: Option<String>,
    directory: Arc<dyn UserDirectory>,
}

impl ActorResolver {
    /// Create a resolver.
    #[must_use]
    pub fn new(system_user_id: Option<String>, directory: Arc<dyn UserDirectory>) -> Self {
        Self {
            system_user_id,
            directory,
        }
    }

    /// Resolve the automation actor id.
    ///
    /// The configured system user wins when it exists and is active; otherwise
    /// the first active admin is used.
    pub async fn resolve(&self) -> Result<String, WebhookError> {
        if let Some(id) = &self.system_user_id {
            match self.directory.find_user(id).await {
                Some(user) if user.active => return Ok(user.id),
                Some(_) => debug!(user_id = %id, "Configured system user is inactive"),
                None => debug!(user_id = %id, "Configured system user not found"),
            }
        }

        if let Some(admin) = self
            .directory
            .list_admins()
            .await
            .into_iter()
            .find(|u| u.active)
        {
            return Ok(admin.id);
        }

        error!(
            system_user_id = ?self.system_user_id,
            "No active system user or admin available to author automated incidents"
        );
        Err(WebhookError::ActorUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, active: bool, admin: bool) -> User {
        User {
            id: id.to_string(),
            active,
            admin,
        }
    }

    #[tokio::test]
    async fn test_active_system_user_wins() {
        let directory = StaticUserDirectory::seeded(Some("system"), &["admin-1".to_string()]).await;
        let resolver = ActorResolver::new(Some("system".to_string()), Arc::new(directory));
        assert_eq!(resolver.resolve().await.unwrap(), "system");
    }

    #[tokio::test]
    async fn test_falls_back_to_first_active_admin() {
        let directory = StaticUserDirectory::new();
        directory.upsert(user("system", false, false)).await;
        directory.upsert(user("admin-1", false, true)).await;
        directory.upsert(user("admin-2", true, true)).await;
        directory.upsert(user("admin-3", true, true)).await;

        let resolver = ActorResolver::new(Some("system".to_string()), Arc::new(directory));
        assert_eq!(resolver.resolve().await.unwrap(), "admin-2");

        let unknown = StaticUserDirectory::seeded(None, &["admin-9".to_string()]).await;
        let resolver = ActorResolver::new(Some("ghost".to_string()), Arc::new(unknown));
        assert_eq!(resolver.resolve().await.unwrap(), "admin-9");
    }

    #[tokio::test]
    async fn test_unavailable_when_nothing_resolves() {
        let directory = StaticUserDirectory::new();
        directory.upsert(user("admin-1", false, true)).await;
        let resolver = ActorResolver::new(None, Arc::new(directory));
        assert!(matches!(
            resolver.resolve().await,
            Err(WebhookError::ActorUnavailable)
        ));
    }
}
