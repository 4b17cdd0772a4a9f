use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::principal::{RoleId, UserId};
use crate::store::StoreError;

/// Answers "who is in this group right now". Membership is resolved live at
/// each question, never snapshotted, so role changes take effect on the next
/// pending level.
#[async_trait]
pub trait PrincipalDirectory: Send + Sync {
    /// Filters the given users down to the ones that are currently active.
    async fn active_users(&self, users: &[UserId]) -> Result<HashSet<UserId>, StoreError>;

    /// All active users holding at least one of the given roles.
    async fn users_with_roles(&self, roles: &[RoleId]) -> Result<HashSet<UserId>, StoreError>;
}

#[derive(Clone, Default)]
struct PrincipalRecord {
    active: bool,
    roles: HashSet<RoleId>,
}

/// Directory for tests and embedded use.
#[derive(Default)]
pub struct InMemoryDirectory {
    principals: RwLock<HashMap<UserId, PrincipalRecord>>,
}

impl InMemoryDirectory {
    pub async fn add_user(&self, user: UserId, roles: impl IntoIterator<Item = RoleId>) {
        let mut principals = self.principals.write().await;
        principals.insert(
            user,
            PrincipalRecord { active: true, roles: roles.into_iter().collect() },
        );
    }

    pub async fn deactivate(&self, user: &UserId) {
        let mut principals = self.principals.write().await;
        if let Some(record) = principals.get_mut(user) {
            record.active = false;
        }
    }

    pub async fn assign_role(&self, user: &UserId, role: RoleId) {
        let mut principals = self.principals.write().await;
        if let Some(record) = principals.get_mut(user) {
            record.roles.insert(role);
        }
    }

    pub async fn revoke_role(&self, user: &UserId, role: &RoleId) {
        let mut principals = self.principals.write().await;
        if let Some(record) = principals.get_mut(user) {
            record.roles.remove(role);
        }
    }
}

#[async_trait]
impl PrincipalDirectory for InMemoryDirectory {
    async fn active_users(&self, users: &[UserId]) -> Result<HashSet<UserId>, StoreError> {
        let principals = self.principals.read().await;
        Ok(users
            .iter()
            .filter(|user| principals.get(*user).is_some_and(|record| record.active))
            .cloned()
            .collect())
    }

    async fn users_with_roles(&self, roles: &[RoleId]) -> Result<HashSet<UserId>, StoreError> {
        let principals = self.principals.read().await;
        Ok(principals
            .iter()
            .filter(|(_, record)| {
                record.active && roles.iter().any(|role| record.roles.contains(role))
            })
            .map(|(user, _)| user.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::{InMemoryDirectory, PrincipalDirectory};
    use crate::domain::principal::{RoleId, UserId};

    fn user(id: &str) -> UserId {
        UserId(id.to_string())
    }

    fn role(id: &str) -> RoleId {
        RoleId(id.to_string())
    }

    #[tokio::test]
    async fn inactive_users_are_filtered_out() {
        let directory = InMemoryDirectory::default();
        directory.add_user(user("u-1"), []).await;
        directory.add_user(user("u-2"), []).await;
        directory.deactivate(&user("u-2")).await;

        let active = directory
            .active_users(&[user("u-1"), user("u-2"), user("u-ghost")])
            .await
            .expect("active users");
        assert_eq!(active.len(), 1);
        assert!(active.contains(&user("u-1")));
    }

    #[tokio::test]
    async fn role_membership_reflects_later_grants() {
        let directory = InMemoryDirectory::default();
        directory.add_user(user("u-1"), [role("finance")]).await;
        directory.add_user(user("u-2"), []).await;

        let before = directory.users_with_roles(&[role("finance")]).await.expect("query");
        assert_eq!(before.len(), 1);

        directory.assign_role(&user("u-2"), role("finance")).await;
        let after = directory.users_with_roles(&[role("finance")]).await.expect("query");
        assert_eq!(after.len(), 2);

        directory.revoke_role(&user("u-1"), &role("finance")).await;
        let revoked = directory.users_with_roles(&[role("finance")]).await.expect("query");
        assert_eq!(revoked.len(), 1);
        assert!(revoked.contains(&user("u-2")));
    }
}
