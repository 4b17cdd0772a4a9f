use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::principal::{RoleId, TenantId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId(pub String);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tenant-scoped named set of principals. Effective membership is the union
/// of direct member users and all users holding any member role; resolution
/// happens through the principal directory so inactive users drop out.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverGroup {
    pub id: GroupId,
    pub tenant_id: TenantId,
    pub name: String,
    pub member_users: Vec<UserId>,
    pub member_roles: Vec<RoleId>,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApproverGroup {
    pub fn new(
        id: impl Into<String>,
        tenant_id: TenantId,
        name: impl Into<String>,
        member_users: Vec<UserId>,
        member_roles: Vec<RoleId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: GroupId(id.into()),
            tenant_id,
            name: name.into(),
            member_users,
            member_roles,
            deleted: false,
            created_at: now,
            updated_at: now,
        }
    }
}
