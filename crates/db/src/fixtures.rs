use signoff_core::domain::action::ActionKind;
use signoff_core::domain::document::{ApprovalDocument, LevelSpec};
use signoff_core::domain::entity::EntityTypeTag;
use signoff_core::domain::group::{ApproverGroup, GroupId};
use signoff_core::domain::principal::{RoleId, TenantId, UserId};

use crate::connection::DbPool;
use crate::repositories::{
    RepositoryError, SqlDocumentRepository, SqlGroupRepository, SqlPrincipalDirectory,
};

pub const SEED_TENANT: &str = "t-demo";
pub const SEED_ENTITY_TYPE: &str = "purchase_order";
pub const SEED_DOCUMENT_ID: &str = "doc-po-create";

const SEED_PRINCIPALS: &[(&str, &str, &[&str])] = &[
    ("u-requester", "Rae Requester", &[]),
    ("u-fin-lead", "Fay Finance", &[]),
    ("u-cfo", "Cleo Chief", &["finance_exec"]),
    ("u-vp-ops", "Vik Ops", &["finance_exec"]),
    ("u-owner", "Olive Owner", &["owner"]),
];

/// Deterministic demo dataset: five principals, a direct-member finance
/// group, a role-derived executive group, an owner overrider group, and a
/// two-level document governing purchase order creation.
pub struct SeedSummary {
    pub tenant: TenantId,
    pub document_id: String,
    pub principal_count: usize,
    pub group_count: usize,
    pub level_count: usize,
}

pub async fn seed_demo_dataset(pool: &DbPool) -> Result<SeedSummary, RepositoryError> {
    let tenant = TenantId(SEED_TENANT.to_string());
    let directory = SqlPrincipalDirectory::new(pool.clone());

    for (id, name, roles) in SEED_PRINCIPALS {
        let user = UserId(id.to_string());
        directory.upsert_principal(&user, &tenant, name, true).await?;
        for role in *roles {
            directory.grant_role(&user, &RoleId(role.to_string())).await?;
        }
    }

    let groups = SqlGroupRepository::new(pool.clone());
    groups
        .save(&ApproverGroup::new(
            "g-finance",
            tenant.clone(),
            "Finance Review",
            vec![UserId("u-fin-lead".to_string())],
            vec![],
        ))
        .await?;
    groups
        .save(&ApproverGroup::new(
            "g-finance-exec",
            tenant.clone(),
            "Finance Executives",
            vec![],
            vec![RoleId("finance_exec".to_string())],
        ))
        .await?;
    groups
        .save(&ApproverGroup::new(
            "g-owner",
            tenant.clone(),
            "Owners",
            vec![],
            vec![RoleId("owner".to_string())],
        ))
        .await?;

    let documents = SqlDocumentRepository::new(pool.clone());
    let document = ApprovalDocument::new(
        SEED_DOCUMENT_ID,
        tenant.clone(),
        EntityTypeTag(SEED_ENTITY_TYPE.to_string()),
        "Purchase order creation review",
        [ActionKind::Create.code()],
    );
    let first = document
        .attach_level(
            &[],
            LevelSpec {
                level: None,
                approver_groups: vec![GroupId("g-finance".to_string())],
                overrider_groups: vec![],
            },
        )
        .map_err(|e| RepositoryError::Constraint(e.to_string()))?;
    let second = document
        .attach_level(
            std::slice::from_ref(&first),
            LevelSpec {
                level: None,
                approver_groups: vec![GroupId("g-finance-exec".to_string())],
                overrider_groups: vec![GroupId("g-owner".to_string())],
            },
        )
        .map_err(|e| RepositoryError::Constraint(e.to_string()))?;
    let levels = vec![first, second];
    documents.save(&document, &levels).await?;

    tracing::info!(
        event_name = "demo_dataset_seeded",
        tenant_id = SEED_TENANT,
        document_id = SEED_DOCUMENT_ID,
        principals = SEED_PRINCIPALS.len(),
    );

    Ok(SeedSummary {
        tenant,
        document_id: SEED_DOCUMENT_ID.to_string(),
        principal_count: SEED_PRINCIPALS.len(),
        group_count: 3,
        level_count: levels.len(),
    })
}

#[cfg(test)]
mod tests {
    use signoff_core::directory::PrincipalDirectory;
    use signoff_core::domain::action::ActionKind;
    use signoff_core::domain::entity::EntityTypeTag;
    use signoff_core::domain::principal::RoleId;
    use signoff_core::store::WorkflowStore;

    use super::{seed_demo_dataset, SEED_ENTITY_TYPE};
    use crate::connect_with_settings;
    use crate::migrations::run_pending;
    use crate::repositories::{SqlPrincipalDirectory, SqlWorkflowStore};

    #[tokio::test]
    async fn seeding_twice_is_idempotent() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrate");

        let first = seed_demo_dataset(&pool).await.expect("first seed");
        let second = seed_demo_dataset(&pool).await.expect("second seed");
        assert_eq!(first.principal_count, second.principal_count);

        let store = SqlWorkflowStore::new(pool.clone());
        let matched = store
            .matching_documents(
                &first.tenant,
                &EntityTypeTag(SEED_ENTITY_TYPE.to_string()),
                &ActionKind::Create.code(),
            )
            .await
            .expect("query");
        assert_eq!(matched.len(), 1);

        let levels =
            store.levels_for_document(&matched[0].id).await.expect("levels");
        assert_eq!(levels.len(), 2);

        let directory = SqlPrincipalDirectory::new(pool);
        let execs = directory
            .users_with_roles(&[RoleId("finance_exec".to_string())])
            .await
            .expect("role query");
        assert_eq!(execs.len(), 2);
    }
}
