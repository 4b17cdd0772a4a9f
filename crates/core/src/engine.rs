use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;

use crate::directory::PrincipalDirectory;
use crate::domain::action::{ActionCode, ActionKind};
use crate::domain::approval::{Approval, ApprovalTask, TaskId, TaskStatus};
use crate::domain::document::ApprovalDocument;
use crate::domain::entity::{EntityTypeTag, GovernedEntity};
use crate::domain::group::GroupId;
use crate::domain::principal::{TenantId, UserId};
use crate::errors::EngineError;
use crate::notify::{NotificationIntent, NotificationOutbox, NotificationSink};
use crate::registry::EntityRegistry;
use crate::run::{ApprovalRun, Verdict};
use crate::store::{DecisionRecord, StoreError, WorkflowStore};

/// Result of a lifecycle transition entry point. When no document governs
/// the transition the approval is synthetic and was never persisted.
#[derive(Clone, Debug)]
pub struct TransitionOutcome {
    pub approval: Approval,
    pub bypassed: bool,
}

/// Result of one decision, after its writes committed.
#[derive(Clone, Debug)]
pub struct DecisionOutcome {
    pub approval: Approval,
    pub task: ApprovalTask,
    pub unlocked: Option<ApprovalTask>,
    pub terminated: Vec<TaskId>,
}

/// Drives entity lifecycle transitions through their configured approval
/// documents and applies approver decisions level by level.
pub struct WorkflowEngine<S, D, R, N> {
    store: Arc<S>,
    directory: Arc<D>,
    registry: Arc<R>,
    notifications: Arc<N>,
}

impl<S, D, R, N> WorkflowEngine<S, D, R, N>
where
    S: WorkflowStore,
    D: PrincipalDirectory,
    R: EntityRegistry,
    N: NotificationSink,
{
    pub fn new(store: Arc<S>, directory: Arc<D>, registry: Arc<R>, notifications: Arc<N>) -> Self {
        Self { store, directory, registry, notifications }
    }

    pub async fn confirm_create(
        &self,
        entity: &mut (impl GovernedEntity + ?Sized),
        requested_by: &UserId,
    ) -> Result<TransitionOutcome, EngineError> {
        self.confirm(entity, ActionKind::Create, requested_by).await
    }

    pub async fn confirm_update(
        &self,
        entity: &mut (impl GovernedEntity + ?Sized),
        requested_by: &UserId,
    ) -> Result<TransitionOutcome, EngineError> {
        self.confirm(entity, ActionKind::Update, requested_by).await
    }

    pub async fn confirm_delete(
        &self,
        entity: &mut (impl GovernedEntity + ?Sized),
        requested_by: &UserId,
    ) -> Result<TransitionOutcome, EngineError> {
        self.confirm(entity, ActionKind::Delete, requested_by).await
    }

    pub async fn approve(
        &self,
        task_id: &TaskId,
        actor: &UserId,
        comment: Option<String>,
    ) -> Result<DecisionOutcome, EngineError> {
        self.decide(task_id, Verdict::Approve, actor, comment).await
    }

    pub async fn reject(
        &self,
        task_id: &TaskId,
        actor: &UserId,
        comment: Option<String>,
    ) -> Result<DecisionOutcome, EngineError> {
        self.decide(task_id, Verdict::Reject, actor, comment).await
    }

    pub async fn override_task(
        &self,
        task_id: &TaskId,
        actor: &UserId,
        comment: Option<String>,
    ) -> Result<DecisionOutcome, EngineError> {
        self.decide(task_id, Verdict::Override, actor, comment).await
    }

    /// The document governing one action for one tenant and entity type.
    /// `None` means the transition bypasses approval entirely. More than one
    /// match is a configuration fault and is reported, never tie-broken.
    pub async fn resolve_document(
        &self,
        tenant: &TenantId,
        entity_type: &EntityTypeTag,
        action: &ActionCode,
    ) -> Result<Option<ApprovalDocument>, EngineError> {
        let mut matches = self.store.matching_documents(tenant, entity_type, action).await?;
        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop()),
            count => Err(EngineError::AmbiguousDocument {
                tenant: tenant.clone(),
                entity_type: entity_type.clone(),
                action: action.clone(),
                matches: count,
            }),
        }
    }

    async fn confirm(
        &self,
        entity: &mut (impl GovernedEntity + ?Sized),
        kind: ActionKind,
        requested_by: &UserId,
    ) -> Result<TransitionOutcome, EngineError> {
        let expected = kind.expected_lifecycle();
        if entity.lifecycle() != expected {
            return Err(EngineError::LifecycleMismatch {
                expected,
                actual: entity.lifecycle(),
            });
        }

        let target = entity.entity_ref();
        let tenant = entity
            .tenant_id()
            .ok_or_else(|| EngineError::TenantUnresolved { entity: target.clone() })?;
        let action = kind.code();

        // A second confirmation without an intervening settle must fail
        // loudly instead of stacking a second run on the entity.
        if let Some(existing) = self.store.ongoing_approval_for(&target).await? {
            return Err(EngineError::ApprovalAlreadyOngoing {
                target: target.clone(),
                approval: existing.id,
            });
        }

        let Some(document) =
            self.resolve_document(&tenant, &target.entity_type, &action).await?
        else {
            // No matching document: the transition succeeds immediately and
            // the terminal hook still fires, with a synthetic approval.
            entity.set_lifecycle(kind.bypass_lifecycle());
            let approval =
                Approval::synthetic_completed(action, target.clone(), requested_by.clone());
            entity.finish_workflow(&approval);
            tracing::info!(
                event_name = "transition_bypassed",
                tenant_id = %tenant,
                target = %target,
                action = %approval.action,
            );
            return Ok(TransitionOutcome { approval, bypassed: true });
        };

        let levels = self.store.levels_for_document(&document.id).await?;
        let run = ApprovalRun::start(
            &document,
            &levels,
            action,
            target.clone(),
            requested_by.clone(),
            Utc::now(),
        )?;

        let mut outbox = NotificationOutbox::default();
        if let Some(first) = run.first_task() {
            let level = levels
                .iter()
                .find(|level| level.id == first.level_id)
                .ok_or_else(|| StoreError::Missing {
                    kind: "level",
                    id: first.level_id.0.clone(),
                })?;
            let message = format!("Approval requested for {}", entity.display_name());
            self.queue_for_members(&mut outbox, &level.approver_groups, &message, &target).await?;
        }

        self.store.insert_run(&run).await?;
        tracing::info!(
            event_name = "approval_started",
            tenant_id = %tenant,
            document_id = %document.id,
            approval_id = %run.approval.id,
            target = %target,
            action = %run.approval.action,
            levels = run.tasks.len(),
        );
        outbox.flush(self.notifications.as_ref());

        Ok(TransitionOutcome { approval: run.approval, bypassed: false })
    }

    async fn decide(
        &self,
        task_id: &TaskId,
        verdict: Verdict,
        actor: &UserId,
        comment: Option<String>,
    ) -> Result<DecisionOutcome, EngineError> {
        let task = self
            .store
            .find_task(task_id)
            .await?
            .ok_or_else(|| EngineError::NotFound { kind: "task", id: task_id.0.clone() })?;
        if task.status != TaskStatus::Pending {
            return Err(EngineError::TaskNotActionable { task: task_id.clone(), status: task.status });
        }

        let approval = self.store.find_approval(&task.approval_id).await?.ok_or_else(|| {
            EngineError::NotFound { kind: "approval", id: task.approval_id.0.clone() }
        })?;
        if approval.status.is_settled() {
            return Err(EngineError::RunSettled {
                approval: approval.id.clone(),
                status: approval.status,
            });
        }

        let level = self.store.find_level(&task.level_id).await?.ok_or_else(|| {
            EngineError::NotFound { kind: "level", id: task.level_id.0.clone() }
        })?;

        // Approvers and overriders are disjoint populations by document
        // construction; each verdict is authorized against exactly one.
        let authorized_groups = match verdict {
            Verdict::Approve | Verdict::Reject => &level.approver_groups,
            Verdict::Override => &level.overrider_groups,
        };
        let members = self.level_members(authorized_groups).await?;
        if !members.contains(actor) {
            return Err(match verdict {
                Verdict::Approve | Verdict::Reject => EngineError::NotAnApprover {
                    user: actor.clone(),
                    task: task_id.clone(),
                },
                Verdict::Override => EngineError::NotAnOverrider {
                    user: actor.clone(),
                    task: task_id.clone(),
                },
            });
        }

        let tasks = self.store.tasks_for_approval(&approval.id).await?;
        let run = ApprovalRun { approval: approval.clone(), tasks };
        let outcome = run.decide(task_id, verdict, actor, comment, Utc::now())?;

        let record = DecisionRecord::from_outcome(approval.id.clone(), &outcome);
        self.store.commit_decision(&record).await.map_err(|error| match error {
            StoreError::Conflict => EngineError::DecisionConflict { task: task_id.clone() },
            other => EngineError::from(other),
        })?;

        let mut settled = approval.clone();
        settled.status = outcome.run_status;
        settled.updated_at = record.decided_at;

        let display = match self.registry.describe(&settled.target).await {
            Ok(name) => name,
            Err(_) => settled.target.to_string(),
        };

        let mut outbox = NotificationOutbox::default();
        if settled.status.is_settled() {
            // Decision committed first, so this fires exactly once per run.
            self.registry.finish_workflow(&settled.target, &settled).await?;
            let message = match outcome.run_status {
                crate::domain::approval::ApprovalStatus::Completed => {
                    format!("Approval for {display} completed")
                }
                _ => format!("Approval for {display} was rejected"),
            };
            outbox.push(NotificationIntent::new(
                settled.requested_by.clone(),
                message,
                settled.target.clone(),
            ));
            tracing::info!(
                event_name = "approval_settled",
                approval_id = %settled.id,
                status = ?settled.status,
                target = %settled.target,
            );
        } else if let Some(unlocked) = &outcome.unlocked_task {
            let next_level = self.store.find_level(&unlocked.level_id).await?.ok_or_else(|| {
                EngineError::NotFound { kind: "level", id: unlocked.level_id.0.clone() }
            })?;
            let message = format!("Approval requested for {display}");
            self.queue_for_members(&mut outbox, &next_level.approver_groups, &message, &settled.target)
                .await?;
        }

        tracing::info!(
            event_name = "task_decided",
            approval_id = %settled.id,
            task_id = %task_id,
            verdict = ?verdict,
            actor = %actor,
        );
        outbox.flush(self.notifications.as_ref());

        Ok(DecisionOutcome {
            approval: settled,
            task: outcome.decided_task,
            unlocked: outcome.unlocked_task,
            terminated: outcome.terminated_tasks.into_iter().map(|task| task.id).collect(),
        })
    }

    /// Live union of direct members and role-derived members across groups.
    /// Deactivated users drop out, newly granted roles drop in.
    async fn level_members(&self, groups: &[GroupId]) -> Result<HashSet<UserId>, EngineError> {
        let mut members = HashSet::new();
        for group in self.store.groups_by_ids(groups).await? {
            members.extend(self.directory.active_users(&group.member_users).await?);
            members.extend(self.directory.users_with_roles(&group.member_roles).await?);
        }
        Ok(members)
    }

    async fn queue_for_members(
        &self,
        outbox: &mut NotificationOutbox,
        groups: &[GroupId],
        message: &str,
        target: &crate::domain::entity::EntityRef,
    ) -> Result<(), EngineError> {
        let mut members: Vec<UserId> = self.level_members(groups).await?.into_iter().collect();
        members.sort();
        for member in members {
            outbox.push(NotificationIntent::new(member, message, target.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{DecisionOutcome, WorkflowEngine};
    use crate::directory::InMemoryDirectory;
    use crate::domain::action::ActionKind;
    use crate::domain::approval::{ApprovalStatus, TaskStatus};
    use crate::domain::document::{ApprovalDocument, ApprovalDocumentLevel, LevelSpec};
    use crate::domain::entity::{EntityRef, EntityTypeTag, GovernedEntity, LifecycleStatus};
    use crate::domain::group::{ApproverGroup, GroupId};
    use crate::domain::principal::{RoleId, TenantId, UserId};
    use crate::errors::{EngineError, ErrorCode};
    use crate::notify::InMemoryNotificationSink;
    use crate::registry::InMemoryEntityRegistry;
    use crate::store::{InMemoryWorkflowStore, WorkflowStore};

    #[derive(Clone)]
    struct Widget {
        id: String,
        tenant: Option<TenantId>,
        lifecycle: LifecycleStatus,
    }

    impl Widget {
        fn new(id: &str) -> Self {
            Self {
                id: id.to_string(),
                tenant: Some(TenantId("t-acme".to_string())),
                lifecycle: LifecycleStatus::UnderCreation,
            }
        }
    }

    impl GovernedEntity for Widget {
        fn tenant_id(&self) -> Option<TenantId> {
            self.tenant.clone()
        }

        fn entity_ref(&self) -> EntityRef {
            EntityRef::new("widget", self.id.clone())
        }

        fn lifecycle(&self) -> LifecycleStatus {
            self.lifecycle
        }

        fn set_lifecycle(&mut self, lifecycle: LifecycleStatus) {
            self.lifecycle = lifecycle;
        }

        fn display_name(&self) -> String {
            format!("Widget {}", self.id)
        }
    }

    struct Harness {
        engine: WorkflowEngine<
            InMemoryWorkflowStore,
            InMemoryDirectory,
            InMemoryEntityRegistry<Widget>,
            InMemoryNotificationSink,
        >,
        store: Arc<InMemoryWorkflowStore>,
        directory: Arc<InMemoryDirectory>,
        registry: Arc<InMemoryEntityRegistry<Widget>>,
        notifications: Arc<InMemoryNotificationSink>,
    }

    fn tenant() -> TenantId {
        TenantId("t-acme".to_string())
    }

    fn user(id: &str) -> UserId {
        UserId(id.to_string())
    }

    async fn harness() -> Harness {
        let store = Arc::new(InMemoryWorkflowStore::default());
        let directory = Arc::new(InMemoryDirectory::default());
        let registry = Arc::new(InMemoryEntityRegistry::default());
        let notifications = Arc::new(InMemoryNotificationSink::default());
        let engine = WorkflowEngine::new(
            Arc::clone(&store),
            Arc::clone(&directory),
            Arc::clone(&registry),
            Arc::clone(&notifications),
        );
        Harness { engine, store, directory, registry, notifications }
    }

    fn document_for(
        actions: impl IntoIterator<Item = ActionKind>,
        id: &str,
        level_groups: &[(&[&str], &[&str])],
    ) -> (ApprovalDocument, Vec<ApprovalDocumentLevel>) {
        let document = ApprovalDocument::new(
            id,
            tenant(),
            EntityTypeTag("widget".to_string()),
            "Widget governance",
            actions.into_iter().map(|kind| kind.code()),
        );
        let mut levels: Vec<ApprovalDocumentLevel> = Vec::new();
        for (approvers, overriders) in level_groups {
            let level = document
                .attach_level(
                    &levels,
                    LevelSpec {
                        level: None,
                        approver_groups: approvers
                            .iter()
                            .map(|id| GroupId(id.to_string()))
                            .collect(),
                        overrider_groups: overriders
                            .iter()
                            .map(|id| GroupId(id.to_string()))
                            .collect(),
                    },
                )
                .expect("attach level");
            levels.push(level);
        }
        (document, levels)
    }

    /// Two-level create document: level 1 approved by g-finance (direct
    /// member u-fin), level 2 approved by g-exec (role exec) with overrider
    /// group g-board (direct member u-board).
    async fn seed_two_level_create(harness: &Harness) {
        harness
            .store
            .put_group(ApproverGroup::new("g-finance", tenant(), "Finance", vec![user("u-fin")], vec![]))
            .await
            .expect("finance group");
        harness
            .store
            .put_group(ApproverGroup::new(
                "g-exec",
                tenant(),
                "Executives",
                vec![],
                vec![RoleId("exec".to_string())],
            ))
            .await
            .expect("exec group");
        harness
            .store
            .put_group(ApproverGroup::new("g-board", tenant(), "Board", vec![user("u-board")], vec![]))
            .await
            .expect("board group");

        let (document, levels) = document_for(
            [ActionKind::Create],
            "doc-create",
            &[(&["g-finance"], &[]), (&["g-exec"], &["g-board"])],
        );
        harness.store.put_document(document, levels).await.expect("document");

        harness.directory.add_user(user("u-fin"), []).await;
        harness.directory.add_user(user("u-exec"), [RoleId("exec".to_string())]).await;
        harness.directory.add_user(user("u-board"), []).await;
        harness.directory.add_user(user("u-req"), []).await;
    }

    async fn start_create(harness: &Harness) -> (Widget, crate::domain::approval::ApprovalId) {
        let mut widget = Widget::new("w-1");
        harness.registry.put(widget.clone()).await;
        let outcome = harness
            .engine
            .confirm_create(&mut widget, &user("u-req"))
            .await
            .expect("confirm create");
        assert!(!outcome.bypassed);
        harness.registry.put(widget.clone()).await;
        (widget, outcome.approval.id)
    }

    async fn pending_task(
        harness: &Harness,
        approval: &crate::domain::approval::ApprovalId,
    ) -> crate::domain::approval::ApprovalTask {
        harness
            .store
            .tasks_for_approval(approval)
            .await
            .expect("tasks")
            .into_iter()
            .find(|task| task.status == TaskStatus::Pending)
            .expect("a pending task")
    }

    #[tokio::test]
    async fn full_chain_approval_activates_the_entity() {
        let harness = harness().await;
        seed_two_level_create(&harness).await;
        let (widget, approval_id) = start_create(&harness).await;
        assert_eq!(widget.lifecycle, LifecycleStatus::UnderCreation);

        let first = pending_task(&harness, &approval_id).await;
        let outcome = harness
            .engine
            .approve(&first.id, &user("u-fin"), Some("looks good".to_string()))
            .await
            .expect("first approval");
        assert_eq!(outcome.approval.status, ApprovalStatus::Ongoing);
        let unlocked = outcome.unlocked.expect("second level unlocked");
        assert_eq!(unlocked.level, 2);

        let outcome = harness
            .engine
            .approve(&unlocked.id, &user("u-exec"), None)
            .await
            .expect("final approval");
        assert_eq!(outcome.approval.status, ApprovalStatus::Completed);
        assert!(outcome.unlocked.is_none());

        let settled = harness
            .registry
            .get(&EntityRef::new("widget", "w-1"))
            .await
            .expect("widget stored");
        assert_eq!(settled.lifecycle, LifecycleStatus::Active);
    }

    #[tokio::test]
    async fn rejection_terminates_remaining_levels_and_deletes_the_draft() {
        let harness = harness().await;
        seed_two_level_create(&harness).await;
        let (_, approval_id) = start_create(&harness).await;

        let first = pending_task(&harness, &approval_id).await;
        let outcome = harness
            .engine
            .reject(&first.id, &user("u-fin"), Some("not budgeted".to_string()))
            .await
            .expect("rejection");
        assert_eq!(outcome.approval.status, ApprovalStatus::Rejected);
        assert_eq!(outcome.terminated.len(), 1);

        let tasks = harness.store.tasks_for_approval(&approval_id).await.expect("tasks");
        assert!(tasks
            .iter()
            .all(|task| matches!(task.status, TaskStatus::Rejected | TaskStatus::Terminated)));

        let widget = harness
            .registry
            .get(&EntityRef::new("widget", "w-1"))
            .await
            .expect("widget stored");
        assert_eq!(widget.lifecycle, LifecycleStatus::Deleted);
    }

    #[tokio::test]
    async fn override_completes_the_run_and_terminates_siblings() {
        let harness = harness().await;
        seed_two_level_create(&harness).await;
        let (_, approval_id) = start_create(&harness).await;

        let first = pending_task(&harness, &approval_id).await;
        harness.engine.approve(&first.id, &user("u-fin"), None).await.expect("unlock level 2");
        let second = pending_task(&harness, &approval_id).await;

        let outcome = harness
            .engine
            .override_task(&second.id, &user("u-board"), Some("board mandate".to_string()))
            .await
            .expect("override");
        assert_eq!(outcome.approval.status, ApprovalStatus::Completed);
        assert_eq!(outcome.task.status, TaskStatus::Overridden);

        let widget = harness
            .registry
            .get(&EntityRef::new("widget", "w-1"))
            .await
            .expect("widget stored");
        assert_eq!(widget.lifecycle, LifecycleStatus::Active);
    }

    #[tokio::test]
    async fn approver_and_overrider_populations_are_checked_separately() {
        let harness = harness().await;
        seed_two_level_create(&harness).await;
        let (_, approval_id) = start_create(&harness).await;

        let first = pending_task(&harness, &approval_id).await;
        harness.engine.approve(&first.id, &user("u-fin"), None).await.expect("unlock level 2");
        let second = pending_task(&harness, &approval_id).await;

        // The level 2 approver may not override, the overrider may not approve.
        let error = harness
            .engine
            .override_task(&second.id, &user("u-exec"), None)
            .await
            .expect_err("approver cannot override");
        assert_eq!(error.code(), ErrorCode::PermissionDenied);
        assert!(matches!(error, EngineError::NotAnOverrider { .. }));

        let error = harness
            .engine
            .approve(&second.id, &user("u-board"), None)
            .await
            .expect_err("overrider cannot approve");
        assert_eq!(error.code(), ErrorCode::PermissionDenied);
        assert!(matches!(error, EngineError::NotAnApprover { .. }));

        let error = harness
            .engine
            .approve(&second.id, &user("u-stranger"), None)
            .await
            .expect_err("stranger cannot approve");
        assert_eq!(error.code(), ErrorCode::PermissionDenied);
    }

    #[tokio::test]
    async fn unmatched_transition_bypasses_approval() {
        let harness = harness().await;
        // No document governs update, only create.
        seed_two_level_create(&harness).await;

        let mut widget = Widget::new("w-2");
        widget.lifecycle = LifecycleStatus::UnderUpdate;
        harness.registry.put(widget.clone()).await;

        let outcome = harness
            .engine
            .confirm_update(&mut widget, &user("u-req"))
            .await
            .expect("bypass");
        assert!(outcome.bypassed);
        assert!(outcome.approval.document_id.is_none());
        assert_eq!(outcome.approval.status, ApprovalStatus::Completed);
        assert_eq!(widget.lifecycle, LifecycleStatus::Active);
        assert_eq!(harness.store.approval_count().await, 0);
        assert!(harness.notifications.sent().is_empty());
    }

    #[tokio::test]
    async fn membership_is_resolved_live_at_each_level() {
        let harness = harness().await;
        seed_two_level_create(&harness).await;
        let (_, approval_id) = start_create(&harness).await;

        let first = pending_task(&harness, &approval_id).await;
        harness.engine.approve(&first.id, &user("u-fin"), None).await.expect("unlock level 2");
        let second = pending_task(&harness, &approval_id).await;

        // The exec role moved between users after the run started.
        harness.directory.revoke_role(&user("u-exec"), &RoleId("exec".to_string())).await;
        harness.directory.add_user(user("u-new-exec"), [RoleId("exec".to_string())]).await;

        let error = harness
            .engine
            .approve(&second.id, &user("u-exec"), None)
            .await
            .expect_err("revoked role no longer approves");
        assert_eq!(error.code(), ErrorCode::PermissionDenied);

        let outcome = harness
            .engine
            .approve(&second.id, &user("u-new-exec"), None)
            .await
            .expect("new role holder approves");
        assert_eq!(outcome.approval.status, ApprovalStatus::Completed);
    }

    #[tokio::test]
    async fn decided_tasks_cannot_be_decided_again() {
        let harness = harness().await;
        seed_two_level_create(&harness).await;
        let (_, approval_id) = start_create(&harness).await;

        let first = pending_task(&harness, &approval_id).await;
        harness.engine.approve(&first.id, &user("u-fin"), None).await.expect("first decision");

        let error = harness
            .engine
            .reject(&first.id, &user("u-fin"), None)
            .await
            .expect_err("task already approved");
        assert_eq!(error.code(), ErrorCode::InvalidState);
        assert!(matches!(error, EngineError::TaskNotActionable { .. }));
    }

    #[tokio::test]
    async fn not_started_tasks_are_not_actionable() {
        let harness = harness().await;
        seed_two_level_create(&harness).await;
        let (_, approval_id) = start_create(&harness).await;

        let locked = harness
            .store
            .tasks_for_approval(&approval_id)
            .await
            .expect("tasks")
            .into_iter()
            .find(|task| task.status == TaskStatus::NotStarted)
            .expect("a locked task");

        let error = harness
            .engine
            .approve(&locked.id, &user("u-exec"), None)
            .await
            .expect_err("level 2 is still locked");
        assert_eq!(error.code(), ErrorCode::InvalidState);
    }

    #[tokio::test]
    async fn lifecycle_gate_rejects_wrong_entry_point() {
        let harness = harness().await;
        seed_two_level_create(&harness).await;

        let mut widget = Widget::new("w-3");
        widget.lifecycle = LifecycleStatus::Active;
        let error = harness
            .engine
            .confirm_create(&mut widget, &user("u-req"))
            .await
            .expect_err("active entity cannot re-enter creation");
        assert_eq!(
            error,
            EngineError::LifecycleMismatch {
                expected: LifecycleStatus::UnderCreation,
                actual: LifecycleStatus::Active,
            }
        );
    }

    #[tokio::test]
    async fn missing_tenant_is_a_configuration_error() {
        let harness = harness().await;
        let mut widget = Widget::new("w-4");
        widget.tenant = None;

        let error = harness
            .engine
            .confirm_create(&mut widget, &user("u-req"))
            .await
            .expect_err("tenant is required");
        assert_eq!(error.code(), ErrorCode::Configuration);
        assert!(matches!(error, EngineError::TenantUnresolved { .. }));
        // The lifecycle is untouched on failure.
        assert_eq!(widget.lifecycle, LifecycleStatus::UnderCreation);
    }

    #[tokio::test]
    async fn overlapping_documents_are_reported_not_tie_broken() {
        let harness = harness().await;
        harness
            .store
            .put_group(ApproverGroup::new("g-1", tenant(), "Finance", vec![user("u-fin")], vec![]))
            .await
            .expect("group");

        let (first, levels) =
            document_for([ActionKind::Create], "doc-a", &[(&["g-1"], &[])]);
        harness.store.put_document(first, levels).await.expect("first document");
        let (second, levels) =
            document_for([ActionKind::Create, ActionKind::Delete], "doc-b", &[(&["g-1"], &[])]);
        harness.store.put_document(second, levels).await.expect("second document");

        let mut widget = Widget::new("w-5");
        let error = harness
            .engine
            .confirm_create(&mut widget, &user("u-req"))
            .await
            .expect_err("two documents govern create");
        assert_eq!(error.code(), ErrorCode::Configuration);
        assert!(matches!(error, EngineError::AmbiguousDocument { matches: 2, .. }));
    }

    #[tokio::test]
    async fn repeated_confirmation_does_not_stack_a_second_run() {
        let harness = harness().await;
        seed_two_level_create(&harness).await;
        let (mut widget, approval_id) = start_create(&harness).await;

        let error = harness
            .engine
            .confirm_create(&mut widget, &user("u-req"))
            .await
            .expect_err("a run is already ongoing for the entity");
        assert_eq!(error.code(), ErrorCode::InvalidState);
        assert!(matches!(
            error,
            EngineError::ApprovalAlreadyOngoing { ref approval, .. } if *approval == approval_id
        ));
        assert_eq!(harness.store.approval_count().await, 1);
        assert_eq!(widget.lifecycle, LifecycleStatus::UnderCreation);
    }

    #[tokio::test]
    async fn documents_without_levels_are_a_configuration_error() {
        let harness = harness().await;
        let (document, _) = document_for([ActionKind::Create], "doc-empty", &[]);
        harness.store.put_document(document, Vec::new()).await.expect("document");

        let mut widget = Widget::new("w-9");
        let error = harness
            .engine
            .confirm_create(&mut widget, &user("u-req"))
            .await
            .expect_err("a document with no levels cannot start a run");
        assert_eq!(error.code(), ErrorCode::Configuration);
        assert!(matches!(error, EngineError::DocumentWithoutLevels { .. }));
        assert_eq!(widget.lifecycle, LifecycleStatus::UnderCreation);
        assert_eq!(harness.store.approval_count().await, 0);
        assert!(harness.notifications.sent().is_empty());
    }

    #[tokio::test]
    async fn notifications_reach_each_pending_level_and_the_requester() {
        let harness = harness().await;
        seed_two_level_create(&harness).await;
        let (_, approval_id) = start_create(&harness).await;

        let sent = harness.notifications.sent();
        assert_eq!(sent.len(), 1, "level 1 has one member");
        assert_eq!(sent[0].user_id, user("u-fin"));
        assert!(sent[0].message.contains("Widget w-1"));

        let first = pending_task(&harness, &approval_id).await;
        harness.engine.approve(&first.id, &user("u-fin"), None).await.expect("unlock level 2");
        let sent = harness.notifications.sent();
        assert_eq!(sent.len(), 2, "level 2 member notified");
        assert_eq!(sent[1].user_id, user("u-exec"));

        let second = pending_task(&harness, &approval_id).await;
        harness.engine.approve(&second.id, &user("u-exec"), None).await.expect("complete");
        let sent = harness.notifications.sent();
        assert_eq!(sent.len(), 3, "requester notified of completion");
        assert_eq!(sent[2].user_id, user("u-req"));
        assert!(sent[2].message.contains("completed"));
    }

    #[tokio::test]
    async fn deactivated_direct_members_lose_authorization() {
        let harness = harness().await;
        seed_two_level_create(&harness).await;
        let (_, approval_id) = start_create(&harness).await;

        harness.directory.deactivate(&user("u-fin")).await;
        let first = pending_task(&harness, &approval_id).await;
        let error = harness
            .engine
            .approve(&first.id, &user("u-fin"), None)
            .await
            .expect_err("deactivated user");
        assert_eq!(error.code(), ErrorCode::PermissionDenied);
    }

    #[tokio::test]
    async fn delete_flow_settles_to_deleted_on_completion() {
        let harness = harness().await;
        harness
            .store
            .put_group(ApproverGroup::new("g-1", tenant(), "Finance", vec![user("u-fin")], vec![]))
            .await
            .expect("group");
        let (document, levels) =
            document_for([ActionKind::Delete], "doc-delete", &[(&["g-1"], &[])]);
        harness.store.put_document(document, levels).await.expect("document");
        harness.directory.add_user(user("u-fin"), []).await;

        let mut widget = Widget::new("w-6");
        widget.lifecycle = LifecycleStatus::UnderDeletion;
        harness.registry.put(widget.clone()).await;
        let outcome = harness
            .engine
            .confirm_delete(&mut widget, &user("u-req"))
            .await
            .expect("confirm delete");
        assert!(!outcome.bypassed);
        // Still transitional while the run is ongoing.
        assert_eq!(widget.lifecycle, LifecycleStatus::UnderDeletion);
        harness.registry.put(widget.clone()).await;

        let task = pending_task(&harness, &outcome.approval.id).await;
        let DecisionOutcome { approval, .. } = harness
            .engine
            .approve(&task.id, &user("u-fin"), None)
            .await
            .expect("approve deletion");
        assert_eq!(approval.status, ApprovalStatus::Completed);

        let widget = harness
            .registry
            .get(&EntityRef::new("widget", "w-6"))
            .await
            .expect("widget stored");
        assert_eq!(widget.lifecycle, LifecycleStatus::Deleted);
    }

    #[tokio::test]
    async fn rejected_delete_restores_the_entity() {
        let harness = harness().await;
        harness
            .store
            .put_group(ApproverGroup::new("g-1", tenant(), "Finance", vec![user("u-fin")], vec![]))
            .await
            .expect("group");
        let (document, levels) =
            document_for([ActionKind::Delete], "doc-delete", &[(&["g-1"], &[])]);
        harness.store.put_document(document, levels).await.expect("document");
        harness.directory.add_user(user("u-fin"), []).await;

        let mut widget = Widget::new("w-7");
        widget.lifecycle = LifecycleStatus::UnderDeletion;
        harness.registry.put(widget.clone()).await;
        let outcome = harness
            .engine
            .confirm_delete(&mut widget, &user("u-req"))
            .await
            .expect("confirm delete");

        let task = pending_task(&harness, &outcome.approval.id).await;
        harness
            .engine
            .reject(&task.id, &user("u-fin"), Some("still referenced".to_string()))
            .await
            .expect("reject deletion");

        let widget = harness
            .registry
            .get(&EntityRef::new("widget", "w-7"))
            .await
            .expect("widget stored");
        assert_eq!(widget.lifecycle, LifecycleStatus::Active);
    }
}
