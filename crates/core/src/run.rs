use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::action::ActionCode;
use crate::domain::approval::{
    Approval, ApprovalId, ApprovalStatus, ApprovalTask, TaskId, TaskStatus,
};
use crate::domain::document::{ApprovalDocument, ApprovalDocumentLevel, DocumentId};
use crate::domain::entity::EntityRef;
use crate::domain::principal::UserId;

/// One workflow run loaded as an aggregate: the approval plus its tasks,
/// ordered by level. All cascade rules live here as pure transitions; the
/// engine layers authorization and persistence on top.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApprovalRun {
    pub approval: Approval,
    pub tasks: Vec<ApprovalTask>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Approve,
    Reject,
    Override,
}

/// Effect of one decision: the decided task, any next-level task unlocked to
/// pending, any siblings forced to terminated, and the resulting run status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CascadeOutcome {
    pub decided_task: ApprovalTask,
    pub unlocked_task: Option<ApprovalTask>,
    pub terminated_tasks: Vec<ApprovalTask>,
    pub run_status: ApprovalStatus,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CascadeError {
    #[error("task `{task}` is {status:?}, expected pending")]
    TaskNotPending { task: TaskId, status: TaskStatus },
    #[error("approval `{approval}` already settled as {status:?}")]
    RunSettled { approval: ApprovalId, status: ApprovalStatus },
    #[error("approval document `{document}` has no levels")]
    NoLevels { document: DocumentId },
    #[error("task `{task}` does not belong to this run")]
    UnknownTask { task: TaskId },
}

impl ApprovalRun {
    /// Creates a fresh ongoing run for a governing document: one task per
    /// level, lowest level pending, the rest not started.
    pub fn start(
        document: &ApprovalDocument,
        levels: &[ApprovalDocumentLevel],
        action: ActionCode,
        target: EntityRef,
        requested_by: UserId,
        now: DateTime<Utc>,
    ) -> Result<Self, CascadeError> {
        if levels.is_empty() {
            return Err(CascadeError::NoLevels { document: document.id.clone() });
        }

        let mut ordered: Vec<&ApprovalDocumentLevel> = levels.iter().collect();
        ordered.sort_by_key(|level| level.level);

        let approval = Approval::start(document.id.clone(), action, target, requested_by, now);
        let tasks = ordered
            .iter()
            .enumerate()
            .map(|(index, level)| {
                let status =
                    if index == 0 { TaskStatus::Pending } else { TaskStatus::NotStarted };
                ApprovalTask::new(approval.id.clone(), level.id.clone(), level.level, status, now)
            })
            .collect();

        Ok(Self { approval, tasks })
    }

    pub fn first_task(&self) -> Option<&ApprovalTask> {
        self.tasks.iter().min_by_key(|task| task.level)
    }

    /// Applies one decision to the pending task `task_id` and computes the
    /// full cascade. Pure: returns the outcome without mutating the run.
    pub fn decide(
        &self,
        task_id: &TaskId,
        verdict: Verdict,
        actor: &UserId,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<CascadeOutcome, CascadeError> {
        if self.approval.status.is_settled() {
            return Err(CascadeError::RunSettled {
                approval: self.approval.id.clone(),
                status: self.approval.status,
            });
        }

        let task = self
            .tasks
            .iter()
            .find(|task| &task.id == task_id)
            .ok_or_else(|| CascadeError::UnknownTask { task: task_id.clone() })?;
        if task.status != TaskStatus::Pending {
            return Err(CascadeError::TaskNotPending {
                task: task.id.clone(),
                status: task.status,
            });
        }

        let mut decided_task = task.clone();
        decided_task.status = match verdict {
            Verdict::Approve => TaskStatus::Approved,
            Verdict::Reject => TaskStatus::Rejected,
            Verdict::Override => TaskStatus::Overridden,
        };
        decided_task.decided_by = Some(actor.clone());
        decided_task.comment = comment;
        decided_task.updated_at = now;

        match verdict {
            Verdict::Approve => {
                let next = self
                    .tasks
                    .iter()
                    .filter(|candidate| candidate.level > task.level)
                    .min_by_key(|candidate| candidate.level);
                match next {
                    Some(next) => {
                        let mut unlocked = next.clone();
                        unlocked.status = TaskStatus::Pending;
                        unlocked.updated_at = now;
                        Ok(CascadeOutcome {
                            decided_task,
                            unlocked_task: Some(unlocked),
                            terminated_tasks: Vec::new(),
                            run_status: ApprovalStatus::Ongoing,
                        })
                    }
                    None => Ok(CascadeOutcome {
                        decided_task,
                        unlocked_task: None,
                        terminated_tasks: Vec::new(),
                        run_status: ApprovalStatus::Completed,
                    }),
                }
            }
            Verdict::Reject | Verdict::Override => {
                let terminated_tasks = self
                    .tasks
                    .iter()
                    .filter(|sibling| &sibling.id != task_id && sibling.status.is_cancellable())
                    .map(|sibling| {
                        let mut terminated = sibling.clone();
                        terminated.status = TaskStatus::Terminated;
                        terminated.updated_at = now;
                        terminated
                    })
                    .collect();
                let run_status = match verdict {
                    Verdict::Reject => ApprovalStatus::Rejected,
                    _ => ApprovalStatus::Completed,
                };
                Ok(CascadeOutcome {
                    decided_task,
                    unlocked_task: None,
                    terminated_tasks,
                    run_status,
                })
            }
        }
    }

    /// Writes a computed outcome back into the aggregate. Used by in-memory
    /// stores and tests; the sql store applies the same writes row by row.
    pub fn apply(&mut self, outcome: &CascadeOutcome, now: DateTime<Utc>) {
        let replace = |tasks: &mut Vec<ApprovalTask>, updated: &ApprovalTask| {
            if let Some(slot) = tasks.iter_mut().find(|task| task.id == updated.id) {
                *slot = updated.clone();
            }
        };
        replace(&mut self.tasks, &outcome.decided_task);
        if let Some(unlocked) = &outcome.unlocked_task {
            replace(&mut self.tasks, unlocked);
        }
        for terminated in &outcome.terminated_tasks {
            replace(&mut self.tasks, terminated);
        }
        self.approval.status = outcome.run_status;
        self.approval.updated_at = now;
    }

    /// Among an ongoing run's tasks at most one is pending; settled runs
    /// have none.
    pub fn pending_count(&self) -> usize {
        self.tasks.iter().filter(|task| task.status == TaskStatus::Pending).count()
    }
}
