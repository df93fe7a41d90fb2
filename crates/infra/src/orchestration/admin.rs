//! Supervisor operations on tasks, and direct unit lifecycle commands.

use chrono::Utc;
use tracing::{info, instrument};

use lpnflow_core::{ActorId, DomainError, LineId, TaskId};
use lpnflow_inventory::{InventoryUnit, LpnCommand, UnlockFromTask};
use lpnflow_tasks::{
    AssignTask, CancelTask, InventoryTask, RemoveLine, TaskCommand, TaskEvent, TaskPriority,
    UpdatePriority,
};

use crate::erp::ErpAdapter;
use crate::repository::{Repository, Tracked, UnitOfWork};

use super::{OrchestrationError, TaskOrchestrationService, TouchedUnits};

impl<R, E> TaskOrchestrationService<R, E>
where
    R: Repository,
    E: ErpAdapter,
{
    #[instrument(skip(self), err)]
    pub async fn update_priority(
        &self,
        task_id: TaskId,
        priority: TaskPriority,
    ) -> Result<InventoryTask, OrchestrationError> {
        self.with_retry("update_priority", move || {
            self.execute_task_only(
                task_id,
                TaskCommand::UpdatePriority(UpdatePriority {
                    task_id,
                    priority,
                    occurred_at: Utc::now(),
                }),
            )
        })
        .await
    }

    /// Assign a task to an operator. A pending task becomes Assigned.
    #[instrument(skip(self), err)]
    pub async fn assign_task(
        &self,
        task_id: TaskId,
        assignee: ActorId,
    ) -> Result<InventoryTask, OrchestrationError> {
        let assignee = &assignee;
        self.with_retry("assign_task", move || {
            self.execute_task_only(
                task_id,
                TaskCommand::Assign(AssignTask {
                    task_id,
                    assignee: assignee.clone(),
                    occurred_at: Utc::now(),
                }),
            )
        })
        .await
    }

    /// Cancel a task and release every unit it still holds.
    #[instrument(skip(self, reason), err)]
    pub async fn cancel_task(
        &self,
        task_id: TaskId,
        reason: String,
        actor: ActorId,
    ) -> Result<InventoryTask, OrchestrationError> {
        let (reason, actor) = (&reason, &actor);
        let task = self
            .with_retry("cancel_task", move || async move {
                let now = Utc::now();
                let mut task = Tracked::loaded(self.load_task(task_id).await?);
                task.execute(&TaskCommand::Cancel(CancelTask {
                    task_id,
                    reason: reason.clone(),
                    actor: actor.clone(),
                    occurred_at: now,
                }))?;

                let mut units = TouchedUnits::default();
                self.release_all(task.state(), &mut units, now).await?;

                let snapshot = task.state().clone();
                let mut work = UnitOfWork::new();
                units.stage_into(&mut work)?;
                work.stage_task(task)?;
                self.commit(work).await?;
                Ok(snapshot)
            })
            .await?;

        info!(reason = %reason, "task cancelled");
        Ok(task)
    }

    /// Remove one line from an open task and unlock its unit.
    ///
    /// Removing the last line cancels the task; removing the only pending line
    /// settles it as if that line had been the last one counted.
    #[instrument(skip(self, reason), err)]
    pub async fn remove_line(
        &self,
        task_id: TaskId,
        line_id: LineId,
        reason: String,
        actor: ActorId,
    ) -> Result<InventoryTask, OrchestrationError> {
        let (reason, actor) = (&reason, &actor);
        let task = self
            .with_retry("remove_line", move || {
                self.try_remove_line(task_id, line_id, reason, actor)
            })
            .await?;

        info!(status = ?task.status(), lines = task.lines().len(), "task line removed");
        Ok(task)
    }

    async fn try_remove_line(
        &self,
        task_id: TaskId,
        line_id: LineId,
        reason: &str,
        actor: &ActorId,
    ) -> Result<InventoryTask, OrchestrationError> {
        let now = Utc::now();
        let mut task = Tracked::loaded(self.load_task(task_id).await?);
        let lpn_id = task
            .state()
            .line(line_id)
            .map(|l| l.lpn_id.clone())
            .ok_or_else(|| DomainError::not_found(format!("line {line_id} on task {task_id}")))?;

        let events = task.execute(&TaskCommand::RemoveLine(RemoveLine {
            task_id,
            line_id,
            reason: reason.to_string(),
            actor: actor.clone(),
            occurred_at: now,
        }))?;

        let mut units = TouchedUnits::default();
        let unit = units.get(&self.repository, &lpn_id).await?;
        if unit.state().task_lock() == Some(task_id) {
            unit.execute(&LpnCommand::UnlockFromTask(UnlockFromTask {
                lpn_id: lpn_id.clone(),
                task_id,
                reason: reason.to_string(),
                occurred_at: now,
            }))?;
        }

        if events.iter().any(|e| matches!(e, TaskEvent::Completed(_))) {
            self.release_all(task.state(), &mut units, now).await?;
        }

        let snapshot = task.state().clone();
        let mut work = UnitOfWork::new();
        units.stage_into(&mut work)?;
        work.stage_task(task)?;
        self.commit(work).await?;
        Ok(snapshot)
    }

    /// Apply a lifecycle command (receive, putaway, allocate, adjust...) to a
    /// single unit outside any task flow.
    ///
    /// Lock transitions and changes made on behalf of a task are refused here;
    /// they only happen as part of task operations. A unit held by a task
    /// refuses quantity and allocation changes until the task lets it go.
    #[instrument(skip(self, command), fields(lpn_id = %command.lpn_id()), err)]
    pub async fn dispatch_unit_command(
        &self,
        command: LpnCommand,
    ) -> Result<InventoryUnit, OrchestrationError> {
        if command.is_task_driven() {
            return Err(DomainError::invalid_state(
                "task-driven unit changes only happen through task operations",
            )
            .into());
        }

        let command = &command;
        let unit = self
            .with_retry("dispatch_unit_command", move || async move {
                let lpn_id = command.lpn_id();
                let unit = match command {
                    LpnCommand::Receive(_) => self
                        .repository
                        .load_unit(lpn_id)
                        .await?
                        .unwrap_or_else(|| InventoryUnit::empty(lpn_id.clone())),
                    _ => self.repository.load_unit(lpn_id).await?.ok_or_else(|| {
                        DomainError::not_found(format!("inventory unit {lpn_id}"))
                    })?,
                };

                let mut unit = Tracked::loaded(unit);
                unit.execute(command)?;
                let snapshot = unit.state().clone();
                let mut work = UnitOfWork::new();
                work.stage_unit(unit)?;
                self.commit(work).await?;
                Ok(snapshot)
            })
            .await?;

        info!(status = ?unit.status(), quantity = unit.quantity(), "unit command applied");
        Ok(unit)
    }

    /// Decide and persist a command that touches the task alone.
    async fn execute_task_only(
        &self,
        task_id: TaskId,
        command: TaskCommand,
    ) -> Result<InventoryTask, OrchestrationError> {
        let mut task = Tracked::loaded(self.load_task(task_id).await?);
        task.execute(&command)?;

        let snapshot = task.state().clone();
        let mut work = UnitOfWork::new();
        work.stage_task(task)?;
        self.commit(work).await?;
        Ok(snapshot)
    }
}
