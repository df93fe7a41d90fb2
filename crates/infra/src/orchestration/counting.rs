//! Count reporting and discrepancy resolution.

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use lpnflow_core::{ActorId, DomainError, StationId, TaskId};
use lpnflow_inventory::{AdjustQuantity, ConsumeUnit, InventoryUnit, LpnCommand};
use lpnflow_tasks::{
    ApproveAdjustment, InventoryTask, RejectAdjustment, ReportLine, TaskCommand, TaskEvent,
    TaskType,
};

use crate::erp::{ErpAdapter, ErpAdjustment};
use crate::repository::{Repository, Tracked, UnitOfWork};

use super::{CountReport, OrchestrationError, TaskOrchestrationService, TouchedUnits};

const SAMPLE_REASON: &str = "SAMPLE";
const CYCLE_COUNT_REASON: &str = "CYCLE_COUNT";

fn completed(events: &[TaskEvent]) -> bool {
    events.iter().any(|e| matches!(e, TaskEvent::Completed(_)))
}

impl<R, E> TaskOrchestrationService<R, E>
where
    R: Repository,
    E: ErpAdapter,
{
    /// Record an operator count on a task line and settle the task if every
    /// line has now been counted.
    ///
    /// For `TakeSample` tasks `counted` is the number of units removed, and the
    /// removal is applied to the unit immediately (never below zero; a unit
    /// emptied by sampling is consumed). The ERP is told about the full
    /// reported removal.
    #[instrument(
        skip(self, report),
        fields(task_id = %report.task_id, line_id = %report.line_id, counted = report.counted),
        err
    )]
    pub async fn report_line_count(
        &self,
        report: CountReport,
    ) -> Result<InventoryTask, OrchestrationError> {
        let report = &report;
        let (task, adjustments) = self
            .with_retry("report_line_count", move || self.try_report(report))
            .await?;

        info!(status = ?task.status(), "line count reported");
        self.push_adjustments(&adjustments).await;
        Ok(task)
    }

    async fn try_report(
        &self,
        report: &CountReport,
    ) -> Result<(InventoryTask, Vec<ErpAdjustment>), OrchestrationError> {
        let now = Utc::now();
        let mut task = Tracked::loaded(self.load_task(report.task_id).await?);
        let events = task.execute(&TaskCommand::ReportLine(ReportLine {
            task_id: report.task_id,
            line_id: report.line_id,
            counted: report.counted,
            actor: report.actor.clone(),
            occurred_at: now,
        }))?;

        let mut units = TouchedUnits::default();
        let mut adjustments = Vec::new();

        if task.state().task_type() == TaskType::TakeSample {
            let lpn_id = task
                .state()
                .line(report.line_id)
                .map(|l| l.lpn_id.clone())
                .ok_or_else(|| DomainError::not_found(format!("line {}", report.line_id)))?;
            let unit = units.get(&self.repository, &lpn_id).await?;
            let removed = take_sample(
                unit,
                report.task_id,
                report.counted,
                &report.actor,
                report.station.as_ref(),
                now,
            )?;
            if removed < report.counted {
                warn!(%lpn_id, requested = report.counted, removed, "sample larger than on-hand quantity");
            }

            if report.counted > 0 {
                if let Some(sku) = unit.state().sku() {
                    adjustments.push(ErpAdjustment {
                        sku: sku.clone(),
                        location: unit.state().location().cloned(),
                        quantity_difference: -report.counted,
                        reason: SAMPLE_REASON.to_string(),
                    });
                }
            }
        }

        if completed(&events) {
            self.release_all(task.state(), &mut units, now).await?;
        }

        let snapshot = task.state().clone();
        let mut work = UnitOfWork::new();
        units.stage_into(&mut work)?;
        work.stage_task(task)?;
        self.commit(work).await?;

        Ok((snapshot, adjustments))
    }

    /// Accept every discrepancy of a task awaiting approval and complete it.
    ///
    /// Local quantities are corrected to the counted values (except for
    /// `TakeSample`, whose removals were applied when reported). The ERP is
    /// told `counted - expected` for every mismatched line after the commit.
    #[instrument(skip(self), err)]
    pub async fn approve_adjustment(
        &self,
        task_id: TaskId,
        supervisor: ActorId,
    ) -> Result<InventoryTask, OrchestrationError> {
        let supervisor = &supervisor;
        let (task, adjustments) = self
            .with_retry("approve_adjustment", move || {
                self.try_approve(task_id, supervisor)
            })
            .await?;

        info!(adjustments = adjustments.len(), "discrepancies approved");
        self.push_adjustments(&adjustments).await;
        Ok(task)
    }

    async fn try_approve(
        &self,
        task_id: TaskId,
        supervisor: &ActorId,
    ) -> Result<(InventoryTask, Vec<ErpAdjustment>), OrchestrationError> {
        let now = Utc::now();
        let mut task = Tracked::loaded(self.load_task(task_id).await?);
        let events = task.execute(&TaskCommand::Approve(ApproveAdjustment {
            task_id,
            supervisor: supervisor.clone(),
            occurred_at: now,
        }))?;

        let approved = events
            .iter()
            .find_map(|e| match e {
                TaskEvent::AdjustmentApproved(a) => Some(a.lines.clone()),
                _ => None,
            })
            .unwrap_or_default();

        let mut units = TouchedUnits::default();
        let mut adjustments = Vec::new();

        let sampling = task.state().task_type() == TaskType::TakeSample;
        let reason = if sampling { SAMPLE_REASON } else { CYCLE_COUNT_REASON };
        for line in &approved {
            let unit = units.get(&self.repository, &line.lpn_id).await?;
            if !sampling && unit.state().is_active() && unit.state().quantity() != line.counted {
                unit.execute(&LpnCommand::AdjustQuantity(AdjustQuantity {
                    lpn_id: line.lpn_id.clone(),
                    new_quantity: line.counted,
                    reason_code: CYCLE_COUNT_REASON.to_string(),
                    actor: supervisor.clone(),
                    station: None,
                    task_id: Some(task_id),
                    occurred_at: now,
                }))?;
            }
            adjustments.push(ErpAdjustment {
                sku: line.sku.clone(),
                location: unit
                    .state()
                    .location()
                    .cloned()
                    .or_else(|| line.location.clone()),
                quantity_difference: line.difference,
                reason: reason.to_string(),
            });
        }

        self.release_all(task.state(), &mut units, now).await?;

        let snapshot = task.state().clone();
        let mut work = UnitOfWork::new();
        units.stage_into(&mut work)?;
        work.stage_task(task)?;
        self.commit(work).await?;

        Ok((snapshot, adjustments))
    }

    /// Send the disputed lines of a task awaiting approval back for re-count.
    /// Units stay locked to the task.
    #[instrument(skip(self, reason), err)]
    pub async fn reject_adjustment(
        &self,
        task_id: TaskId,
        reason: String,
        actor: ActorId,
    ) -> Result<InventoryTask, OrchestrationError> {
        let (reason, actor) = (&reason, &actor);
        let task = self
            .with_retry("reject_adjustment", move || async move {
                let mut task = Tracked::loaded(self.load_task(task_id).await?);
                task.execute(&TaskCommand::Reject(RejectAdjustment {
                    task_id,
                    reason: reason.clone(),
                    actor: actor.clone(),
                    occurred_at: Utc::now(),
                }))?;

                let snapshot = task.state().clone();
                let mut work = UnitOfWork::new();
                work.stage_task(task)?;
                self.commit(work).await?;
                Ok(snapshot)
            })
            .await?;

        info!(status = ?task.status(), "discrepancies rejected, recount requested");
        Ok(task)
    }
}

/// Remove `requested` units from a sampled container held by `task_id`,
/// returning how many were actually taken (clamped to what was on hand).
fn take_sample(
    unit: &mut Tracked<InventoryUnit>,
    task_id: TaskId,
    requested: i64,
    actor: &ActorId,
    station: Option<&StationId>,
    at: DateTime<Utc>,
) -> Result<i64, OrchestrationError> {
    let on_hand = unit.state().quantity();
    let lpn_id = unit.state().lpn_id().clone();
    let remaining = on_hand - requested;

    if remaining > 0 {
        unit.execute(&LpnCommand::AdjustQuantity(AdjustQuantity {
            lpn_id,
            new_quantity: remaining,
            reason_code: SAMPLE_REASON.to_string(),
            actor: actor.clone(),
            station: station.cloned(),
            task_id: Some(task_id),
            occurred_at: at,
        }))?;
        return Ok(requested);
    }

    if on_hand != 0 {
        unit.execute(&LpnCommand::AdjustQuantity(AdjustQuantity {
            lpn_id: lpn_id.clone(),
            new_quantity: 0,
            reason_code: SAMPLE_REASON.to_string(),
            actor: actor.clone(),
            station: station.cloned(),
            task_id: Some(task_id),
            occurred_at: at,
        }))?;
    }
    unit.execute(&LpnCommand::Consume(ConsumeUnit {
        lpn_id,
        actor: actor.clone(),
        station: station.cloned(),
        task_id: Some(task_id),
        occurred_at: at,
    }))?;
    Ok(on_hand)
}
