//! Work creation: batch tasks, receipt intake and auto-putaway.

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use tracing::{error, info, instrument, warn};

use lpnflow_core::{ActorId, DomainError, LineId, LocationId, LpnId, Sku, TaskId};
use lpnflow_inventory::{
    Eligibility, InventoryUnit, LockToTask, LpnCommand, ReceiveUnit,
};
use lpnflow_tasks::{
    AddLine, CreateTask, InventoryTask, NumberPrefix, TaskCommand, TaskNumber, TaskPriority,
    TaskType,
};

use crate::erp::{ErpAdapter, ReceiptMove};
use crate::repository::{Repository, Tracked, UnitFilter, UnitOfWork};

use super::{
    BatchOutcome, BatchTaskRequest, BatchWarning, OrchestrationError, ReceiptLine,
    ReceiptOutcome, SkipReason, TargetKind, TaskOrchestrationService,
};

/// Keep units that may join a task; record a warning for each one skipped.
fn filter_eligible(
    candidates: Vec<InventoryUnit>,
    warnings: &mut Vec<BatchWarning>,
) -> Vec<InventoryUnit> {
    let mut eligible = Vec::with_capacity(candidates.len());
    for unit in candidates {
        let skip = match unit.eligibility() {
            Eligibility::Eligible => {
                eligible.push(unit);
                continue;
            }
            Eligibility::Locked(task_id) => SkipReason::AlreadyInTask(task_id),
            Eligibility::Allocated => SkipReason::ReservedForOutbound,
            Eligibility::Terminal => SkipReason::NotEligible(unit.status()),
        };
        warn!(lpn_id = %unit.lpn_id(), reason = %skip, "target skipped");
        warnings.push(BatchWarning::new(unit.lpn_id().as_str(), skip));
    }
    eligible
}

struct BuiltTask {
    work: UnitOfWork,
    task_id: TaskId,
    number: TaskNumber,
    locked_units: Vec<LpnId>,
}

/// Create a task with one line per unit and lock every unit to it.
fn build_task(
    prefix: NumberPrefix,
    task_type: TaskType,
    priority: TaskPriority,
    created_by: &ActorId,
    units: Vec<InventoryUnit>,
) -> Result<BuiltTask, OrchestrationError> {
    let now = Utc::now();
    let task_id = TaskId::new();
    let number = TaskNumber::generate(prefix, now);

    let mut task = Tracked::loaded(InventoryTask::empty(task_id));
    task.execute(&TaskCommand::Create(CreateTask {
        task_id,
        number: number.clone(),
        task_type,
        priority,
        created_by: created_by.clone(),
        occurred_at: now,
    }))?;

    let mut work = UnitOfWork::new();
    let mut locked_units = Vec::with_capacity(units.len());
    for unit in units {
        let lpn_id = unit.lpn_id().clone();
        let sku = unit
            .sku()
            .cloned()
            .ok_or_else(|| DomainError::invariant(format!("inventory unit {lpn_id} has no SKU")))?;

        task.execute(&TaskCommand::AddLine(AddLine {
            task_id,
            line_id: LineId::new(),
            lpn_id: lpn_id.clone(),
            sku,
            location: unit.location().cloned(),
            description: unit.describe(),
            expected: unit.quantity(),
            occurred_at: now,
        }))?;

        let mut unit = Tracked::loaded(unit);
        unit.execute(&LpnCommand::LockToTask(LockToTask {
            lpn_id: lpn_id.clone(),
            task_id,
            occurred_at: now,
        }))?;
        work.stage_unit(unit)?;
        locked_units.push(lpn_id);
    }
    work.stage_task(task)?;

    Ok(BuiltTask {
        work,
        task_id,
        number,
        locked_units,
    })
}

impl<R, E> TaskOrchestrationService<R, E>
where
    R: Repository,
    E: ErpAdapter,
{
    /// Create one task over every eligible unit the targets resolve to.
    ///
    /// Ineligible targets become warnings; only an empty eligible set fails,
    /// with `NoEligibleUnits` carrying every warning, and then nothing is
    /// persisted.
    #[instrument(
        skip(self, request),
        fields(kind = ?request.kind, targets = request.targets.len(), task_type = ?request.task_type),
        err
    )]
    pub async fn create_batch_task(
        &self,
        request: BatchTaskRequest,
    ) -> Result<BatchOutcome, OrchestrationError> {
        let request = &request;
        let outcome = self
            .with_retry("create_batch_task", move || self.try_create_batch(request))
            .await?;

        info!(
            task_id = %outcome.task_id,
            number = %outcome.number,
            lines = outcome.locked_units.len(),
            warnings = outcome.warnings.len(),
            "batch task created"
        );
        Ok(outcome)
    }

    async fn try_create_batch(
        &self,
        request: &BatchTaskRequest,
    ) -> Result<BatchOutcome, OrchestrationError> {
        let (candidates, mut warnings) = self.resolve_targets(request.kind, &request.targets).await?;
        let eligible = filter_eligible(candidates, &mut warnings);
        if eligible.is_empty() {
            return Err(OrchestrationError::NoEligibleUnits { warnings });
        }

        let built = build_task(
            NumberPrefix::Batch,
            request.task_type,
            request.priority,
            &request.created_by,
            eligible,
        )?;
        self.commit(built.work).await?;

        Ok(BatchOutcome {
            task_id: built.task_id,
            number: built.number,
            locked_units: built.locked_units,
            warnings,
        })
    }

    /// Resolve targets to candidate units, collapsing duplicates.
    async fn resolve_targets(
        &self,
        kind: TargetKind,
        targets: &[String],
    ) -> Result<(Vec<InventoryUnit>, Vec<BatchWarning>), OrchestrationError> {
        let mut candidates = Vec::new();
        let mut warnings = Vec::new();

        for target in targets {
            let found = match kind {
                TargetKind::Lpn => match LpnId::parse(target) {
                    Ok(lpn_id) => self.repository.load_unit(&lpn_id).await?.into_iter().collect(),
                    Err(e) => {
                        warnings.push(BatchWarning::new(
                            target.as_str(),
                            SkipReason::InvalidIdentifier(e.to_string()),
                        ));
                        continue;
                    }
                },
                TargetKind::Sku => match Sku::parse(target) {
                    Ok(sku) => {
                        self.repository
                            .query_units(&UnitFilter::active().with_sku(sku))
                            .await?
                    }
                    Err(e) => {
                        warnings.push(BatchWarning::new(
                            target.as_str(),
                            SkipReason::InvalidIdentifier(e.to_string()),
                        ));
                        continue;
                    }
                },
                TargetKind::Location => match LocationId::parse(target) {
                    Ok(location) => {
                        self.repository
                            .query_units(&UnitFilter::active().at_location(location))
                            .await?
                    }
                    Err(e) => {
                        warnings.push(BatchWarning::new(
                            target.as_str(),
                            SkipReason::InvalidIdentifier(e.to_string()),
                        ));
                        continue;
                    }
                },
            };

            if found.is_empty() {
                let reason = match kind {
                    TargetKind::Lpn => SkipReason::NotFound,
                    TargetKind::Sku | TargetKind::Location => SkipReason::NoActiveUnits,
                };
                warn!(input = %target, reason = %reason, "target skipped");
                warnings.push(BatchWarning::new(target.as_str(), reason));
            }
            candidates.extend(found);
        }

        let mut seen = HashSet::new();
        candidates.retain(|u: &InventoryUnit| seen.insert(u.lpn_id().clone()));
        Ok((candidates, warnings))
    }

    /// Create a putaway task for units of `origin_order` still in staging.
    ///
    /// A background trigger: nothing eligible is `Ok(None)`, not an error.
    #[instrument(skip(self), err)]
    pub async fn generate_putaway_task(
        &self,
        origin_order: &str,
    ) -> Result<Option<BatchOutcome>, OrchestrationError> {
        let outcome = self
            .with_retry("generate_putaway_task", move || self.try_generate_putaway(origin_order))
            .await?;

        if let Some(outcome) = &outcome {
            info!(
                task_id = %outcome.task_id,
                number = %outcome.number,
                lines = outcome.locked_units.len(),
                "putaway task generated"
            );
        }
        Ok(outcome)
    }

    async fn try_generate_putaway(
        &self,
        origin_order: &str,
    ) -> Result<Option<BatchOutcome>, OrchestrationError> {
        let filter = UnitFilter::active()
            .at_location(self.config.staging_location.clone())
            .from_order(origin_order);
        let candidates = self.repository.query_units(&filter).await?;

        let mut warnings = Vec::new();
        let eligible = filter_eligible(candidates, &mut warnings);
        if eligible.is_empty() {
            return Ok(None);
        }

        let built = build_task(
            NumberPrefix::Putaway,
            TaskType::Putaway,
            TaskPriority::Normal,
            &self.config.system_actor,
            eligible,
        )?;
        self.commit(built.work).await?;

        Ok(Some(BatchOutcome {
            task_id: built.task_id,
            number: built.number,
            locked_units: built.locked_units,
            warnings,
        }))
    }

    /// Register the containers of an inbound picking, confirm the receipt with
    /// the ERP (best-effort) and generate their putaway task.
    #[instrument(skip(self, lines), fields(lines = lines.len()), err)]
    pub async fn receive_units(
        &self,
        picking_id: &str,
        lines: Vec<ReceiptLine>,
        actor: ActorId,
    ) -> Result<ReceiptOutcome, OrchestrationError> {
        if lines.is_empty() {
            return Err(DomainError::validation("a receipt needs at least one unit").into());
        }
        let mut seen = HashSet::new();
        if let Some(dup) = lines.iter().find(|l| !seen.insert(&l.lpn_id)) {
            return Err(DomainError::validation(format!(
                "inventory unit {} appears twice in the receipt",
                dup.lpn_id
            ))
            .into());
        }

        let lines = &lines;
        let actor = &actor;
        self.with_retry("receive_units", move || {
            self.try_receive(picking_id, lines, actor)
        })
        .await?;
        info!(picking_id, units = lines.len(), "units received");

        let mut per_sku: BTreeMap<Sku, i64> = BTreeMap::new();
        for line in lines {
            *per_sku.entry(line.sku.clone()).or_default() += line.quantity;
        }
        let moves: Vec<ReceiptMove> = per_sku
            .into_iter()
            .map(|(sku, quantity)| ReceiptMove { sku, quantity })
            .collect();
        self.push_receipt(picking_id, &moves).await;

        // The receipt is committed; a failed trigger must not report it as failed.
        let putaway = match self.generate_putaway_task(picking_id).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(picking_id, error = %err, "putaway generation failed after receipt");
                None
            }
        };

        Ok(ReceiptOutcome {
            received: lines.iter().map(|l| l.lpn_id.clone()).collect(),
            putaway,
        })
    }

    async fn try_receive(
        &self,
        picking_id: &str,
        lines: &[ReceiptLine],
        actor: &ActorId,
    ) -> Result<(), OrchestrationError> {
        let now = Utc::now();
        let mut work = UnitOfWork::new();

        for line in lines {
            if self.repository.load_unit(&line.lpn_id).await?.is_some() {
                return Err(DomainError::conflict(format!(
                    "inventory unit {} already exists",
                    line.lpn_id
                ))
                .into());
            }

            let mut unit = Tracked::loaded(InventoryUnit::empty(line.lpn_id.clone()));
            unit.execute(&LpnCommand::Receive(ReceiveUnit {
                lpn_id: line.lpn_id.clone(),
                sku: line.sku.clone(),
                quantity: line.quantity,
                container_type: line.container_type,
                attributes: line.attributes,
                location: self.config.staging_location.clone(),
                origin_order: Some(picking_id.to_string()),
                actor: actor.clone(),
                occurred_at: now,
            }))?;
            work.stage_unit(unit)?;
        }

        self.commit(work).await
    }
}
