//! Task orchestration service.
//!
//! The only component that mutates inventory units and tasks together. Every
//! use case follows the same shape:
//!
//! ```text
//! load snapshots → decide/apply on tracked aggregates → commit one UnitOfWork
//!   → (count reporting, approval, receipt) best-effort ERP calls
//! ```
//!
//! A commit rejected for a stale version re-runs the whole use case against
//! fresh snapshots, up to `max_commit_retries` times. This is what keeps two
//! concurrent batch creations from locking the same unit: the loser re-reads,
//! sees the unit locked, and reports it as a warning.

mod admin;
mod counting;
mod intake;
mod queries;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use lpnflow_core::{ActorId, DomainError, LineId, LpnId, Sku, StationId, TaskId};
use lpnflow_inventory::{InventoryUnit, LpnCommand, LpnStatus, ReleaseFromTask};
use lpnflow_tasks::{InventoryTask, TaskNumber, TaskPriority, TaskType};

use crate::config::EngineConfig;
use crate::erp::{ErpAdapter, ErpAdjustment, LoggingErpAdapter, ReceiptMove};
use crate::repository::{self, Repository, RepositoryError, Tracked, UnitOfWork};

pub use lpnflow_inventory::{ContainerType, PhysicalAttributes};

#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// Business rule violation, propagated unmodified from the aggregates.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Batch creation skipped every target; nothing was persisted. Carries
    /// one warning per skipped target.
    #[error("no eligible inventory units ({} targets skipped)", .warnings.len())]
    NoEligibleUnits { warnings: Vec<BatchWarning> },

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

static NO_ELIGIBLE_UNITS: DomainError = DomainError::NoEligibleUnits;

impl OrchestrationError {
    /// The business rule behind the failure, if it is one.
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            OrchestrationError::Domain(e) => Some(e),
            OrchestrationError::NoEligibleUnits { .. } => Some(&NO_ELIGIBLE_UNITS),
            OrchestrationError::Repository(_) => None,
        }
    }

    /// Per-target skip reasons of a batch that produced no task.
    pub fn skipped_targets(&self) -> &[BatchWarning] {
        match self {
            OrchestrationError::NoEligibleUnits { warnings } => warnings,
            _ => &[],
        }
    }
}

/// How batch-creation targets are resolved to inventory units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetKind {
    /// Targets are license plate numbers.
    Lpn,
    /// Every active unit of each SKU.
    Sku,
    /// Every active unit at each location.
    Location,
}

/// Why a target did not become a task line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    InvalidIdentifier(String),
    NotFound,
    NoActiveUnits,
    AlreadyInTask(TaskId),
    ReservedForOutbound,
    NotEligible(LpnStatus),
}

impl core::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SkipReason::InvalidIdentifier(msg) => write!(f, "invalid identifier: {msg}"),
            SkipReason::NotFound => f.write_str("not found"),
            SkipReason::NoActiveUnits => f.write_str("no active inventory units"),
            SkipReason::AlreadyInTask(_) => f.write_str("already in an active task"),
            SkipReason::ReservedForOutbound => f.write_str("reserved for outbound, skipped"),
            SkipReason::NotEligible(status) => write!(f, "not eligible ({status:?})"),
        }
    }
}

/// Non-fatal per-target outcome of batch creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchWarning {
    pub target: String,
    pub reason: SkipReason,
}

impl BatchWarning {
    fn new(target: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            target: target.into(),
            reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchTaskRequest {
    pub targets: Vec<String>,
    pub kind: TargetKind,
    pub task_type: TaskType,
    pub priority: TaskPriority,
    pub created_by: ActorId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub task_id: TaskId,
    pub number: TaskNumber,
    pub locked_units: Vec<LpnId>,
    pub warnings: Vec<BatchWarning>,
}

/// One container arriving on an inbound picking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub lpn_id: LpnId,
    pub sku: Sku,
    pub quantity: i64,
    pub container_type: ContainerType,
    pub attributes: PhysicalAttributes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptOutcome {
    pub received: Vec<LpnId>,
    /// Auto-generated putaway task, if any unit was eligible.
    pub putaway: Option<BatchOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountReport {
    pub task_id: TaskId,
    pub line_id: LineId,
    /// Counted quantity, or units removed for `TakeSample` tasks.
    pub counted: i64,
    pub actor: ActorId,
    pub station: Option<StationId>,
}

/// Inventory units touched by one use case, loaded at most once each.
#[derive(Debug, Default)]
struct TouchedUnits {
    units: BTreeMap<LpnId, Tracked<InventoryUnit>>,
}

impl TouchedUnits {
    async fn get<R: Repository>(
        &mut self,
        repository: &R,
        lpn_id: &LpnId,
    ) -> Result<&mut Tracked<InventoryUnit>, OrchestrationError> {
        if !self.units.contains_key(lpn_id) {
            let unit = repository
                .load_unit(lpn_id)
                .await?
                .ok_or_else(|| DomainError::not_found(format!("inventory unit {lpn_id}")))?;
            self.units.insert(lpn_id.clone(), Tracked::loaded(unit));
        }
        self.units
            .get_mut(lpn_id)
            .ok_or_else(|| DomainError::not_found(format!("inventory unit {lpn_id}")).into())
    }

    fn insert(&mut self, unit: Tracked<InventoryUnit>) {
        self.units.insert(unit.state().lpn_id().clone(), unit);
    }

    fn stage_into(self, work: &mut UnitOfWork) -> Result<(), RepositoryError> {
        for unit in self.units.into_values() {
            work.stage_unit(unit)?;
        }
        Ok(())
    }
}

/// Application service implementing the engine's use cases.
pub struct TaskOrchestrationService<R, E> {
    repository: R,
    erp: E,
    config: EngineConfig,
}

/// Service wired from configuration alone.
pub type ConfiguredService = TaskOrchestrationService<Arc<dyn Repository>, LoggingErpAdapter>;

/// Build the service for a process: repository chosen by `database_url`, ERP
/// requests logged under the configured company.
pub async fn connect(config: EngineConfig) -> anyhow::Result<ConfiguredService> {
    let repository = repository::from_config(&config).await?;
    let erp = LoggingErpAdapter::new(config.erp_company_id.clone());
    info!(
        staging_location = %config.staging_location,
        persistent = config.database_url.is_some(),
        erp_enabled = config.erp_enabled,
        "task orchestration service ready"
    );
    Ok(TaskOrchestrationService::new(repository, erp, config))
}

impl<R, E> TaskOrchestrationService<R, E>
where
    R: Repository,
    E: ErpAdapter,
{
    pub fn new(repository: R, erp: E, config: EngineConfig) -> Self {
        Self {
            repository,
            erp,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// Re-run `attempt` while its commit loses an optimistic concurrency race.
    async fn with_retry<T, F, Fut>(
        &self,
        operation: &'static str,
        mut attempt: F,
    ) -> Result<T, OrchestrationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OrchestrationError>>,
    {
        let mut retries = 0u32;
        loop {
            match attempt().await {
                Err(OrchestrationError::Repository(err)) if err.is_concurrency() => {
                    if retries >= self.config.max_commit_retries {
                        warn!(operation, retries, error = %err, "giving up after repeated commit conflicts");
                        return Err(DomainError::conflict(format!("{operation}: {err}")).into());
                    }
                    retries += 1;
                    debug!(operation, retry = retries, error = %err, "commit conflict, re-running");
                    tokio::task::yield_now().await;
                }
                other => return other,
            }
        }
    }

    async fn load_task(&self, task_id: TaskId) -> Result<InventoryTask, OrchestrationError> {
        self.repository
            .load_task(task_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("task {task_id}")).into())
    }

    async fn commit(&self, work: UnitOfWork) -> Result<(), OrchestrationError> {
        if work.is_empty() {
            return Ok(());
        }
        self.repository.commit(work).await?;
        Ok(())
    }

    /// Release every unit still locked by `task`.
    async fn release_all(
        &self,
        task: &InventoryTask,
        units: &mut TouchedUnits,
        at: DateTime<Utc>,
    ) -> Result<(), OrchestrationError> {
        let task_id = task.task_id();
        for lpn_id in task.lpn_ids() {
            let unit = units.get(&self.repository, lpn_id).await?;
            if unit.state().task_lock() == Some(task_id) {
                unit.execute(&LpnCommand::ReleaseFromTask(ReleaseFromTask {
                    lpn_id: lpn_id.clone(),
                    task_id,
                    occurred_at: at,
                }))?;
            }
        }
        Ok(())
    }

    /// Push quantity corrections to the ERP. Failures are logged, never returned.
    async fn push_adjustments(&self, adjustments: &[ErpAdjustment]) {
        for adjustment in adjustments {
            if !self.config.erp_enabled {
                debug!(sku = %adjustment.sku, "erp disabled, adjustment not pushed");
                continue;
            }
            let result = self
                .erp
                .create_inventory_adjustment(
                    &adjustment.sku,
                    adjustment.location.as_ref(),
                    adjustment.quantity_difference,
                    &adjustment.reason,
                )
                .await;
            match result {
                Ok(true) => info!(
                    sku = %adjustment.sku,
                    quantity_difference = adjustment.quantity_difference,
                    "erp adjustment pushed"
                ),
                Ok(false) => warn!(
                    sku = %adjustment.sku,
                    quantity_difference = adjustment.quantity_difference,
                    "erp refused adjustment; left for reconciliation"
                ),
                Err(err) => error!(
                    sku = %adjustment.sku,
                    quantity_difference = adjustment.quantity_difference,
                    error = %err,
                    "erp adjustment failed; left for reconciliation"
                ),
            }
        }
    }

    async fn push_receipt(&self, picking_id: &str, moves: &[ReceiptMove]) {
        if !self.config.erp_enabled {
            debug!(picking_id, "erp disabled, receipt not confirmed");
            return;
        }
        match self.erp.confirm_receipt(picking_id, moves).await {
            Ok(true) => info!(picking_id, moves = moves.len(), "erp receipt confirmed"),
            Ok(false) => warn!(picking_id, "erp refused receipt confirmation; left for reconciliation"),
            Err(err) => error!(picking_id, error = %err, "erp receipt confirmation failed; left for reconciliation"),
        }
    }
}
