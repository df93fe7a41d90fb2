use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lpnflow_core::{
    ActorId, Aggregate, AggregateRoot, DomainError, LineId, LocationId, LpnId, Sku, TaskId,
};
use lpnflow_events::Event;

use crate::number::TaskNumber;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    CycleCount,
    Putaway,
    Replenishment,
    Investigation,
    /// Destructive sampling: a reported count is the number of units removed.
    TakeSample,
}

/// Ordered so that `Critical > High > Normal > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Critical,
}

/// Task status lifecycle.
///
/// `Pending → Assigned → InProgress → {Completed | PendingApproval → Completed | Cancelled}`.
/// A rejected approval sends the task back to `InProgress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    PendingApproval,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }

    /// Whether operators may still report counts.
    pub fn accepts_counts(self) -> bool {
        matches!(
            self,
            TaskStatus::Pending | TaskStatus::Assigned | TaskStatus::InProgress
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LineStatus {
    Pending,
    Counted,
    Verified,
}

/// One inventory unit worked by a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLine {
    pub id: LineId,
    pub lpn_id: LpnId,
    pub sku: Sku,
    pub location: Option<LocationId>,
    pub description: String,
    pub expected: i64,
    pub counted: Option<i64>,
    pub status: LineStatus,
}

impl TaskLine {
    pub fn is_counted(&self) -> bool {
        self.status != LineStatus::Pending
    }

    /// Signed difference between the reported and the expected quantity.
    pub fn difference(&self) -> Option<i64> {
        self.counted.map(|counted| counted - self.expected)
    }

    pub fn is_mismatch(&self) -> bool {
        self.difference().is_some_and(|diff| diff != 0)
    }
}

/// Aggregate root: InventoryTask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryTask {
    id: TaskId,
    number: Option<TaskNumber>,
    task_type: TaskType,
    priority: TaskPriority,
    status: TaskStatus,
    created_by: Option<ActorId>,
    assignee: Option<ActorId>,
    lines: Vec<TaskLine>,
    created_at: Option<DateTime<Utc>>,
    last_rejection: Option<String>,
    cancel_reason: Option<String>,
    version: u64,
    created: bool,
}

impl InventoryTask {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: TaskId) -> Self {
        Self {
            id,
            number: None,
            task_type: TaskType::CycleCount,
            priority: TaskPriority::Normal,
            status: TaskStatus::Pending,
            created_by: None,
            assignee: None,
            lines: Vec::new(),
            created_at: None,
            last_rejection: None,
            cancel_reason: None,
            version: 0,
            created: false,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.id
    }

    pub fn number(&self) -> Option<&TaskNumber> {
        self.number.as_ref()
    }

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn created_by(&self) -> Option<&ActorId> {
        self.created_by.as_ref()
    }

    pub fn assignee(&self) -> Option<&ActorId> {
        self.assignee.as_ref()
    }

    pub fn lines(&self) -> &[TaskLine] {
        &self.lines
    }

    pub fn line(&self, line_id: LineId) -> Option<&TaskLine> {
        self.lines.iter().find(|l| l.id == line_id)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn last_rejection(&self) -> Option<&str> {
        self.last_rejection.as_deref()
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Units targeted by this task's lines, in line order.
    pub fn lpn_ids(&self) -> impl Iterator<Item = &LpnId> {
        self.lines.iter().map(|l| &l.lpn_id)
    }

    pub fn mismatched_lines(&self) -> impl Iterator<Item = &TaskLine> {
        self.lines.iter().filter(|l| l.is_mismatch())
    }

    /// Status-deciding event once every line has been counted, if any.
    ///
    /// Task status is a function of its lines: all counted and matching is
    /// Completed, all counted with a mismatch is PendingApproval.
    fn settlement(&self, occurred_at: DateTime<Utc>) -> Option<TaskEvent> {
        if self.lines.is_empty() || !self.lines.iter().all(TaskLine::is_counted) {
            return None;
        }

        let discrepancies: Vec<Discrepancy> = self
            .mismatched_lines()
            .map(|l| Discrepancy {
                line_id: l.id,
                lpn_id: l.lpn_id.clone(),
                expected: l.expected,
                counted: l.counted.unwrap_or_default(),
            })
            .collect();

        if discrepancies.is_empty() {
            return Some(TaskEvent::Completed(TaskCompleted {
                task_id: self.id,
                occurred_at,
            }));
        }
        if self.status == TaskStatus::PendingApproval {
            return None;
        }
        Some(TaskEvent::DiscrepancyFound(DiscrepancyFound {
            task_id: self.id,
            discrepancies,
            occurred_at,
        }))
    }
}

impl AggregateRoot for InventoryTask {
    type Id = TaskId;

    const AGGREGATE_TYPE: &'static str = "tasks.task";

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateTask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTask {
    pub task_id: TaskId,
    pub number: TaskNumber,
    pub task_type: TaskType,
    pub priority: TaskPriority,
    pub created_by: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddLine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLine {
    pub task_id: TaskId,
    pub line_id: LineId,
    pub lpn_id: LpnId,
    pub sku: Sku,
    pub location: Option<LocationId>,
    pub description: String,
    pub expected: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReportLine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportLine {
    pub task_id: TaskId,
    pub line_id: LineId,
    pub counted: i64,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveLine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveLine {
    pub task_id: TaskId,
    pub line_id: LineId,
    pub reason: String,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApproveAdjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveAdjustment {
    pub task_id: TaskId,
    pub supervisor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectAdjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectAdjustment {
    pub task_id: TaskId,
    pub reason: String,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdatePriority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePriority {
    pub task_id: TaskId,
    pub priority: TaskPriority,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AssignTask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignTask {
    pub task_id: TaskId,
    pub assignee: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelTask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelTask {
    pub task_id: TaskId,
    pub reason: String,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskCommand {
    Create(CreateTask),
    AddLine(AddLine),
    ReportLine(ReportLine),
    RemoveLine(RemoveLine),
    Approve(ApproveAdjustment),
    Reject(RejectAdjustment),
    UpdatePriority(UpdatePriority),
    Assign(AssignTask),
    Cancel(CancelTask),
}

/// Event: TaskCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCreated {
    pub task_id: TaskId,
    pub number: TaskNumber,
    pub task_type: TaskType,
    pub priority: TaskPriority,
    pub created_by: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAdded {
    pub task_id: TaskId,
    pub line_id: LineId,
    pub lpn_id: LpnId,
    pub sku: Sku,
    pub location: Option<LocationId>,
    pub description: String,
    pub expected: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineReported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineReported {
    pub task_id: TaskId,
    pub line_id: LineId,
    pub lpn_id: LpnId,
    pub expected: i64,
    pub counted: i64,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRemoved {
    pub task_id: TaskId,
    pub line_id: LineId,
    pub lpn_id: LpnId,
    pub reason: String,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// A counted line whose quantity differs from the expected one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub line_id: LineId,
    pub lpn_id: LpnId,
    pub expected: i64,
    pub counted: i64,
}

/// Event: DiscrepancyFound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscrepancyFound {
    pub task_id: TaskId,
    pub discrepancies: Vec<Discrepancy>,
    pub occurred_at: DateTime<Utc>,
}

/// Quantity correction accepted by a supervisor for one line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovedLine {
    pub line_id: LineId,
    pub lpn_id: LpnId,
    pub sku: Sku,
    pub location: Option<LocationId>,
    pub expected: i64,
    pub counted: i64,
    pub difference: i64,
}

/// Event: AdjustmentApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentApproved {
    pub task_id: TaskId,
    pub supervisor: ActorId,
    pub lines: Vec<ApprovedLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AdjustmentRejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentRejected {
    pub task_id: TaskId,
    pub reason: String,
    pub actor: ActorId,
    /// Lines reset to Pending for a re-count.
    pub recount_lines: Vec<LineId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PriorityUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityUpdated {
    pub task_id: TaskId,
    pub previous: TaskPriority,
    pub priority: TaskPriority,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TaskAssigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAssigned {
    pub task_id: TaskId,
    pub assignee: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TaskCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCompleted {
    pub task_id: TaskId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TaskCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCancelled {
    pub task_id: TaskId,
    pub reason: String,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskEvent {
    Created(TaskCreated),
    LineAdded(LineAdded),
    LineReported(LineReported),
    LineRemoved(LineRemoved),
    DiscrepancyFound(DiscrepancyFound),
    AdjustmentApproved(AdjustmentApproved),
    AdjustmentRejected(AdjustmentRejected),
    PriorityUpdated(PriorityUpdated),
    Assigned(TaskAssigned),
    Completed(TaskCompleted),
    Cancelled(TaskCancelled),
}

impl Event for TaskEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TaskEvent::Created(_) => "tasks.task.created",
            TaskEvent::LineAdded(_) => "tasks.task.line_added",
            TaskEvent::LineReported(_) => "tasks.task.line_reported",
            TaskEvent::LineRemoved(_) => "tasks.task.line_removed",
            TaskEvent::DiscrepancyFound(_) => "tasks.task.discrepancy_found",
            TaskEvent::AdjustmentApproved(_) => "tasks.task.adjustment_approved",
            TaskEvent::AdjustmentRejected(_) => "tasks.task.adjustment_rejected",
            TaskEvent::PriorityUpdated(_) => "tasks.task.priority_updated",
            TaskEvent::Assigned(_) => "tasks.task.assigned",
            TaskEvent::Completed(_) => "tasks.task.completed",
            TaskEvent::Cancelled(_) => "tasks.task.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TaskEvent::Created(e) => e.occurred_at,
            TaskEvent::LineAdded(e) => e.occurred_at,
            TaskEvent::LineReported(e) => e.occurred_at,
            TaskEvent::LineRemoved(e) => e.occurred_at,
            TaskEvent::DiscrepancyFound(e) => e.occurred_at,
            TaskEvent::AdjustmentApproved(e) => e.occurred_at,
            TaskEvent::AdjustmentRejected(e) => e.occurred_at,
            TaskEvent::PriorityUpdated(e) => e.occurred_at,
            TaskEvent::Assigned(e) => e.occurred_at,
            TaskEvent::Completed(e) => e.occurred_at,
            TaskEvent::Cancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for InventoryTask {
    type Command = TaskCommand;
    type Event = TaskEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TaskEvent::Created(e) => {
                self.id = e.task_id;
                self.number = Some(e.number.clone());
                self.task_type = e.task_type;
                self.priority = e.priority;
                self.status = TaskStatus::Pending;
                self.created_by = Some(e.created_by.clone());
                self.assignee = None;
                self.lines.clear();
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            TaskEvent::LineAdded(e) => {
                self.lines.push(TaskLine {
                    id: e.line_id,
                    lpn_id: e.lpn_id.clone(),
                    sku: e.sku.clone(),
                    location: e.location.clone(),
                    description: e.description.clone(),
                    expected: e.expected,
                    counted: None,
                    status: LineStatus::Pending,
                });
            }
            TaskEvent::LineReported(e) => {
                if let Some(line) = self.lines.iter_mut().find(|l| l.id == e.line_id) {
                    line.counted = Some(e.counted);
                    line.status = LineStatus::Counted;
                }
                if matches!(self.status, TaskStatus::Pending | TaskStatus::Assigned) {
                    self.status = TaskStatus::InProgress;
                }
            }
            TaskEvent::LineRemoved(e) => {
                self.lines.retain(|l| l.id != e.line_id);
            }
            TaskEvent::DiscrepancyFound(_) => {
                self.status = TaskStatus::PendingApproval;
            }
            TaskEvent::AdjustmentApproved(_) => {}
            TaskEvent::AdjustmentRejected(e) => {
                for line in self
                    .lines
                    .iter_mut()
                    .filter(|l| e.recount_lines.contains(&l.id))
                {
                    line.counted = None;
                    line.status = LineStatus::Pending;
                }
                self.last_rejection = Some(e.reason.clone());
                self.status = TaskStatus::InProgress;
            }
            TaskEvent::PriorityUpdated(e) => {
                self.priority = e.priority;
            }
            TaskEvent::Assigned(e) => {
                self.assignee = Some(e.assignee.clone());
                if self.status == TaskStatus::Pending {
                    self.status = TaskStatus::Assigned;
                }
            }
            TaskEvent::Completed(_) => {
                for line in &mut self.lines {
                    line.status = LineStatus::Verified;
                }
                self.status = TaskStatus::Completed;
            }
            TaskEvent::Cancelled(e) => {
                self.cancel_reason = Some(e.reason.clone());
                self.status = TaskStatus::Cancelled;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            TaskCommand::Create(cmd) => self.handle_create(cmd),
            TaskCommand::AddLine(cmd) => self.handle_add_line(cmd),
            TaskCommand::ReportLine(cmd) => self.handle_report(cmd),
            TaskCommand::RemoveLine(cmd) => self.handle_remove_line(cmd),
            TaskCommand::Approve(cmd) => self.handle_approve(cmd),
            TaskCommand::Reject(cmd) => self.handle_reject(cmd),
            TaskCommand::UpdatePriority(cmd) => self.handle_update_priority(cmd),
            TaskCommand::Assign(cmd) => self.handle_assign(cmd),
            TaskCommand::Cancel(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl InventoryTask {
    fn ensure_exists(&self, task_id: TaskId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("task {task_id}")));
        }
        if self.id != task_id {
            return Err(DomainError::invariant("task_id mismatch"));
        }
        Ok(())
    }

    fn ensure_not_terminal(&self) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::invalid_state(format!(
                "task {} is {:?} and can no longer change",
                self.id, self.status
            )));
        }
        Ok(())
    }

    fn ensure_pending_approval(&self) -> Result<(), DomainError> {
        if self.status != TaskStatus::PendingApproval {
            return Err(DomainError::invalid_state(format!(
                "task {} is {:?}, not awaiting approval",
                self.id, self.status
            )));
        }
        Ok(())
    }

    fn find_line(&self, line_id: LineId) -> Result<&TaskLine, DomainError> {
        self.line(line_id)
            .ok_or_else(|| DomainError::not_found(format!("line {line_id} on task {}", self.id)))
    }

    /// Apply `first` to a scratch copy and append whatever settlement follows.
    fn with_settlement(&self, first: TaskEvent, occurred_at: DateTime<Utc>) -> Vec<TaskEvent> {
        let mut next = self.clone();
        next.apply(&first);
        let mut events = vec![first];
        events.extend(next.settlement(occurred_at));
        events
    }

    fn handle_create(&self, cmd: &CreateTask) -> Result<Vec<TaskEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict(format!("task {} already exists", cmd.task_id)));
        }
        Ok(vec![TaskEvent::Created(TaskCreated {
            task_id: cmd.task_id,
            number: cmd.number.clone(),
            task_type: cmd.task_type,
            priority: cmd.priority,
            created_by: cmd.created_by.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddLine) -> Result<Vec<TaskEvent>, DomainError> {
        self.ensure_exists(cmd.task_id)?;
        if !self.status.accepts_counts() {
            return Err(DomainError::invalid_state(format!(
                "cannot add lines to a {:?} task",
                self.status
            )));
        }
        if cmd.expected < 0 {
            return Err(DomainError::NegativeQuantity(cmd.expected));
        }
        if self.lines.iter().any(|l| l.id == cmd.line_id) {
            return Err(DomainError::conflict(format!("line {} already exists", cmd.line_id)));
        }
        if self.lines.iter().any(|l| l.lpn_id == cmd.lpn_id) {
            return Err(DomainError::invariant(format!(
                "inventory unit {} already has a line on task {}",
                cmd.lpn_id, self.id
            )));
        }

        Ok(vec![TaskEvent::LineAdded(LineAdded {
            task_id: cmd.task_id,
            line_id: cmd.line_id,
            lpn_id: cmd.lpn_id.clone(),
            sku: cmd.sku.clone(),
            location: cmd.location.clone(),
            description: cmd.description.clone(),
            expected: cmd.expected,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_report(&self, cmd: &ReportLine) -> Result<Vec<TaskEvent>, DomainError> {
        self.ensure_exists(cmd.task_id)?;
        if !self.status.accepts_counts() {
            return Err(DomainError::invalid_state(format!(
                "task {} is {:?} and does not accept counts",
                self.id, self.status
            )));
        }
        if cmd.counted < 0 {
            return Err(DomainError::validation("counted quantity cannot be negative"));
        }
        let line = self.find_line(cmd.line_id)?;
        if self.task_type == TaskType::TakeSample && line.is_counted() {
            return Err(DomainError::invalid_state(format!(
                "sample for line {} was already taken",
                line.id
            )));
        }

        let reported = TaskEvent::LineReported(LineReported {
            task_id: cmd.task_id,
            line_id: line.id,
            lpn_id: line.lpn_id.clone(),
            expected: line.expected,
            counted: cmd.counted,
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        });
        Ok(self.with_settlement(reported, cmd.occurred_at))
    }

    fn handle_remove_line(&self, cmd: &RemoveLine) -> Result<Vec<TaskEvent>, DomainError> {
        self.ensure_exists(cmd.task_id)?;
        self.ensure_not_terminal()?;
        let line = self.find_line(cmd.line_id)?;

        let removed = TaskEvent::LineRemoved(LineRemoved {
            task_id: cmd.task_id,
            line_id: line.id,
            lpn_id: line.lpn_id.clone(),
            reason: cmd.reason.clone(),
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        });

        if self.lines.len() == 1 {
            return Ok(vec![
                removed,
                TaskEvent::Cancelled(TaskCancelled {
                    task_id: cmd.task_id,
                    reason: format!("last line removed: {}", cmd.reason),
                    actor: cmd.actor.clone(),
                    occurred_at: cmd.occurred_at,
                }),
            ]);
        }
        Ok(self.with_settlement(removed, cmd.occurred_at))
    }

    fn handle_approve(&self, cmd: &ApproveAdjustment) -> Result<Vec<TaskEvent>, DomainError> {
        self.ensure_exists(cmd.task_id)?;
        self.ensure_pending_approval()?;

        let lines = self
            .mismatched_lines()
            .map(|l| {
                let counted = l.counted.unwrap_or_default();
                ApprovedLine {
                    line_id: l.id,
                    lpn_id: l.lpn_id.clone(),
                    sku: l.sku.clone(),
                    location: l.location.clone(),
                    expected: l.expected,
                    counted,
                    difference: counted - l.expected,
                }
            })
            .collect();

        Ok(vec![
            TaskEvent::AdjustmentApproved(AdjustmentApproved {
                task_id: cmd.task_id,
                supervisor: cmd.supervisor.clone(),
                lines,
                occurred_at: cmd.occurred_at,
            }),
            TaskEvent::Completed(TaskCompleted {
                task_id: cmd.task_id,
                occurred_at: cmd.occurred_at,
            }),
        ])
    }

    fn handle_reject(&self, cmd: &RejectAdjustment) -> Result<Vec<TaskEvent>, DomainError> {
        self.ensure_exists(cmd.task_id)?;
        self.ensure_pending_approval()?;
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("rejection reason cannot be empty"));
        }
        // Sampled stock is already gone; a recount would remove it a second time.
        if self.task_type == TaskType::TakeSample {
            return Err(DomainError::invalid_state(format!(
                "task {} removed its samples when they were reported; approve or cancel it",
                self.id
            )));
        }

        Ok(vec![TaskEvent::AdjustmentRejected(AdjustmentRejected {
            task_id: cmd.task_id,
            reason: cmd.reason.clone(),
            actor: cmd.actor.clone(),
            recount_lines: self.mismatched_lines().map(|l| l.id).collect(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_priority(&self, cmd: &UpdatePriority) -> Result<Vec<TaskEvent>, DomainError> {
        self.ensure_exists(cmd.task_id)?;
        self.ensure_not_terminal()?;
        if cmd.priority == self.priority {
            return Ok(vec![]);
        }
        Ok(vec![TaskEvent::PriorityUpdated(PriorityUpdated {
            task_id: cmd.task_id,
            previous: self.priority,
            priority: cmd.priority,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_assign(&self, cmd: &AssignTask) -> Result<Vec<TaskEvent>, DomainError> {
        self.ensure_exists(cmd.task_id)?;
        self.ensure_not_terminal()?;
        Ok(vec![TaskEvent::Assigned(TaskAssigned {
            task_id: cmd.task_id,
            assignee: cmd.assignee.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelTask) -> Result<Vec<TaskEvent>, DomainError> {
        self.ensure_exists(cmd.task_id)?;
        self.ensure_not_terminal()?;
        Ok(vec![TaskEvent::Cancelled(TaskCancelled {
            task_id: cmd.task_id,
            reason: cmd.reason.clone(),
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::number::NumberPrefix;
    use proptest::prelude::*;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn actor() -> ActorId {
        ActorId::parse("op-7").unwrap()
    }

    fn new_task(task_type: TaskType, expected: &[i64]) -> (InventoryTask, Vec<LineId>) {
        let task_id = TaskId::new();
        let mut task = InventoryTask::empty(task_id);
        task.execute(&TaskCommand::Create(CreateTask {
            task_id,
            number: TaskNumber::generate(NumberPrefix::Batch, test_time()),
            task_type,
            priority: TaskPriority::Normal,
            created_by: actor(),
            occurred_at: test_time(),
        }))
        .unwrap();

        let mut line_ids = Vec::new();
        for (i, qty) in expected.iter().enumerate() {
            let line_id = LineId::new();
            task.execute(&TaskCommand::AddLine(AddLine {
                task_id,
                line_id,
                lpn_id: LpnId::parse(format!("LPN-{i}")).unwrap(),
                sku: Sku::parse("SKU-1").unwrap(),
                location: Some(LocationId::parse("A-01").unwrap()),
                description: "SKU-1 @ A-01".to_string(),
                expected: *qty,
                occurred_at: test_time(),
            }))
            .unwrap();
            line_ids.push(line_id);
        }
        (task, line_ids)
    }

    fn report(task: &InventoryTask, line_id: LineId, counted: i64) -> TaskCommand {
        TaskCommand::ReportLine(ReportLine {
            task_id: task.task_id(),
            line_id,
            counted,
            actor: actor(),
            occurred_at: test_time(),
        })
    }

    fn remove(task: &InventoryTask, line_id: LineId) -> TaskCommand {
        TaskCommand::RemoveLine(RemoveLine {
            task_id: task.task_id(),
            line_id,
            reason: "unit damaged".to_string(),
            actor: actor(),
            occurred_at: test_time(),
        })
    }

    #[test]
    fn partial_report_moves_task_in_progress() {
        let (mut task, lines) = new_task(TaskType::CycleCount, &[10, 5]);
        let events = task.execute(&report(&task, lines[0], 10)).unwrap();

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], TaskEvent::LineReported(_)));
        assert_eq!(task.status(), TaskStatus::InProgress);
        assert_eq!(task.line(lines[0]).unwrap().status, LineStatus::Counted);
    }

    #[test]
    fn all_matching_counts_complete_the_task() {
        let (mut task, lines) = new_task(TaskType::CycleCount, &[10, 5]);
        task.execute(&report(&task, lines[0], 10)).unwrap();
        let events = task.execute(&report(&task, lines[1], 5)).unwrap();

        assert!(matches!(events[0], TaskEvent::LineReported(_)));
        assert!(matches!(events[1], TaskEvent::Completed(_)));
        assert_eq!(task.status(), TaskStatus::Completed);
        assert!(task.lines().iter().all(|l| l.status == LineStatus::Verified));
    }

    #[test]
    fn one_mismatch_routes_whole_task_to_approval() {
        let (mut task, lines) = new_task(TaskType::CycleCount, &[10, 5]);
        task.execute(&report(&task, lines[0], 10)).unwrap();
        let events = task.execute(&report(&task, lines[1], 4)).unwrap();

        match &events[1] {
            TaskEvent::DiscrepancyFound(e) => {
                assert_eq!(e.discrepancies.len(), 1);
                assert_eq!(e.discrepancies[0].line_id, lines[1]);
            }
            _ => panic!("Expected DiscrepancyFound event"),
        }
        assert_eq!(task.status(), TaskStatus::PendingApproval);
    }

    #[test]
    fn approval_covers_every_mismatched_line() {
        let (mut task, lines) = new_task(TaskType::CycleCount, &[10, 5, 3]);
        task.execute(&report(&task, lines[0], 9)).unwrap();
        task.execute(&report(&task, lines[1], 5)).unwrap();
        task.execute(&report(&task, lines[2], 7)).unwrap();

        let events = task
            .execute(&TaskCommand::Approve(ApproveAdjustment {
                task_id: task.task_id(),
                supervisor: ActorId::parse("sup-1").unwrap(),
                occurred_at: test_time(),
            }))
            .unwrap();

        match &events[0] {
            TaskEvent::AdjustmentApproved(e) => {
                let diffs: Vec<i64> = e.lines.iter().map(|l| l.difference).collect();
                assert_eq!(diffs, vec![-1, 4]);
            }
            _ => panic!("Expected AdjustmentApproved event"),
        }
        assert!(matches!(events[1], TaskEvent::Completed(_)));
        assert_eq!(task.status(), TaskStatus::Completed);
    }

    #[test]
    fn approve_outside_pending_approval_is_invalid_state() {
        let (task, _) = new_task(TaskType::CycleCount, &[1]);
        let err = task
            .handle(&TaskCommand::Approve(ApproveAdjustment {
                task_id: task.task_id(),
                supervisor: actor(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn reject_returns_disputed_lines_for_recount() {
        let (mut task, lines) = new_task(TaskType::CycleCount, &[10, 5]);
        task.execute(&report(&task, lines[0], 10)).unwrap();
        task.execute(&report(&task, lines[1], 4)).unwrap();

        task.execute(&TaskCommand::Reject(RejectAdjustment {
            task_id: task.task_id(),
            reason: "recount aisle".to_string(),
            actor: ActorId::parse("sup-1").unwrap(),
            occurred_at: test_time(),
        }))
        .unwrap();

        assert_eq!(task.status(), TaskStatus::InProgress);
        assert_eq!(task.last_rejection(), Some("recount aisle"));
        assert_eq!(task.line(lines[0]).unwrap().status, LineStatus::Counted);
        let disputed = task.line(lines[1]).unwrap();
        assert_eq!(disputed.status, LineStatus::Pending);
        assert_eq!(disputed.counted, None);

        let events = task.execute(&report(&task, lines[1], 5)).unwrap();
        assert!(matches!(events[1], TaskEvent::Completed(_)));
    }

    #[test]
    fn removing_last_line_cancels_task() {
        let (mut task, lines) = new_task(TaskType::CycleCount, &[3]);
        let events = task.execute(&remove(&task, lines[0])).unwrap();

        assert!(matches!(events[0], TaskEvent::LineRemoved(_)));
        assert!(matches!(events[1], TaskEvent::Cancelled(_)));
        assert_eq!(task.status(), TaskStatus::Cancelled);
        assert!(task.lines().is_empty());
    }

    #[test]
    fn removing_only_pending_line_settles_remaining_counts() {
        let (mut task, lines) = new_task(TaskType::CycleCount, &[3, 8]);
        task.execute(&report(&task, lines[0], 3)).unwrap();
        let events = task.execute(&remove(&task, lines[1])).unwrap();

        assert!(matches!(events[1], TaskEvent::Completed(_)));
        assert_eq!(task.status(), TaskStatus::Completed);
    }

    #[test]
    fn removing_unknown_line_is_not_found() {
        let (task, _) = new_task(TaskType::CycleCount, &[3]);
        let err = task.handle(&remove(&task, LineId::new())).unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn sample_line_cannot_be_reported_twice() {
        let (mut task, lines) = new_task(TaskType::TakeSample, &[10, 4]);
        task.execute(&report(&task, lines[0], 1)).unwrap();
        let err = task.handle(&report(&task, lines[0], 1)).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn sample_discrepancy_cannot_be_rejected() {
        let (mut task, lines) = new_task(TaskType::TakeSample, &[10]);
        task.execute(&report(&task, lines[0], 1)).unwrap();
        assert_eq!(task.status(), TaskStatus::PendingApproval);

        let err = task
            .handle(&TaskCommand::Reject(RejectAdjustment {
                task_id: task.task_id(),
                reason: "wrong bin".to_string(),
                actor: ActorId::parse("sup-1").unwrap(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
        assert_eq!(task.status(), TaskStatus::PendingApproval);
        assert_eq!(task.line(lines[0]).unwrap().counted, Some(1));
    }

    #[test]
    fn completed_task_is_immutable() {
        let (mut task, lines) = new_task(TaskType::CycleCount, &[2]);
        task.execute(&report(&task, lines[0], 2)).unwrap();
        assert_eq!(task.status(), TaskStatus::Completed);

        let err = task
            .handle(&TaskCommand::UpdatePriority(UpdatePriority {
                task_id: task.task_id(),
                priority: TaskPriority::Critical,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
        assert!(task.handle(&report(&task, lines[0], 2)).is_err());
        assert!(
            task.handle(&TaskCommand::Cancel(CancelTask {
                task_id: task.task_id(),
                reason: "late".to_string(),
                actor: actor(),
                occurred_at: test_time(),
            }))
            .is_err()
        );
    }

    #[test]
    fn assigning_pending_task_marks_it_assigned() {
        let (mut task, _) = new_task(TaskType::Investigation, &[1]);
        task.execute(&TaskCommand::Assign(AssignTask {
            task_id: task.task_id(),
            assignee: ActorId::parse("op-2").unwrap(),
            occurred_at: test_time(),
        }))
        .unwrap();
        assert_eq!(task.status(), TaskStatus::Assigned);
        assert_eq!(task.assignee().map(ActorId::as_str), Some("op-2"));
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let (task, lines) = new_task(TaskType::CycleCount, &[4]);
        let before = task.clone();
        let _ = task.handle(&report(&task, lines[0], 4)).unwrap();
        assert_eq!(task, before);
    }

    #[test]
    fn priorities_order_by_urgency() {
        assert!(TaskPriority::Critical > TaskPriority::High);
        assert!(TaskPriority::Normal > TaskPriority::Low);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: once every line is counted the status is exactly
        /// determined by whether any count differs from its expectation.
        #[test]
        fn status_is_a_function_of_line_counts(
            pairs in prop::collection::vec((0i64..20, 0i64..20), 1..8)
        ) {
            let expected: Vec<i64> = pairs.iter().map(|(e, _)| *e).collect();
            let (mut task, lines) = new_task(TaskType::CycleCount, &expected);
            for (line_id, (_, counted)) in lines.iter().zip(&pairs) {
                task.execute(&report(&task, *line_id, *counted)).unwrap();
            }

            let any_mismatch = pairs.iter().any(|(e, c)| e != c);
            let want = if any_mismatch {
                TaskStatus::PendingApproval
            } else {
                TaskStatus::Completed
            };
            prop_assert_eq!(task.status(), want);
        }
    }
}
