//! Inventory task domain module (event-sourced).
//!
//! Tasks are units of operator work (cycle counts, putaway checks,
//! replenishment, investigations, destructive samples) spanning one or more
//! inventory units. This crate holds the task/line state machine and the
//! task-number format; locking the units themselves is coordinated by the
//! orchestration service.

pub mod number;
pub mod task;

pub use number::{NumberPrefix, TaskNumber};
pub use task::{
    AddLine, AdjustmentApproved, AdjustmentRejected, ApproveAdjustment, ApprovedLine, AssignTask,
    CancelTask, CreateTask, Discrepancy, DiscrepancyFound, InventoryTask, LineAdded, LineRemoved,
    LineReported, LineStatus, PriorityUpdated, RejectAdjustment, RemoveLine, ReportLine,
    TaskAssigned, TaskCancelled, TaskCommand, TaskCompleted, TaskCreated, TaskEvent, TaskLine,
    TaskPriority, TaskStatus, TaskType, UpdatePriority,
};
