use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lpnflow_core::{
    ActorId, Aggregate, AggregateRoot, DomainError, LocationId, LpnId, Sku, StationId, TaskId,
};
use lpnflow_events::Event;

/// Lifecycle status of an inventory unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LpnStatus {
    Created,
    Received,
    Putaway,
    Available,
    Allocated,
    Picked,
    Dispatched,
    Shipped,
    Quarantine,
    Counting,
    Consumed,
    Voided,
}

impl LpnStatus {
    /// Voided and Consumed units never come back: they are excluded from active
    /// inventory and from task eligibility.
    pub fn is_terminal(self) -> bool {
        matches!(self, LpnStatus::Consumed | LpnStatus::Voided)
    }

    /// Presentation code used at the boundary (labels, handheld screens).
    pub fn as_code(self) -> &'static str {
        match self {
            LpnStatus::Created => "CRT",
            LpnStatus::Received => "RCV",
            LpnStatus::Putaway => "PUT",
            LpnStatus::Available => "AVL",
            LpnStatus::Allocated => "ALC",
            LpnStatus::Picked => "PCK",
            LpnStatus::Dispatched => "DSP",
            LpnStatus::Shipped => "SHP",
            LpnStatus::Quarantine => "QRT",
            LpnStatus::Counting => "CNT",
            LpnStatus::Consumed => "CSM",
            LpnStatus::Voided => "VOD",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ContainerType {
    #[default]
    Loose,
    Pack,
    Pallet,
}

/// Physical attributes in integral units (grams, millimetres).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PhysicalAttributes {
    pub weight_grams: u32,
    pub length_mm: u32,
    pub width_mm: u32,
    pub height_mm: u32,
}

/// Why a unit cannot join a task, if it cannot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    Locked(TaskId),
    Allocated,
    Terminal,
}

/// Aggregate root: InventoryUnit (a license-plated container of one SKU).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryUnit {
    id: LpnId,
    sku: Option<Sku>,
    quantity: i64,
    allocated_quantity: i64,
    location: Option<LocationId>,
    task_lock: Option<TaskId>,
    status: LpnStatus,
    status_before_lock: Option<LpnStatus>,
    container_type: ContainerType,
    attributes: PhysicalAttributes,
    origin_order: Option<String>,
    created_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl InventoryUnit {
    /// Create an empty, not-yet-received aggregate instance.
    pub fn empty(id: LpnId) -> Self {
        Self {
            id,
            sku: None,
            quantity: 0,
            allocated_quantity: 0,
            location: None,
            task_lock: None,
            status: LpnStatus::Created,
            status_before_lock: None,
            container_type: ContainerType::default(),
            attributes: PhysicalAttributes::default(),
            origin_order: None,
            created_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn lpn_id(&self) -> &LpnId {
        &self.id
    }

    pub fn sku(&self) -> Option<&Sku> {
        self.sku.as_ref()
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn allocated_quantity(&self) -> i64 {
        self.allocated_quantity
    }

    pub fn location(&self) -> Option<&LocationId> {
        self.location.as_ref()
    }

    pub fn task_lock(&self) -> Option<TaskId> {
        self.task_lock
    }

    pub fn status(&self) -> LpnStatus {
        self.status
    }

    pub fn container_type(&self) -> ContainerType {
        self.container_type
    }

    pub fn attributes(&self) -> PhysicalAttributes {
        self.attributes
    }

    pub fn origin_order(&self) -> Option<&str> {
        self.origin_order.as_deref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn is_active(&self) -> bool {
        self.created && !self.status.is_terminal()
    }

    /// Whether this unit may be bound to a new task line.
    pub fn eligibility(&self) -> Eligibility {
        if let Some(task_id) = self.task_lock {
            return Eligibility::Locked(task_id);
        }
        if self.status.is_terminal() {
            return Eligibility::Terminal;
        }
        if self.allocated_quantity > 0 || self.status == LpnStatus::Allocated {
            return Eligibility::Allocated;
        }
        Eligibility::Eligible
    }

    /// Human-readable line description: SKU plus location.
    pub fn describe(&self) -> String {
        let sku = self.sku.as_ref().map(Sku::as_str).unwrap_or("?");
        match &self.location {
            Some(location) => format!("{sku} @ {location}"),
            None => format!("{sku} @ (no location)"),
        }
    }
}

impl AggregateRoot for InventoryUnit {
    type Id = LpnId;

    const AGGREGATE_TYPE: &'static str = "inventory.lpn";

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: ReceiveUnit (creation on receipt).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveUnit {
    pub lpn_id: LpnId,
    pub sku: Sku,
    pub quantity: i64,
    pub container_type: ContainerType,
    pub attributes: PhysicalAttributes,
    pub location: LocationId,
    pub origin_order: Option<String>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: PutawayUnit (move to a storage location).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutawayUnit {
    pub lpn_id: LpnId,
    pub location: LocationId,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MakeAvailable (release received/putaway/quarantined stock for use).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MakeAvailable {
    pub lpn_id: LpnId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AllocateUnit (reserve for outbound).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocateUnit {
    pub lpn_id: LpnId,
    pub quantity: i64,
    pub order_ref: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeallocateUnit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeallocateUnit {
    pub lpn_id: LpnId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: LockToTask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockToTask {
    pub lpn_id: LpnId,
    pub task_id: TaskId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReleaseFromTask (normal end of the task's work on this unit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseFromTask {
    pub lpn_id: LpnId,
    pub task_id: TaskId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UnlockFromTask (line surgically removed from an open task).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockFromTask {
    pub lpn_id: LpnId,
    pub task_id: TaskId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdjustQuantity (absolute new on-hand quantity).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustQuantity {
    pub lpn_id: LpnId,
    pub new_quantity: i64,
    pub reason_code: String,
    pub actor: ActorId,
    pub station: Option<StationId>,
    /// Task making the change. Required while the unit is locked.
    pub task_id: Option<TaskId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConsumeUnit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeUnit {
    pub lpn_id: LpnId,
    pub actor: ActorId,
    pub station: Option<StationId>,
    /// Task consuming the unit. Required while the unit is locked.
    pub task_id: Option<TaskId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: VoidUnit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoidUnit {
    pub lpn_id: LpnId,
    pub reason: String,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LpnCommand {
    Receive(ReceiveUnit),
    Putaway(PutawayUnit),
    MakeAvailable(MakeAvailable),
    Allocate(AllocateUnit),
    Deallocate(DeallocateUnit),
    LockToTask(LockToTask),
    ReleaseFromTask(ReleaseFromTask),
    UnlockFromTask(UnlockFromTask),
    AdjustQuantity(AdjustQuantity),
    Consume(ConsumeUnit),
    Void(VoidUnit),
}

impl LpnCommand {
    /// Unit the command targets.
    pub fn lpn_id(&self) -> &LpnId {
        match self {
            LpnCommand::Receive(c) => &c.lpn_id,
            LpnCommand::Putaway(c) => &c.lpn_id,
            LpnCommand::MakeAvailable(c) => &c.lpn_id,
            LpnCommand::Allocate(c) => &c.lpn_id,
            LpnCommand::Deallocate(c) => &c.lpn_id,
            LpnCommand::LockToTask(c) => &c.lpn_id,
            LpnCommand::ReleaseFromTask(c) => &c.lpn_id,
            LpnCommand::UnlockFromTask(c) => &c.lpn_id,
            LpnCommand::AdjustQuantity(c) => &c.lpn_id,
            LpnCommand::Consume(c) => &c.lpn_id,
            LpnCommand::Void(c) => &c.lpn_id,
        }
    }

    /// Commands issued on behalf of a task: lock transitions, and quantity
    /// changes made by the task holding the unit. These belong to task
    /// operations, not to direct unit handling.
    pub fn is_task_driven(&self) -> bool {
        match self {
            LpnCommand::LockToTask(_)
            | LpnCommand::ReleaseFromTask(_)
            | LpnCommand::UnlockFromTask(_) => true,
            LpnCommand::AdjustQuantity(c) => c.task_id.is_some(),
            LpnCommand::Consume(c) => c.task_id.is_some(),
            _ => false,
        }
    }
}

/// Event: UnitReceived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitReceived {
    pub lpn_id: LpnId,
    pub sku: Sku,
    pub quantity: i64,
    pub container_type: ContainerType,
    pub attributes: PhysicalAttributes,
    pub location: LocationId,
    pub origin_order: Option<String>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: UnitPutAway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitPutAway {
    pub lpn_id: LpnId,
    pub from: Option<LocationId>,
    pub to: LocationId,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: UnitMadeAvailable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitMadeAvailable {
    pub lpn_id: LpnId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: UnitAllocated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitAllocated {
    pub lpn_id: LpnId,
    pub quantity: i64,
    pub order_ref: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: UnitDeallocated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitDeallocated {
    pub lpn_id: LpnId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LockedToTask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedToTask {
    pub lpn_id: LpnId,
    pub task_id: TaskId,
    pub previous_status: LpnStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReleasedFromTask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleasedFromTask {
    pub lpn_id: LpnId,
    pub task_id: TaskId,
    pub restored_status: LpnStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: UnlockedFromTask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockedFromTask {
    pub lpn_id: LpnId,
    pub task_id: TaskId,
    pub reason: String,
    /// `None` when the unit had already left `Counting` (e.g. consumed).
    pub restored_status: Option<LpnStatus>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: QuantityAdjusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantityAdjusted {
    pub lpn_id: LpnId,
    pub previous_quantity: i64,
    pub new_quantity: i64,
    pub reason_code: String,
    pub actor: ActorId,
    pub station: Option<StationId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: UnitConsumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitConsumed {
    pub lpn_id: LpnId,
    pub actor: ActorId,
    pub station: Option<StationId>,
    /// Task lock dropped by the consumption, if any.
    pub released_task: Option<TaskId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: UnitVoided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitVoided {
    pub lpn_id: LpnId,
    pub reason: String,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LpnEvent {
    Received(UnitReceived),
    PutAway(UnitPutAway),
    MadeAvailable(UnitMadeAvailable),
    Allocated(UnitAllocated),
    Deallocated(UnitDeallocated),
    LockedToTask(LockedToTask),
    ReleasedFromTask(ReleasedFromTask),
    UnlockedFromTask(UnlockedFromTask),
    QuantityAdjusted(QuantityAdjusted),
    Consumed(UnitConsumed),
    Voided(UnitVoided),
}

impl Event for LpnEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LpnEvent::Received(_) => "inventory.lpn.received",
            LpnEvent::PutAway(_) => "inventory.lpn.put_away",
            LpnEvent::MadeAvailable(_) => "inventory.lpn.made_available",
            LpnEvent::Allocated(_) => "inventory.lpn.allocated",
            LpnEvent::Deallocated(_) => "inventory.lpn.deallocated",
            LpnEvent::LockedToTask(_) => "inventory.lpn.locked_to_task",
            LpnEvent::ReleasedFromTask(_) => "inventory.lpn.released_from_task",
            LpnEvent::UnlockedFromTask(_) => "inventory.lpn.unlocked_from_task",
            LpnEvent::QuantityAdjusted(_) => "inventory.lpn.quantity_adjusted",
            LpnEvent::Consumed(_) => "inventory.lpn.consumed",
            LpnEvent::Voided(_) => "inventory.lpn.voided",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LpnEvent::Received(e) => e.occurred_at,
            LpnEvent::PutAway(e) => e.occurred_at,
            LpnEvent::MadeAvailable(e) => e.occurred_at,
            LpnEvent::Allocated(e) => e.occurred_at,
            LpnEvent::Deallocated(e) => e.occurred_at,
            LpnEvent::LockedToTask(e) => e.occurred_at,
            LpnEvent::ReleasedFromTask(e) => e.occurred_at,
            LpnEvent::UnlockedFromTask(e) => e.occurred_at,
            LpnEvent::QuantityAdjusted(e) => e.occurred_at,
            LpnEvent::Consumed(e) => e.occurred_at,
            LpnEvent::Voided(e) => e.occurred_at,
        }
    }
}

impl Aggregate for InventoryUnit {
    type Command = LpnCommand;
    type Event = LpnEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            LpnEvent::Received(e) => {
                self.id = e.lpn_id.clone();
                self.sku = Some(e.sku.clone());
                self.quantity = e.quantity;
                self.allocated_quantity = 0;
                self.location = Some(e.location.clone());
                self.task_lock = None;
                self.status = LpnStatus::Received;
                self.status_before_lock = None;
                self.container_type = e.container_type;
                self.attributes = e.attributes;
                self.origin_order = e.origin_order.clone();
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            LpnEvent::PutAway(e) => {
                self.location = Some(e.to.clone());
                if self.task_lock.is_some() {
                    self.status_before_lock = Some(LpnStatus::Putaway);
                } else if self.allocated_quantity == 0 {
                    self.status = LpnStatus::Putaway;
                }
            }
            LpnEvent::MadeAvailable(_) => {
                self.status = LpnStatus::Available;
            }
            LpnEvent::Allocated(e) => {
                self.allocated_quantity += e.quantity;
                self.status = LpnStatus::Allocated;
            }
            LpnEvent::Deallocated(e) => {
                self.allocated_quantity -= e.quantity;
                if self.allocated_quantity == 0 && self.task_lock.is_none() {
                    self.status = LpnStatus::Available;
                }
            }
            LpnEvent::LockedToTask(e) => {
                self.task_lock = Some(e.task_id);
                self.status_before_lock = Some(e.previous_status);
                self.status = LpnStatus::Counting;
            }
            LpnEvent::ReleasedFromTask(e) => {
                self.task_lock = None;
                self.status_before_lock = None;
                self.status = e.restored_status;
            }
            LpnEvent::UnlockedFromTask(e) => {
                self.task_lock = None;
                self.status_before_lock = None;
                if let Some(status) = e.restored_status {
                    self.status = status;
                }
            }
            LpnEvent::QuantityAdjusted(e) => {
                self.quantity = e.new_quantity;
            }
            LpnEvent::Consumed(_) => {
                self.quantity = 0;
                self.task_lock = None;
                self.status_before_lock = None;
                self.status = LpnStatus::Consumed;
            }
            LpnEvent::Voided(_) => {
                self.status = LpnStatus::Voided;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            LpnCommand::Receive(cmd) => self.handle_receive(cmd),
            LpnCommand::Putaway(cmd) => self.handle_putaway(cmd),
            LpnCommand::MakeAvailable(cmd) => self.handle_make_available(cmd),
            LpnCommand::Allocate(cmd) => self.handle_allocate(cmd),
            LpnCommand::Deallocate(cmd) => self.handle_deallocate(cmd),
            LpnCommand::LockToTask(cmd) => self.handle_lock(cmd),
            LpnCommand::ReleaseFromTask(cmd) => self.handle_release(cmd),
            LpnCommand::UnlockFromTask(cmd) => self.handle_unlock(cmd),
            LpnCommand::AdjustQuantity(cmd) => self.handle_adjust(cmd),
            LpnCommand::Consume(cmd) => self.handle_consume(cmd),
            LpnCommand::Void(cmd) => self.handle_void(cmd),
        }
    }
}

impl InventoryUnit {
    fn ensure_exists(&self, lpn_id: &LpnId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("inventory unit {lpn_id}")));
        }
        if &self.id != lpn_id {
            return Err(DomainError::invariant("lpn_id mismatch"));
        }
        Ok(())
    }

    fn ensure_not_terminal(&self) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::invalid_state(format!(
                "inventory unit {} is {:?}",
                self.id, self.status
            )));
        }
        Ok(())
    }

    /// A locked unit only changes on behalf of the task holding it.
    fn ensure_held_by(&self, task_id: Option<TaskId>) -> Result<(), DomainError> {
        match self.task_lock {
            Some(lock) if task_id != Some(lock) => Err(DomainError::invalid_state(format!(
                "inventory unit {} is locked by task {lock}",
                self.id
            ))),
            _ => Ok(()),
        }
    }

    fn ensure_locked_by(&self, task_id: TaskId) -> Result<(), DomainError> {
        if self.task_lock != Some(task_id) {
            return Err(DomainError::invalid_state(format!(
                "inventory unit {} is not locked by task {task_id}",
                self.id
            )));
        }
        Ok(())
    }

    fn handle_receive(&self, cmd: &ReceiveUnit) -> Result<Vec<LpnEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict(format!(
                "inventory unit {} already exists",
                cmd.lpn_id
            )));
        }
        if cmd.quantity < 0 {
            return Err(DomainError::NegativeQuantity(cmd.quantity));
        }
        Ok(vec![LpnEvent::Received(UnitReceived {
            lpn_id: cmd.lpn_id.clone(),
            sku: cmd.sku.clone(),
            quantity: cmd.quantity,
            container_type: cmd.container_type,
            attributes: cmd.attributes,
            location: cmd.location.clone(),
            origin_order: cmd.origin_order.clone(),
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_putaway(&self, cmd: &PutawayUnit) -> Result<Vec<LpnEvent>, DomainError> {
        self.ensure_exists(&cmd.lpn_id)?;
        self.ensure_not_terminal()?;
        Ok(vec![LpnEvent::PutAway(UnitPutAway {
            lpn_id: cmd.lpn_id.clone(),
            from: self.location.clone(),
            to: cmd.location.clone(),
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_make_available(&self, cmd: &MakeAvailable) -> Result<Vec<LpnEvent>, DomainError> {
        self.ensure_exists(&cmd.lpn_id)?;
        self.ensure_not_terminal()?;
        if self.task_lock.is_some() {
            return Err(DomainError::invalid_state("unit is locked by a task"));
        }
        if self.allocated_quantity > 0 {
            return Err(DomainError::invalid_state(format!(
                "inventory unit {} still has {} units reserved for outbound",
                self.id, self.allocated_quantity
            )));
        }
        if !matches!(
            self.status,
            LpnStatus::Received | LpnStatus::Putaway | LpnStatus::Quarantine
        ) {
            return Err(DomainError::invalid_state(format!(
                "cannot make a {:?} unit available",
                self.status
            )));
        }
        Ok(vec![LpnEvent::MadeAvailable(UnitMadeAvailable {
            lpn_id: cmd.lpn_id.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_allocate(&self, cmd: &AllocateUnit) -> Result<Vec<LpnEvent>, DomainError> {
        self.ensure_exists(&cmd.lpn_id)?;
        self.ensure_not_terminal()?;
        if let Some(task_id) = self.task_lock {
            return Err(DomainError::not_eligible(format!(
                "inventory unit {} is locked by task {task_id}",
                self.id
            )));
        }
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("allocation quantity must be positive"));
        }
        if self.allocated_quantity + cmd.quantity > self.quantity {
            return Err(DomainError::invariant(
                "allocated quantity cannot exceed on-hand quantity",
            ));
        }
        Ok(vec![LpnEvent::Allocated(UnitAllocated {
            lpn_id: cmd.lpn_id.clone(),
            quantity: cmd.quantity,
            order_ref: cmd.order_ref.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deallocate(&self, cmd: &DeallocateUnit) -> Result<Vec<LpnEvent>, DomainError> {
        self.ensure_exists(&cmd.lpn_id)?;
        self.ensure_not_terminal()?;
        self.ensure_held_by(None)?;
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("deallocation quantity must be positive"));
        }
        if cmd.quantity > self.allocated_quantity {
            return Err(DomainError::invariant(
                "cannot deallocate more than the allocated quantity",
            ));
        }
        Ok(vec![LpnEvent::Deallocated(UnitDeallocated {
            lpn_id: cmd.lpn_id.clone(),
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_lock(&self, cmd: &LockToTask) -> Result<Vec<LpnEvent>, DomainError> {
        self.ensure_exists(&cmd.lpn_id)?;
        match self.eligibility() {
            Eligibility::Eligible => {}
            Eligibility::Locked(task_id) => {
                return Err(DomainError::AlreadyLocked {
                    lpn: self.id.to_string(),
                    task: task_id.to_string(),
                });
            }
            Eligibility::Allocated => {
                return Err(DomainError::not_eligible(format!(
                    "inventory unit {} is reserved for outbound",
                    self.id
                )));
            }
            Eligibility::Terminal => {
                return Err(DomainError::not_eligible(format!(
                    "inventory unit {} is {:?}",
                    self.id, self.status
                )));
            }
        }
        Ok(vec![LpnEvent::LockedToTask(LockedToTask {
            lpn_id: cmd.lpn_id.clone(),
            task_id: cmd.task_id,
            previous_status: self.status,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_release(&self, cmd: &ReleaseFromTask) -> Result<Vec<LpnEvent>, DomainError> {
        self.ensure_exists(&cmd.lpn_id)?;
        self.ensure_locked_by(cmd.task_id)?;
        Ok(vec![LpnEvent::ReleasedFromTask(ReleasedFromTask {
            lpn_id: cmd.lpn_id.clone(),
            task_id: cmd.task_id,
            restored_status: self.status_before_lock.unwrap_or(LpnStatus::Available),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_unlock(&self, cmd: &UnlockFromTask) -> Result<Vec<LpnEvent>, DomainError> {
        self.ensure_exists(&cmd.lpn_id)?;
        self.ensure_locked_by(cmd.task_id)?;
        let restored_status = if self.status == LpnStatus::Counting {
            Some(self.status_before_lock.unwrap_or(LpnStatus::Available))
        } else {
            None
        };
        Ok(vec![LpnEvent::UnlockedFromTask(UnlockedFromTask {
            lpn_id: cmd.lpn_id.clone(),
            task_id: cmd.task_id,
            reason: cmd.reason.clone(),
            restored_status,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_adjust(&self, cmd: &AdjustQuantity) -> Result<Vec<LpnEvent>, DomainError> {
        self.ensure_exists(&cmd.lpn_id)?;
        if cmd.new_quantity < 0 {
            return Err(DomainError::NegativeQuantity(cmd.new_quantity));
        }
        self.ensure_not_terminal()?;
        self.ensure_held_by(cmd.task_id)?;
        if cmd.new_quantity < self.allocated_quantity {
            return Err(DomainError::invalid_state(format!(
                "on-hand quantity {} would drop below the allocated {}",
                cmd.new_quantity, self.allocated_quantity
            )));
        }
        if cmd.reason_code.trim().is_empty() {
            return Err(DomainError::validation("reason_code cannot be empty"));
        }
        if cmd.new_quantity == self.quantity {
            return Ok(vec![]);
        }
        Ok(vec![LpnEvent::QuantityAdjusted(QuantityAdjusted {
            lpn_id: cmd.lpn_id.clone(),
            previous_quantity: self.quantity,
            new_quantity: cmd.new_quantity,
            reason_code: cmd.reason_code.clone(),
            actor: cmd.actor.clone(),
            station: cmd.station.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_consume(&self, cmd: &ConsumeUnit) -> Result<Vec<LpnEvent>, DomainError> {
        self.ensure_exists(&cmd.lpn_id)?;
        self.ensure_not_terminal()?;
        self.ensure_held_by(cmd.task_id)?;
        if self.quantity != 0 {
            return Err(DomainError::invalid_state(format!(
                "inventory unit {} still holds {} units",
                self.id, self.quantity
            )));
        }
        Ok(vec![LpnEvent::Consumed(UnitConsumed {
            lpn_id: cmd.lpn_id.clone(),
            actor: cmd.actor.clone(),
            station: cmd.station.clone(),
            released_task: self.task_lock,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_void(&self, cmd: &VoidUnit) -> Result<Vec<LpnEvent>, DomainError> {
        self.ensure_exists(&cmd.lpn_id)?;
        self.ensure_not_terminal()?;
        if let Some(task_id) = self.task_lock {
            return Err(DomainError::invalid_state(format!(
                "remove inventory unit {} from task {task_id} before voiding it",
                self.id
            )));
        }
        Ok(vec![LpnEvent::Voided(UnitVoided {
            lpn_id: cmd.lpn_id.clone(),
            reason: cmd.reason.clone(),
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn lpn(id: &str) -> LpnId {
        LpnId::parse(id).unwrap()
    }

    fn actor() -> ActorId {
        ActorId::parse("op-1").unwrap()
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn received(id: &str, quantity: i64) -> InventoryUnit {
        let mut unit = InventoryUnit::empty(lpn(id));
        unit.execute(&LpnCommand::Receive(ReceiveUnit {
            lpn_id: lpn(id),
            sku: Sku::parse("SKU-1").unwrap(),
            quantity,
            container_type: ContainerType::Pallet,
            attributes: PhysicalAttributes::default(),
            location: LocationId::parse("A-01-01").unwrap(),
            origin_order: None,
            actor: actor(),
            occurred_at: test_time(),
        }))
        .unwrap();
        unit
    }

    fn lock(unit: &InventoryUnit, task_id: TaskId) -> LpnCommand {
        LpnCommand::LockToTask(LockToTask {
            lpn_id: unit.lpn_id().clone(),
            task_id,
            occurred_at: test_time(),
        })
    }

    fn adjust(unit: &InventoryUnit, new_quantity: i64) -> LpnCommand {
        adjust_by(unit, new_quantity, None)
    }

    fn adjust_by(unit: &InventoryUnit, new_quantity: i64, task_id: Option<TaskId>) -> LpnCommand {
        LpnCommand::AdjustQuantity(AdjustQuantity {
            lpn_id: unit.lpn_id().clone(),
            new_quantity,
            reason_code: "CYCLE_COUNT".to_string(),
            actor: actor(),
            station: None,
            task_id,
            occurred_at: test_time(),
        })
    }

    fn allocate(unit: &InventoryUnit, quantity: i64) -> LpnCommand {
        LpnCommand::Allocate(AllocateUnit {
            lpn_id: unit.lpn_id().clone(),
            quantity,
            order_ref: "SO-1".to_string(),
            occurred_at: test_time(),
        })
    }

    #[test]
    fn receive_sets_received_status_and_location() {
        let unit = received("LPN-1", 10);
        assert_eq!(unit.status(), LpnStatus::Received);
        assert_eq!(unit.quantity(), 10);
        assert_eq!(unit.location().map(LocationId::as_str), Some("A-01-01"));
        assert_eq!(unit.describe(), "SKU-1 @ A-01-01");
        assert_eq!(unit.version(), 1);
    }

    #[test]
    fn lock_moves_unit_to_counting() {
        let mut unit = received("LPN-1", 10);
        let task_id = TaskId::new();
        unit.execute(&lock(&unit, task_id)).unwrap();

        assert_eq!(unit.task_lock(), Some(task_id));
        assert_eq!(unit.status(), LpnStatus::Counting);
        assert_eq!(unit.eligibility(), Eligibility::Locked(task_id));
    }

    #[test]
    fn second_lock_fails_with_already_locked() {
        let mut unit = received("LPN-1", 10);
        unit.execute(&lock(&unit, TaskId::new())).unwrap();

        let err = unit.handle(&lock(&unit, TaskId::new())).unwrap_err();
        assert!(matches!(err, DomainError::AlreadyLocked { .. }));
    }

    #[test]
    fn allocated_unit_is_not_eligible() {
        let mut unit = received("LPN-1", 10);
        unit.execute(&allocate(&unit, 4)).unwrap();

        let err = unit.handle(&lock(&unit, TaskId::new())).unwrap_err();
        assert!(matches!(err, DomainError::NotEligible(_)));
    }

    #[test]
    fn release_restores_pre_task_status() {
        let mut unit = received("LPN-1", 10);
        unit.execute(&LpnCommand::MakeAvailable(MakeAvailable {
            lpn_id: lpn("LPN-1"),
            occurred_at: test_time(),
        }))
        .unwrap();
        let task_id = TaskId::new();
        unit.execute(&lock(&unit, task_id)).unwrap();

        unit.execute(&LpnCommand::ReleaseFromTask(ReleaseFromTask {
            lpn_id: lpn("LPN-1"),
            task_id,
            occurred_at: test_time(),
        }))
        .unwrap();

        assert_eq!(unit.task_lock(), None);
        assert_eq!(unit.status(), LpnStatus::Available);
    }

    #[test]
    fn release_by_foreign_task_is_rejected() {
        let mut unit = received("LPN-1", 10);
        unit.execute(&lock(&unit, TaskId::new())).unwrap();

        let err = unit
            .handle(&LpnCommand::ReleaseFromTask(ReleaseFromTask {
                lpn_id: lpn("LPN-1"),
                task_id: TaskId::new(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn putaway_while_locked_keeps_counting_status() {
        let mut unit = received("LPN-1", 10);
        let task_id = TaskId::new();
        unit.execute(&lock(&unit, task_id)).unwrap();
        unit.execute(&LpnCommand::Putaway(PutawayUnit {
            lpn_id: lpn("LPN-1"),
            location: LocationId::parse("B-02-03").unwrap(),
            actor: actor(),
            occurred_at: test_time(),
        }))
        .unwrap();
        assert_eq!(unit.status(), LpnStatus::Counting);

        unit.execute(&LpnCommand::ReleaseFromTask(ReleaseFromTask {
            lpn_id: lpn("LPN-1"),
            task_id,
            occurred_at: test_time(),
        }))
        .unwrap();
        assert_eq!(unit.status(), LpnStatus::Putaway);
        assert_eq!(unit.location().map(LocationId::as_str), Some("B-02-03"));
    }

    #[test]
    fn negative_adjustment_is_rejected() {
        let unit = received("LPN-1", 10);
        let err = unit.handle(&adjust(&unit, -1)).unwrap_err();
        assert_eq!(err, DomainError::NegativeQuantity(-1));
    }

    #[test]
    fn unchanged_quantity_emits_nothing() {
        let unit = received("LPN-1", 10);
        assert!(unit.handle(&adjust(&unit, 10)).unwrap().is_empty());
    }

    #[test]
    fn consume_requires_zero_quantity_and_drops_lock() {
        let mut unit = received("LPN-1", 1);
        let task_id = TaskId::new();
        unit.execute(&lock(&unit, task_id)).unwrap();

        let consume = LpnCommand::Consume(ConsumeUnit {
            lpn_id: lpn("LPN-1"),
            actor: actor(),
            station: None,
            task_id: Some(task_id),
            occurred_at: test_time(),
        });
        assert!(matches!(
            unit.handle(&consume).unwrap_err(),
            DomainError::InvalidState(_)
        ));

        unit.execute(&adjust_by(&unit, 0, Some(task_id))).unwrap();
        let events = unit.execute(&consume).unwrap();
        match &events[0] {
            LpnEvent::Consumed(e) => assert_eq!(e.released_task, Some(task_id)),
            _ => panic!("Expected Consumed event"),
        }
        assert_eq!(unit.status(), LpnStatus::Consumed);
        assert_eq!(unit.task_lock(), None);
        assert!(!unit.is_active());
        assert_eq!(unit.eligibility(), Eligibility::Terminal);
    }

    #[test]
    fn unlock_restores_status_while_counting() {
        let mut unit = received("LPN-1", 5);
        let task_id = TaskId::new();
        unit.execute(&lock(&unit, task_id)).unwrap();

        unit.execute(&LpnCommand::UnlockFromTask(UnlockFromTask {
            lpn_id: lpn("LPN-1"),
            task_id,
            reason: "line removed".to_string(),
            occurred_at: test_time(),
        }))
        .unwrap();
        assert_eq!(unit.task_lock(), None);
        assert_eq!(unit.status(), LpnStatus::Received);
    }

    #[test]
    fn putaway_keeps_reservation_ineligible() {
        let mut unit = received("LPN-1", 5);
        unit.execute(&allocate(&unit, 5)).unwrap();
        unit.execute(&LpnCommand::Putaway(PutawayUnit {
            lpn_id: lpn("LPN-1"),
            location: LocationId::parse("B-02-03").unwrap(),
            actor: actor(),
            occurred_at: test_time(),
        }))
        .unwrap();

        assert_eq!(unit.status(), LpnStatus::Allocated);
        assert_eq!(unit.location().map(LocationId::as_str), Some("B-02-03"));
        assert_eq!(unit.eligibility(), Eligibility::Allocated);
        assert!(matches!(
            unit.handle(&lock(&unit, TaskId::new())).unwrap_err(),
            DomainError::NotEligible(_)
        ));
        let err = unit
            .handle(&LpnCommand::MakeAvailable(MakeAvailable {
                lpn_id: lpn("LPN-1"),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn partial_reservation_is_ineligible() {
        let mut unit = received("LPN-1", 10);
        unit.execute(&allocate(&unit, 3)).unwrap();
        unit.execute(&LpnCommand::Deallocate(DeallocateUnit {
            lpn_id: lpn("LPN-1"),
            quantity: 2,
            occurred_at: test_time(),
        }))
        .unwrap();
        assert_eq!(unit.allocated_quantity(), 1);
        assert_eq!(unit.eligibility(), Eligibility::Allocated);
    }

    #[test]
    fn locked_unit_refuses_changes_from_outside_its_task() {
        let mut unit = received("LPN-1", 10);
        let task_id = TaskId::new();
        unit.execute(&lock(&unit, task_id)).unwrap();

        assert!(matches!(
            unit.handle(&adjust(&unit, 4)).unwrap_err(),
            DomainError::InvalidState(_)
        ));
        assert!(matches!(
            unit.handle(&adjust_by(&unit, 4, Some(TaskId::new()))).unwrap_err(),
            DomainError::InvalidState(_)
        ));
        assert!(matches!(
            unit.handle(&allocate(&unit, 1)).unwrap_err(),
            DomainError::NotEligible(_)
        ));
        let err = unit
            .handle(&LpnCommand::Deallocate(DeallocateUnit {
                lpn_id: lpn("LPN-1"),
                quantity: 1,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
        let err = unit
            .handle(&LpnCommand::Consume(ConsumeUnit {
                lpn_id: lpn("LPN-1"),
                actor: actor(),
                station: None,
                task_id: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));

        unit.execute(&adjust_by(&unit, 4, Some(task_id))).unwrap();
        assert_eq!(unit.quantity(), 4);
        assert_eq!(unit.status(), LpnStatus::Counting);
        assert_eq!(unit.task_lock(), Some(task_id));
    }

    #[test]
    fn task_driven_commands_are_recognised() {
        let unit = received("LPN-1", 10);
        assert!(lock(&unit, TaskId::new()).is_task_driven());
        assert!(adjust_by(&unit, 3, Some(TaskId::new())).is_task_driven());
        assert!(!adjust(&unit, 3).is_task_driven());
        assert!(!allocate(&unit, 1).is_task_driven());
    }

    #[test]
    fn void_of_locked_unit_is_rejected() {
        let mut unit = received("LPN-1", 5);
        unit.execute(&lock(&unit, TaskId::new())).unwrap();
        let err = unit
            .handle(&LpnCommand::Void(VoidUnit {
                lpn_id: lpn("LPN-1"),
                reason: "label damaged".to_string(),
                actor: actor(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn snapshot_serializes_and_restores() {
        let mut unit = received("LPN-1", 5);
        unit.execute(&lock(&unit, TaskId::new())).unwrap();
        let json = serde_json::to_value(&unit).unwrap();
        let restored: InventoryUnit = serde_json::from_value(json).unwrap();
        assert_eq!(restored, unit);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Adjust(i64),
        Allocate(i64),
        Deallocate(i64),
        Putaway,
        MakeAvailable,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (-20i64..200).prop_map(Op::Adjust),
            (-5i64..50).prop_map(Op::Allocate),
            (-5i64..50).prop_map(Op::Deallocate),
            Just(Op::Putaway),
            Just(Op::MakeAvailable),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: whatever sequence of commands is attempted, accepted ones never
        /// take quantity below zero or allocation above on-hand stock, and a unit
        /// with any reservation never becomes eligible for a task.
        #[test]
        fn quantity_invariants_hold(
            initial in 0i64..100,
            ops in prop::collection::vec(op_strategy(), 1..40)
        ) {
            let mut unit = received("LPN-P", initial);
            for op in ops {
                let cmd = match op {
                    Op::Adjust(q) => adjust(&unit, q),
                    Op::Allocate(q) => LpnCommand::Allocate(AllocateUnit {
                        lpn_id: lpn("LPN-P"),
                        quantity: q,
                        order_ref: "SO".to_string(),
                        occurred_at: test_time(),
                    }),
                    Op::Deallocate(q) => LpnCommand::Deallocate(DeallocateUnit {
                        lpn_id: lpn("LPN-P"),
                        quantity: q,
                        occurred_at: test_time(),
                    }),
                    Op::Putaway => LpnCommand::Putaway(PutawayUnit {
                        lpn_id: lpn("LPN-P"),
                        location: LocationId::parse("B-01").unwrap(),
                        actor: actor(),
                        occurred_at: test_time(),
                    }),
                    Op::MakeAvailable => LpnCommand::MakeAvailable(MakeAvailable {
                        lpn_id: lpn("LPN-P"),
                        occurred_at: test_time(),
                    }),
                };
                let _ = unit.execute(&cmd);
                prop_assert!(unit.quantity() >= 0);
                prop_assert!(unit.allocated_quantity() >= 0);
                prop_assert!(unit.allocated_quantity() <= unit.quantity());
                if unit.allocated_quantity() > 0 {
                    prop_assert_eq!(unit.eligibility(), Eligibility::Allocated);
                    prop_assert_eq!(unit.status(), LpnStatus::Allocated);
                }
            }
        }
    }
}
