//! Inventory unit (LPN) domain module (event-sourced).
//!
//! Business rules for license-plated containers, implemented purely as
//! deterministic domain logic (no IO, no storage). Task locking, quantity
//! mutation and lifecycle transitions all go through [`InventoryUnit`].

pub mod lpn;

pub use lpn::{
    AdjustQuantity, AllocateUnit, ConsumeUnit, ContainerType, DeallocateUnit, Eligibility,
    InventoryUnit, LockToTask, LockedToTask, LpnCommand, LpnEvent, LpnStatus, MakeAvailable,
    PhysicalAttributes, PutawayUnit, QuantityAdjusted, ReceiveUnit, ReleaseFromTask,
    ReleasedFromTask, UnitAllocated, UnitConsumed, UnitDeallocated, UnitMadeAvailable,
    UnitPutAway, UnitReceived, UnitVoided, UnlockFromTask, UnlockedFromTask, VoidUnit,
};
