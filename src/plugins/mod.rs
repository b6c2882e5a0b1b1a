//! Governance components. Leaves first: the registry has no dependencies,
//! the allocator and isolation enforcer consult it per call.

pub mod allocator;
pub mod challenge;
pub mod decision;
pub mod gate;
pub mod isolation;
pub mod protection;
pub mod registry;
