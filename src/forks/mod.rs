// Forks - Live fork tracking, checkpoint boundaries, persistent projection
pub mod boundary;
pub mod events;
pub mod manager;
pub mod registry;

pub use boundary::{validate_boundary, BoundaryViolation};
pub use events::{EventSender, PruneReason, RegistryEvent};
pub use manager::{ForkManager, ReconcileOutcome};
pub use registry::{ForkRegistry, RegistryConfig, StrayForkPolicy};
