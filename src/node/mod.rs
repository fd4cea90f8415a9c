// Node - Component wiring and lifecycle
pub mod service;

pub use service::{Node, NodeError, DRAIN_DEADLINE, GC_INTERVAL};
