// Registry events - Typed event channel between the fork registry and
// downstream consumers (replication queue, fork manager, diagnostics)
//
// Consumers subscribe to a broadcast channel and match on the tag; there is
// no implicit dynamic dispatch between components.

use crate::forks::boundary::BoundaryViolation;
use crate::types::{BlockNumber, Checkpoint, ForkId, Operation, ProducerId};
use tokio::sync::broadcast;

/// Events to buffer per subscriber before lagging kicks in
pub const EVENT_CHANNEL_CAPACITY: usize = 4096;

/// Why a live fork was dropped from the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneReason {
    /// A sibling at the same block was confirmed
    LostToSibling,
    /// More forks at the block than the cap; fewer owners lost
    CapExceeded,
    /// No activity within the retention window
    Expired,
}

/// The registry's event sum type
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// A fork came into existence (explicitly or from a stray operation)
    ForkNew {
        fork: ForkId,
        block_num: BlockNumber,
        implicit: bool,
    },

    /// A producer moved its active fork
    ForkSwitch {
        producer: ProducerId,
        from: Option<ForkId>,
        to: ForkId,
    },

    /// A checkpoint confirmed this fork
    ForkConfirmed {
        fork: ForkId,
        checkpoint: Checkpoint,
    },

    /// The fork was dropped from the live registry
    ForkInvalid {
        fork: ForkId,
        block_num: BlockNumber,
        reason: PruneReason,
    },

    /// An operation was accepted into a fork's buffer
    OperationAppended { op: Operation },

    /// A consensus checkpoint arrived (before validation)
    CheckpointReceived { checkpoint: Checkpoint },

    /// Boundary validation failed; the fork is retained
    CheckpointInvalid {
        fork: ForkId,
        checkpoint: Checkpoint,
        reason: BoundaryViolation,
    },
}

/// Fan-out sender for registry events. Sending never blocks; slow
/// subscribers observe `Lagged` and resubscribe.
#[derive(Clone)]
pub struct EventSender {
    tx: broadcast::Sender<RegistryEvent>,
}

impl EventSender {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: RegistryEvent) {
        // No receivers is fine during startup/shutdown
        let _ = self.tx.send(event);
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventSender {
    fn default() -> Self {
        Self::new()
    }
}
