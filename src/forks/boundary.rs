// Checkpoint boundary validation - Stateless predicate over a fork buffer
//
// A checkpoint at block B may only finalize a fork whose buffer terminates
// with a write marker for block B - 1. Anything else is a boundary
// violation; the fork is retained so the producer can retry.

use crate::types::{BlockNumber, Fork};
use std::fmt;

/// Why a fork failed boundary validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryViolation {
    /// Empty buffer, or no write marker anywhere in it
    MissingWriteMarker,

    /// The terminal write marker belongs to the wrong block
    WriteMarkerBlockMismatch {
        marker_block: BlockNumber,
        expected: BlockNumber,
    },

    /// A write marker exists but operations follow it
    OperationsAfterWriteMarker,
}

impl fmt::Display for BoundaryViolation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BoundaryViolation::MissingWriteMarker => write!(f, "missing_write_marker"),
            BoundaryViolation::WriteMarkerBlockMismatch { .. } => {
                write!(f, "write_marker_block_mismatch")
            }
            BoundaryViolation::OperationsAfterWriteMarker => {
                write!(f, "operations_after_write_marker")
            }
        }
    }
}

/// Validate that `fork` forms a checkpointable boundary for a checkpoint at
/// `checkpoint_block`.
pub fn validate_boundary(
    fork: &Fork,
    checkpoint_block: BlockNumber,
) -> Result<(), BoundaryViolation> {
    if fork.operations.is_empty() {
        return Err(BoundaryViolation::MissingWriteMarker);
    }

    if !fork.operations.iter().any(|op| op.is_write_marker()) {
        return Err(BoundaryViolation::MissingWriteMarker);
    }

    let last = fork
        .last_operation()
        .ok_or(BoundaryViolation::MissingWriteMarker)?;
    if !last.is_write_marker() {
        return Err(BoundaryViolation::OperationsAfterWriteMarker);
    }

    let expected = checkpoint_block.saturating_sub(1);
    if last.block_num != expected {
        return Err(BoundaryViolation::WriteMarkerBlockMismatch {
            marker_block: last.block_num,
            expected,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ForkId, OpKind, Operation, ProducerId};

    fn op(block: u64, index: u64, kind: OpKind) -> Operation {
        Operation {
            kind,
            block_num: block,
            index,
            path: "/x".to_string(),
            data: None,
            fork: ForkId::from("f"),
            producer: ProducerId::from("p"),
            timestamp: 0,
            prev_checkpoint_hash: None,
        }
    }

    fn fork_with(ops: Vec<Operation>) -> Fork {
        let mut fork = Fork::new(ForkId::from("f"), 100, 0);
        for o in ops {
            fork.push_operation(o, 100);
        }
        fork
    }

    #[test]
    fn test_valid_boundary() {
        let fork = fork_with(vec![
            op(100, 1, OpKind::Put),
            op(100, 2, OpKind::Put),
            op(100, 3, OpKind::WriteMarker),
        ]);
        assert!(validate_boundary(&fork, 101).is_ok());
    }

    #[test]
    fn test_empty_fork_rejected() {
        let fork = fork_with(vec![]);
        assert_eq!(
            validate_boundary(&fork, 101),
            Err(BoundaryViolation::MissingWriteMarker)
        );
    }

    #[test]
    fn test_missing_marker_rejected() {
        let fork = fork_with(vec![op(100, 1, OpKind::Put), op(100, 2, OpKind::Put)]);
        assert_eq!(
            validate_boundary(&fork, 101),
            Err(BoundaryViolation::MissingWriteMarker)
        );
    }

    #[test]
    fn test_trailing_operations_rejected() {
        let fork = fork_with(vec![
            op(100, 1, OpKind::Put),
            op(100, 2, OpKind::WriteMarker),
            op(100, 3, OpKind::Put),
        ]);
        assert_eq!(
            validate_boundary(&fork, 101),
            Err(BoundaryViolation::OperationsAfterWriteMarker)
        );
    }

    #[test]
    fn test_marker_block_mismatch_rejected() {
        let fork = fork_with(vec![
            op(99, 1, OpKind::Put),
            op(99, 2, OpKind::WriteMarker),
        ]);
        assert_eq!(
            validate_boundary(&fork, 101),
            Err(BoundaryViolation::WriteMarkerBlockMismatch {
                marker_block: 99,
                expected: 100,
            })
        );
    }

    #[test]
    fn test_reason_strings() {
        assert_eq!(
            BoundaryViolation::MissingWriteMarker.to_string(),
            "missing_write_marker"
        );
        assert_eq!(
            BoundaryViolation::OperationsAfterWriteMarker.to_string(),
            "operations_after_write_marker"
        );
    }
}
