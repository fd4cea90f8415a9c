// Types - Domain entities shared across the sidecar
pub mod block;
pub mod checkpoint;
pub mod fork;
pub mod operation;
pub mod primitives;

pub use block::PeerBlock;
pub use checkpoint::Checkpoint;
pub use fork::{Fork, ForkStatus, DEFAULT_FORK_CAP, DEFAULT_FORK_RETENTION_SECS, DEFAULT_OP_BUFFER_SIZE};
pub use operation::{OpKind, Operation, Payload};
pub use primitives::{BlockNumber, Digest, ForkId, ProducerId, Timestamp};
