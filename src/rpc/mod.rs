// RPC - Peer HTTP surface served with warp
pub mod server;
pub mod types;

pub use server::{routes, ApiConfig, ApiServer, ApiServerHandle, ApiState};
pub use types::{ApiError, HeadBody, HealthBody};
