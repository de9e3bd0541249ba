//! Persistent records shared across commands.

pub mod network;
pub mod sidecar;

pub use network::Network;
pub use sidecar::{NetworkData, Sidecar, TokenInfo, VmType};
