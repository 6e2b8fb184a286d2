mod agent;
mod device;

pub use agent::*;
pub use device::*;

// Re-export wire types used by the HTTP layer
pub use gym_bridge_protocol::{Board, BoardEvent, DeviceAction, DeviceType};
