//! Remote control over WebSockets

pub mod hub;
pub mod messages;

pub use hub::{CLOSE_NO_SESSION, ConnId, DeviceInfo, RemoteHub, device_id};
pub use messages::{ClientMessage, PlayerState, ServerMessage};
