//! Live session layer: the WebSocket handler, the principal/conversation
//! registry it reads and writes, the wire protocol, and the bridge that
//! feeds fanout events from the bus into the registry.

pub mod bridge;
pub mod protocol;
pub mod registry;
pub mod websocket;

pub use registry::SessionRegistry;
