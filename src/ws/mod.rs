//! WebSocket protocol surface: wire frames, pushed-event names, and the
//! action router with its authentication state machine.

pub mod events;
mod frame;
mod router;

pub use frame::{Broadcast, PrecomputedEvent, WebSocketEvent, WebSocketRequest, WebSocketResponse};
pub use router::{route, RouteError};
