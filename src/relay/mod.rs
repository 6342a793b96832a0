//! WebSocket relay between browser clients and the shared agent.
//!
//! | Module | Responsibility |
//! |---|---|
//! | `channel` | `ClientChannel` abstraction over a client transport |
//! | `manager` | active-connection set and the shared agent handle |
//! | `session` | per-connection loop forwarding run events |
//! | `serializer` | `ResponseEvent` to JSON, with a fallback payload |
//! | `server` | axum routes and graceful shutdown |

pub mod channel;
pub mod manager;
pub mod serializer;
pub mod server;
pub mod session;

pub use channel::{ClientChannel, Inbound};
pub use manager::{ConnectionId, ConnectionManager};
pub use serializer::{SerializedEvent, serialize_event};
pub use server::{router, serve, shutdown_signal};
pub use session::serve_connection;
