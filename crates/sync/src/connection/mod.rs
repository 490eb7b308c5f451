//! Persistent duplex connection to the budget server.

mod manager;
mod registry;
mod state;
mod transport;

pub use manager::ConnectionManager;
pub use registry::{ConnectionRegistry, RegisteredConnection};
pub use state::{ConnectionInfo, ConnectionState, Visibility};
pub use transport::{
    CloseReason, Connector, DuplexChannel, Inbound, MockConnector, MockPeer, Outbound,
    WsConnector, NORMAL_CLOSURE,
};
