// owhub-api: Streaming channel transport for the device-management backends

pub mod auth;
pub mod error;
pub mod websocket;

pub use auth::{StaticToken, TokenProvider};
pub use error::Error;
pub use websocket::{ChannelConnection, ConnectionState, ReconnectConfig};
