// moonlink-api: Async Rust client for the Moonraker API (REST + JSON-RPC websocket)

pub mod auth;
pub mod client;
pub mod error;
pub mod rpc;
pub mod transport;
pub mod websocket;

pub use auth::{Authorization, LoginTokens};
pub use client::{CommandReply, MoonrakerClient};
pub use error::Error;
pub use rpc::{FrameKind, RpcErrorBody, RpcFrame, RpcRequest};
pub use transport::{TlsMode, TransportConfig};
pub use websocket::{HeartbeatConfig, TransportEvent, WebSocketHandle};
