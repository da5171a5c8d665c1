//! WebSocket backend and the dialer shared with graphql-ws.

mod backend;
mod handshake;

pub use backend::WebSocketBackend;
pub use handshake::{WsStream, dial, is_normal_closure, websocket_url};
