// Presenti Gateway
//
// The authenticated WebSocket surface: wire protocol, table-driven frame
// dispatch, per-connection server loop, and the socket-backed presence
// adapter.

pub mod adapter;
pub mod handlers;
pub mod protocol;
pub mod server;

pub use adapter::SocketAdapter;
pub use handlers::{dispatch_frame, DispatchAction, HandlerTable, PolicyFlags};
pub use protocol::{Envelope, PayloadType, RawEnvelope};
pub use server::{ConnId, PayloadSource, SocketServer, SocketState};
