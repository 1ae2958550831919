//! 跨进程分发：调用 / 响应信封、分发器（HTTP、进程内回环）与服务端

pub mod dispatcher;
pub mod envelope;
pub mod server;

pub use dispatcher::{HttpDispatcher, LoopbackDispatcher, RemoteDispatcher, CALL_PATH};
pub use envelope::{CallEnvelope, ResponseEnvelope};
pub use server::{serve_envelope, serve_envelope_with_cancel};
#[cfg(feature = "server")]
pub use server::router;
