#![deny(clippy::expect_used, clippy::unwrap_used)]

//! The root of the chunked streaming client library.
//!
//! A `StreamingRequest` connects to a peer (optionally over TLS), writes a
//! POST head for a chunked body, and hands out a `StreamSender` once the
//! connection is ready. Chunks are pulled by a dedicated writer task that
//! parks when the sender's queue runs dry and is re-armed by the next send.
//!
//! 分块流式客户端库的根。

pub mod config;
pub mod error;
pub mod handshake;
pub mod request;
pub mod stream;
pub mod transport;

#[cfg(test)]
mod test_utils;

pub use config::Config;
pub use error::{Error, Result};
pub use handshake::{HandshakePhase, HandshakeSequencer};
pub use request::{StreamingRequest, StreamingResponse};
pub use stream::StreamSender;
pub use transport::{CompletionHandle, Connector, TcpConnector};
