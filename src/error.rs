//! 定义了库中所有可能的错误类型。
//! Defines all possible error types in the library.

use std::sync::Arc;
use thiserror::Error;

/// The primary error type for the streaming client.
/// 流式客户端的主要错误类型。
#[derive(Debug, Error)]
pub enum Error {
    /// An underlying I/O error occurred.
    /// 发生了底层的I/O错误。
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection to the peer could not be established.
    /// 无法建立到对端的连接。
    #[error("failed to connect: {0}")]
    Connect(#[source] Arc<std::io::Error>),

    /// The TLS handshake did not complete.
    /// TLS握手未能完成。
    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] Arc<std::io::Error>),

    /// The connection's pipeline has no chunked writer stage.
    /// 连接的处理管道中没有分块写入阶段。
    #[error("a chunked writer stage must be in the pipeline")]
    MissingChunkedWriter,

    /// TLS was requested but the pipeline has no TLS stage under the TLS name.
    /// 请求了TLS，但管道中的TLS名称下没有TLS阶段。
    #[error("TLS requested but the pipeline has no TLS stage")]
    TlsStageMissing,

    /// A ready callback was registered before the request was executed.
    /// 在请求执行之前注册了就绪回调。
    #[error("not connected")]
    NotConnected,

    /// A ready callback (or `ready()` waiter) was already registered.
    /// 就绪回调（或 `ready()` 等待者）已被注册。
    #[error("a ready callback has already been registered for this request")]
    ReadyAlreadyRegistered,

    /// The request URI cannot be used to reach a peer.
    #[error("invalid request URI: {0}")]
    InvalidUri(String),

    /// A header value could not be encoded.
    #[error("invalid header value: {0}")]
    InvalidHeader(String),

    /// The host of the request URI is not a valid TLS server name.
    #[error("invalid TLS server name: {0}")]
    InvalidServerName(String),

    /// A structured value could not be serialized for sending.
    /// 无法序列化要发送的结构化值。
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The stream was stopped before this chunk was submitted.
    /// 在提交此分块之前，流已被停止。
    #[error("the stream has been stopped")]
    StreamStopped,

    /// The chunk was queued but discarded before it reached the transport.
    /// 分块已入队，但在到达传输层之前被丢弃。
    #[error("chunk was discarded before it was written")]
    ChunkDiscarded,

    /// The connection was closed.
    /// 连接已关闭。
    #[error("connection closed")]
    ConnectionClosed,

    /// An internal channel for communication between tasks was closed unexpectedly.
    /// 用于任务间通信的内部通道意外关闭。
    #[error("internal channel is broken")]
    ChannelClosed,

    /// The handshake sequencer was asked to leave a terminal phase.
    #[error("invalid handshake phase transition from {from} to {to}")]
    InvalidPhaseTransition {
        from: &'static str,
        to: &'static str,
    },

    /// The request failed; the cause is shared with the response.
    /// 请求失败；原因与响应共享。
    #[error("request failed: {0}")]
    RequestFailed(#[source] Arc<Error>),
}

impl Error {
    /// Returns `true` for the fatal configuration errors that are never retried.
    ///
    /// 对于永不重试的致命配置错误返回 `true`。
    pub fn is_configuration(&self) -> bool {
        match self {
            Error::MissingChunkedWriter
            | Error::TlsStageMissing
            | Error::NotConnected
            | Error::ReadyAlreadyRegistered
            | Error::InvalidUri(_)
            | Error::InvalidHeader(_)
            | Error::InvalidServerName(_) => true,
            Error::RequestFailed(cause) => cause.is_configuration(),
            _ => false,
        }
    }
}

/// A specialized `Result` type for this library.
/// 本库专用的 `Result` 类型。
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        use std::io::ErrorKind;
        match err {
            Error::Io(e) => e,
            Error::Connect(e) | Error::Handshake(e) => std::io::Error::new(e.kind(), e.to_string()),
            Error::MissingChunkedWriter
            | Error::TlsStageMissing
            | Error::InvalidUri(_)
            | Error::InvalidHeader(_)
            | Error::InvalidServerName(_) => std::io::Error::new(ErrorKind::InvalidInput, err),
            Error::NotConnected => ErrorKind::NotConnected.into(),
            Error::ReadyAlreadyRegistered => ErrorKind::AlreadyExists.into(),
            Error::Serialization(e) => std::io::Error::new(ErrorKind::InvalidData, e),
            Error::StreamStopped | Error::ChunkDiscarded => ErrorKind::Interrupted.into(),
            Error::ConnectionClosed => ErrorKind::ConnectionReset.into(),
            Error::ChannelClosed => ErrorKind::BrokenPipe.into(),
            Error::InvalidPhaseTransition { .. } => std::io::Error::other(err),
            Error::RequestFailed(cause) => std::io::Error::other(cause.to_string()),
        }
    }
}
