//! Transport layer abstraction for the streaming client.
//!
//! This module provides the connection the rest of the crate streams over: a
//! `Connector` that establishes it, a `Pipeline` of named processing stages
//! (an optional TLS stage and the mandatory chunked writer), and the
//! completion handles that report when a write was accepted.
//!
//! 流式客户端的传输层抽象。
//!
//! 此模块提供了本库其余部分用于流式传输的连接：建立连接的 `Connector`、
//! 由命名处理阶段组成的 `Pipeline`（可选的TLS阶段和必需的分块写入阶段），
//! 以及报告写入何时被接受的完成句柄。

pub mod chunked;
pub mod completion;
pub mod connection;
pub mod pipeline;
pub mod tcp;
pub mod tls;

use crate::error::{Error, Result};
use async_trait::async_trait;
use http::Uri;
use std::{fmt::Debug, sync::Arc};

pub use chunked::{ChunkedWriteStage, ChunkedWriter, Outbound, chunked_writer_task};
pub use completion::{Completion, CompletionHandle};
pub use connection::{Connection, ConnectionReader};
pub use pipeline::{CHUNKED_WRITER_STAGE, Pipeline, Stage, TLS_STAGE};
pub use tcp::TcpConnector;
pub use tls::{HandshakeSignal, TlsStage};

/// The peer a request connects to.
///
/// 请求所连接的对端。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Host name or IP literal, used for resolution and as the TLS server name.
    pub host: String,
    pub port: u16,
    /// Whether the connection must be wrapped in TLS.
    pub tls: bool,
}

impl Target {
    /// Derives the target from an absolute `http` or `https` URI.
    ///
    /// 从绝对 `http` 或 `https` URI 推导目标。
    pub fn from_uri(uri: &Uri) -> Result<Self> {
        let tls = match uri.scheme_str() {
            Some("https") => true,
            Some("http") => false,
            Some(other) => return Err(Error::InvalidUri(format!("unsupported scheme '{other}'"))),
            None => return Err(Error::InvalidUri(format!("'{uri}' has no scheme"))),
        };
        let host = uri
            .host()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::InvalidUri(format!("'{uri}' has no host")))?;
        // IPv6 literals come back bracketed from `Uri::host`.
        let host = host.trim_start_matches('[').trim_end_matches(']').to_string();
        let port = uri.port_u16().unwrap_or(if tls { 443 } else { 80 });
        Ok(Self { host, port, tls })
    }
}

/// Establishes connections for streaming requests.
///
/// Implementations resolve and connect to the target and return a
/// `Connection` whose pipeline carries a TLS stage when `target.tls` is set
/// and always carries a chunked writer stage. The TLS handshake may still be
/// in progress when `connect` returns; its outcome is observed through the
/// TLS stage.
///
/// 为流式请求建立连接。
///
/// 实现者负责解析并连接到目标，返回一个 `Connection`：当 `target.tls`
/// 被设置时其管道中带有TLS阶段，并且总是带有分块写入阶段。
/// `connect` 返回时TLS握手可能仍在进行中，其结果通过TLS阶段观察。
#[async_trait]
pub trait Connector: Send + Sync + Debug + 'static {
    /// Connects to `target`. A failure here is reported as `Error::Connect`.
    async fn connect(&self, target: &Target) -> Result<Arc<Connection>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_from_uri_defaults() {
        let uri: Uri = "http://example.com/ingest".parse().unwrap();
        let target = Target::from_uri(&uri).unwrap();
        assert_eq!(target.host, "example.com");
        assert_eq!(target.port, 80);
        assert!(!target.tls);

        let uri: Uri = "https://example.com:8443/ingest".parse().unwrap();
        let target = Target::from_uri(&uri).unwrap();
        assert_eq!(target.port, 8443);
        assert!(target.tls);

        let uri: Uri = "http://[::1]:9000/".parse().unwrap();
        assert_eq!(Target::from_uri(&uri).unwrap().host, "::1");
    }

    #[test]
    fn test_target_rejects_relative_and_unknown_schemes() {
        let uri: Uri = "/only/a/path".parse().unwrap();
        assert!(matches!(Target::from_uri(&uri), Err(Error::InvalidUri(_))));

        let uri: Uri = "ftp://example.com/".parse().unwrap();
        let err = Target::from_uri(&uri).unwrap_err();
        assert!(err.is_configuration());
    }
}
