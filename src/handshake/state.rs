//! The phases of a streaming request's setup and the legal moves between them.
//!
//! 流式请求建立过程的各个阶段以及它们之间的合法转换。

use crate::error::Error;
use std::sync::Arc;

/// Where a request is on its way to being ready to stream.
///
/// `Ready` and `Failed` are terminal.
///
/// 请求在准备好流式传输之前所处的阶段。`Ready` 和 `Failed` 是终止状态。
#[derive(Debug, Clone)]
pub enum HandshakePhase {
    /// Waiting for the transport connection.
    /// 正在等待传输连接。
    Connecting,
    /// Connected; waiting for the TLS handshake to finish.
    /// 已连接；正在等待TLS握手完成。
    TlsHandshaking,
    /// The sender has been handed out.
    /// 发送器已交出。
    Ready,
    /// Setup failed; the cause is also recorded on the response.
    /// 建立失败；原因也记录在响应上。
    Failed(Arc<Error>),
}

impl HandshakePhase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connecting => "Connecting",
            Self::TlsHandshaking => "TlsHandshaking",
            Self::Ready => "Ready",
            Self::Failed(_) => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed(_))
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Validates a transition from `self` to `next`.
    ///
    /// 验证从 `self` 到 `next` 的转换是否合法。
    pub fn can_transition_to(&self, next: &HandshakePhase) -> bool {
        use HandshakePhase::*;

        match (self, next) {
            // Nothing leaves a terminal phase.
            (Ready | Failed(_), _) => false,
            // Any live phase may fail.
            (_, Failed(_)) => true,
            (Connecting, TlsHandshaking) => true,
            (Connecting, Ready) => true,
            (TlsHandshaking, Ready) => true,
            _ => false,
        }
    }
}

impl PartialEq for HandshakePhase {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}
