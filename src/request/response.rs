//! The response side of a streaming request.
//!
//! 流式请求的响应端。

use crate::{
    error::Error,
    transport::connection::{Connection, ConnectionReader},
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Whether a response has failed yet.
///
/// 响应是否已失败。
#[derive(Debug, Clone)]
pub enum ResponseStatus {
    Pending,
    Failed(Arc<Error>),
}

#[derive(Debug)]
struct ResponseInner {
    status: watch::Sender<ResponseStatus>,
    connection: Mutex<Option<Arc<Connection>>>,
}

/// The failure channel of a streaming request, and the door to its read side.
///
/// Connect and handshake failures never surface as a returned error from the
/// request API; they mark this response failed. Only the first cause is kept.
/// Parsing the peer's reply is left to the caller, which can take the
/// connection's read half once it is available.
///
/// 流式请求的失败通道，以及其读取端的入口。
///
/// 连接和握手失败从不作为请求API的返回错误出现；它们会将此响应标记为失败。
/// 只保留第一个原因。解析对端的回复由调用方负责，调用方可在读取半部可用后取走它。
#[derive(Debug, Clone)]
pub struct StreamingResponse {
    inner: Arc<ResponseInner>,
}

impl StreamingResponse {
    pub fn new() -> Self {
        let (status, _) = watch::channel(ResponseStatus::Pending);
        Self {
            inner: Arc::new(ResponseInner {
                status,
                connection: Mutex::new(None),
            }),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(*self.inner.status.borrow(), ResponseStatus::Failed(_))
    }

    /// The failure cause, if the response has failed.
    pub fn cause(&self) -> Option<Arc<Error>> {
        match &*self.inner.status.borrow() {
            ResponseStatus::Failed(cause) => Some(cause.clone()),
            ResponseStatus::Pending => None,
        }
    }

    pub fn status(&self) -> ResponseStatus {
        self.inner.status.borrow().clone()
    }

    /// Marks the response failed. Returns `false` if it had already failed, in
    /// which case the earlier cause is kept.
    ///
    /// 将响应标记为失败。如果已经失败则返回 `false`，并保留先前的原因。
    pub fn mark_failed(&self, cause: Arc<Error>) -> bool {
        let marked = self.inner.status.send_if_modified(|status| match status {
            ResponseStatus::Pending => {
                *status = ResponseStatus::Failed(cause.clone());
                true
            }
            ResponseStatus::Failed(_) => false,
        });
        if marked {
            warn!(error = %cause, "streaming response failed");
        } else {
            debug!(error = %cause, "response already failed; keeping the first cause");
        }
        marked
    }

    /// Waits until the response fails and returns the cause.
    ///
    /// Never resolves for a response that does not fail.
    ///
    /// 等待响应失败并返回原因。对于不会失败的响应，永远不会完成。
    pub async fn failed(&self) -> Arc<Error> {
        let mut status = self.inner.status.subscribe();
        loop {
            if let ResponseStatus::Failed(cause) = &*status.borrow_and_update() {
                return cause.clone();
            }
            // The sender lives in `self`, so the channel cannot close while we wait.
            if status.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    pub(crate) fn attach(&self, connection: Arc<Connection>) {
        *self.inner.connection.lock() = Some(connection);
    }

    /// The connection carrying this exchange, once it has been established.
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.inner.connection.lock().clone()
    }

    /// Takes the read half of the connection for a response parser.
    ///
    /// 为响应解析器取走连接的读取半部。
    pub fn take_reader(&self) -> Option<ConnectionReader> {
        self.connection()?.take_reader()
    }
}

impl Default for StreamingResponse {
    fn default() -> Self {
        Self::new()
    }
}
