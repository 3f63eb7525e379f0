//! Write completion signalling.
//!
//! 写入完成信号。

use crate::error::{Error, Result};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::oneshot;

/// The resolving side of a `CompletionHandle`, held by whoever performs the write.
///
/// `CompletionHandle` 的完成端，由执行写入的一方持有。
#[derive(Debug)]
pub struct Completion {
    tx: oneshot::Sender<Result<()>>,
}

impl Completion {
    /// Reports that the transport accepted the write.
    pub fn succeed(self) {
        let _ = self.tx.send(Ok(()));
    }

    /// Reports that the write failed.
    pub fn fail(self, err: Error) {
        let _ = self.tx.send(Err(err));
    }

    /// Returns `true` if nobody is waiting on the handle any more.
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A future resolved once the transport has accepted a write.
///
/// Acceptance means the bytes were handed to the socket (or TLS session), not
/// that the peer received them. If the write is dropped without being
/// performed, the handle resolves with `Error::ChunkDiscarded`.
///
/// 当传输层接受一次写入后完成的future。
///
/// “接受”指字节已交给套接字（或TLS会话），并不代表对端已收到。
/// 如果写入在执行前被丢弃，句柄将以 `Error::ChunkDiscarded` 完成。
#[derive(Debug)]
pub struct CompletionHandle {
    rx: oneshot::Receiver<Result<()>>,
}

impl CompletionHandle {
    /// Creates a linked completion/handle pair.
    ///
    /// 创建一对相互关联的完成端和句柄。
    pub fn pair() -> (Completion, Self) {
        let (tx, rx) = oneshot::channel();
        (Completion { tx }, Self { rx })
    }

    /// Creates a handle that is already resolved with `err`.
    pub fn failed(err: Error) -> Self {
        let (completion, handle) = Self::pair();
        completion.fail(err);
        handle
    }

    /// Returns the outcome if the write has already been resolved.
    pub fn try_result(&mut self) -> Option<Result<()>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(Error::ChunkDiscarded)),
        }
    }
}

impl Future for CompletionHandle {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::ChunkDiscarded)),
            Poll::Pending => Poll::Pending,
        }
    }
}
