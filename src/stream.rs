//! The user-facing sending side of a streaming request.
//!
//! A `StreamSender` is handed out only once the connection is ready. Every
//! `send` appends a chunk to the sender's queue and makes sure the chunked
//! writer will pull it: the writer parks whenever the queue runs dry, and the
//! next `send` re-arms it.
//!
//! 流式请求面向用户的发送端。
//!
//! 只有在连接就绪后才会交出 `StreamSender`。每次 `send` 都会将一个分块
//! 追加到发送器的队列中，并确保分块写入器会拉取它：每当队列为空时写入器
//! 就会暂停，下一次 `send` 会重新激活它。

pub mod source;

use crate::{
    error::{Error, Result},
    transport::{
        chunked::{ChunkedWriter, Outbound},
        completion::CompletionHandle,
        connection::Connection,
    },
};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub use source::{ChunkSource, PendingChunk, Pull};

/// Streams chunks to the peer over a ready connection.
///
/// `send` may be called from any number of threads; calls are serialized and
/// chunks reach the transport in the order the calls were serialized.
///
/// 通过已就绪的连接向对端流式发送分块。
///
/// `send` 可以从任意多个线程调用；调用会被串行化，分块按调用被串行化的
/// 顺序到达传输层。
#[derive(Debug)]
pub struct StreamSender {
    connection: Arc<Connection>,
    writer: Arc<dyn ChunkedWriter>,
    source: Arc<ChunkSource>,
    send_lock: Mutex<()>,
}

impl StreamSender {
    /// Binds a sender to `connection`.
    ///
    /// Fails with `Error::MissingChunkedWriter` if the connection's pipeline
    /// has no chunked writer stage.
    ///
    /// 将发送器绑定到 `connection`。如果连接的管道中没有分块写入阶段，
    /// 则以 `Error::MissingChunkedWriter` 失败。
    pub fn new(connection: Arc<Connection>) -> Result<Self> {
        let writer = connection
            .pipeline()
            .chunked_writer()
            .ok_or(Error::MissingChunkedWriter)?;
        debug!(conn_id = connection.id(), "stream sender bound to connection");
        Ok(Self {
            connection,
            writer,
            source: Arc::new(ChunkSource::new()),
            send_lock: Mutex::new(()),
        })
    }

    /// Queues `data` as one chunk and returns immediately.
    ///
    /// The handle resolves once the transport has accepted the chunk. Runtime
    /// failures (a stopped stream, a closed connection) are reported through
    /// the handle, never returned from this call.
    ///
    /// 将 `data` 作为一个分块排队并立即返回。
    /// 句柄在传输层接受该分块后完成。运行时失败（流已停止、连接已关闭）
    /// 通过句柄报告，而不会从此调用返回。
    pub fn send(&self, data: impl Into<Bytes>) -> CompletionHandle {
        let _serialized = self.send_lock.lock();
        let (chunk, handle) = PendingChunk::new(data.into());

        let needs_resume = match self.source.push(chunk) {
            Ok(needs_resume) => needs_resume,
            Err(chunk) => {
                debug!(conn_id = self.connection.id(), "send after the stream ended");
                chunk.fail(Error::StreamStopped);
                return handle;
            }
        };

        if let Err(e) = self.connection.write(Outbound::Chunked(self.source.clone())) {
            warn!(conn_id = self.connection.id(), error = %e, "connection rejected chunked write");
            self.source.abort();
            return handle;
        }

        if needs_resume {
            trace!(conn_id = self.connection.id(), "re-arming chunked writer");
            self.writer.resume_transfer();
        }
        handle
    }

    /// Sends the UTF-8 bytes of `content`.
    pub fn send_str(&self, content: &str) -> CompletionHandle {
        self.send(Bytes::copy_from_slice(content.as_bytes()))
    }

    /// Serializes `value` as JSON and sends it as one chunk.
    ///
    /// A serialization failure is returned to this caller only; nothing is
    /// queued and the connection is unaffected.
    ///
    /// 将 `value` 序列化为JSON并作为一个分块发送。
    /// 序列化失败只返回给此调用方；不会排队任何内容，连接不受影响。
    pub fn send_json<T>(&self, value: &T) -> Result<CompletionHandle>
    where
        T: Serialize + ?Sized,
    {
        let encoded = serde_json::to_vec(value)?;
        Ok(self.send(encoded))
    }

    /// Abandons the stream.
    ///
    /// The next pull reports end-of-input even if chunks are still queued;
    /// those chunks are discarded and the writer terminates the chunked body.
    /// Idempotent.
    ///
    /// 放弃该流。即使仍有分块在排队，下一次拉取也会报告输入结束；
    /// 这些分块会被丢弃，写入器会终止分块主体。幂等。
    pub fn stop(&self) {
        let _serialized = self.send_lock.lock();
        if self.source.is_stopped() {
            return;
        }
        debug!(conn_id = self.connection.id(), queued = self.source.queued(), "stopping stream");
        let needs_resume = self.source.stop();
        // The writer may never have seen this source if nothing was sent.
        if let Err(e) = self.connection.write(Outbound::Chunked(self.source.clone())) {
            debug!(conn_id = self.connection.id(), error = %e, "stopped stream has no writer");
            self.source.close();
            return;
        }
        if needs_resume {
            self.writer.resume_transfer();
        }
    }

    /// Ends the stream after everything already queued has been written.
    ///
    /// The handle resolves once the terminating chunk has been written.
    ///
    /// 在所有已排队的内容写出后结束该流。句柄在终止分块写出后完成。
    pub fn finish(&self) -> CompletionHandle {
        let _serialized = self.send_lock.lock();
        debug!(conn_id = self.connection.id(), queued = self.source.queued(), "finishing stream");
        let needs_resume = self.source.finish();
        let handle = match self.connection.write(Outbound::Chunked(self.source.clone())) {
            Ok(handle) => handle,
            Err(e) => {
                self.source.abort();
                return CompletionHandle::failed(e);
            }
        };
        if needs_resume {
            self.writer.resume_transfer();
        }
        handle
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn is_stopped(&self) -> bool {
        self.source.is_stopped()
    }

    /// Whether the writer is parked waiting for the next `send`.
    pub fn needs_resume(&self) -> bool {
        self.source.needs_resume()
    }

    /// Number of chunks queued but not yet pulled by the writer.
    pub fn queued(&self) -> usize {
        self.source.queued()
    }
}
