//! Defines a single streaming connection.
//! 定义了单个流式连接。

use super::{
    chunked::Outbound,
    completion::CompletionHandle,
    pipeline::Pipeline,
};
use crate::{
    config::ChannelOptions,
    error::{Error, Result},
};
use parking_lot::Mutex;
use std::{
    net::SocketAddr,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context, Poll},
};
use tokio::{
    io::{AsyncRead, ReadBuf},
    sync::watch,
};
use tracing::debug;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// The read half of a connection, boxed so any transport can provide it.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// State shared between a `Connection` handle and the tasks driving its I/O.
///
/// 在 `Connection` 句柄与驱动其I/O的任务之间共享的状态。
#[derive(Debug)]
pub struct ChannelControl {
    id: u64,
    options: Mutex<ChannelOptions>,
    closed: watch::Sender<bool>,
    reader: Mutex<Option<ReaderSlot>>,
}

struct ReaderSlot(BoxedReader);

impl std::fmt::Debug for ReaderSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ReaderSlot")
    }
}

impl ChannelControl {
    fn new() -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            options: Mutex::new(ChannelOptions::default()),
            closed,
            reader: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn options(&self) -> ChannelOptions {
        *self.options.lock()
    }

    /// Marks the connection closed. Returns `true` on the first call.
    ///
    /// 将连接标记为已关闭。首次调用时返回 `true`。
    pub fn mark_closed(&self) -> bool {
        let first = !self.closed.send_replace(true);
        if first {
            debug!(conn_id = self.id, "connection closed");
        }
        first
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        // The sender lives in `self`, so the wait can only end by observing `true`.
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Stores the read half once the transport is ready to hand it out.
    pub fn attach_reader(&self, reader: BoxedReader) {
        *self.reader.lock() = Some(ReaderSlot(reader));
    }
}

/// An established, ordered byte channel to one peer.
///
/// The connection is created once per request and shared through an `Arc`
/// with the sender and the handshake sequencer. Writes are routed through the
/// chunked writer stage of its pipeline, which keeps them in submission order.
///
/// 到一个对端的已建立的有序字节通道。
///
/// 每个请求创建一次连接，并通过 `Arc` 与发送器和握手序列器共享。
/// 写入通过其管道中的分块写入阶段路由，并保持提交顺序。
#[derive(Debug)]
pub struct Connection {
    control: Arc<ChannelControl>,
    pipeline: Pipeline,
    peer_addr: Option<SocketAddr>,
}

impl Connection {
    pub fn new(pipeline: Pipeline, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            control: Arc::new(ChannelControl::new()),
            pipeline,
            peer_addr,
        }
    }

    pub fn id(&self) -> u64 {
        self.control.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// The control block shared with the I/O tasks of this connection.
    pub fn control(&self) -> Arc<ChannelControl> {
        self.control.clone()
    }

    pub fn options(&self) -> ChannelOptions {
        self.control.options()
    }

    /// Applies connection-level tuning.
    ///
    /// 应用连接级调优选项。
    pub fn set_options(&self, options: ChannelOptions) {
        debug!(
            conn_id = self.id(),
            allow_half_closure = options.allow_half_closure,
            auto_close = options.auto_close,
            "applying channel options"
        );
        *self.control.options.lock() = options;
    }

    /// Writes `msg` through the pipeline's chunked writer stage.
    ///
    /// For a head the handle resolves once the bytes are written; for a chunk
    /// source it resolves once the source reaches end-of-input and the
    /// terminating chunk is written.
    ///
    /// 通过管道的分块写入阶段写入 `msg`。
    pub fn write(&self, msg: Outbound) -> Result<CompletionHandle> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        let writer = self
            .pipeline
            .chunked_writer()
            .ok_or(Error::MissingChunkedWriter)?;
        writer.write(msg)
    }

    /// Tears the connection down. Idempotent.
    pub fn close(&self) {
        self.control.mark_closed();
    }

    pub fn is_closed(&self) -> bool {
        self.control.is_closed()
    }

    pub async fn closed(&self) {
        self.control.closed().await
    }

    /// Takes the read half for an external response parser.
    ///
    /// Returns `None` until the transport has attached it (for TLS, after the
    /// handshake) and after it has been taken once.
    ///
    /// 为外部响应解析器取走读取半部。在传输层附加之前（对TLS而言是握手之后）
    /// 以及已被取走之后返回 `None`。
    pub fn take_reader(&self) -> Option<ConnectionReader> {
        let ReaderSlot(inner) = self.control.reader.lock().take()?;
        let closed = self.control.closed.subscribe();
        Some(ConnectionReader {
            inner,
            control: self.control.clone(),
            closed,
        })
    }
}

/// The read half of a connection.
///
/// Reading observes the channel options: once the connection is closed reads
/// report end-of-stream, and when half-closure is disallowed an end-of-stream
/// from the peer closes the whole connection.
///
/// 连接的读取半部。
///
/// 读取遵循通道选项：连接关闭后读取报告流结束；当不允许半关闭时，
/// 来自对端的流结束会关闭整个连接。
pub struct ConnectionReader {
    inner: BoxedReader,
    control: Arc<ChannelControl>,
    closed: watch::Receiver<bool>,
}

impl std::fmt::Debug for ConnectionReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionReader")
            .field("conn_id", &self.control.id)
            .finish()
    }
}

impl AsyncRead for ConnectionReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if *self.closed.borrow() {
            return Poll::Ready(Ok(()));
        }

        let filled_before = buf.filled().len();
        let result = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &result {
            let eof = buf.filled().len() == filled_before && buf.remaining() > 0;
            if eof && !self.control.options().allow_half_closure {
                debug!(conn_id = self.control.id, "peer closed its side; closing connection");
                self.control.mark_closed();
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        stream::ChunkSource,
        test_utils::MockChunkedWriter,
        transport::pipeline::{CHUNKED_WRITER_STAGE, Stage},
    };
    use bytes::Bytes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_write_requires_chunked_writer() {
        let connection = Connection::new(Pipeline::new(), None);
        let err = connection
            .write(Outbound::Head(Bytes::from_static(b"POST / HTTP/1.1\r\n\r\n")))
            .unwrap_err();
        assert!(matches!(err, Error::MissingChunkedWriter));
    }

    #[test]
    fn test_write_routes_to_writer_until_closed() {
        let writer = Arc::new(MockChunkedWriter::new());
        let pipeline =
            Pipeline::new().with(CHUNKED_WRITER_STAGE, Stage::ChunkedWriter(writer.clone()));
        let connection = Connection::new(pipeline, None);

        connection
            .write(Outbound::Chunked(Arc::new(ChunkSource::new())))
            .unwrap();
        assert_eq!(writer.registrations(), 1);

        connection.close();
        connection.close();
        assert!(connection.is_closed());
        assert!(matches!(
            connection.write(Outbound::Head(Bytes::new())),
            Err(Error::ConnectionClosed)
        ));
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let a = Connection::new(Pipeline::new(), None);
        let b = Connection::new(Pipeline::new(), None);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.options(), ChannelOptions::default());
    }

    #[tokio::test]
    async fn test_peer_eof_closes_connection_without_half_closure() {
        let connection = Connection::new(Pipeline::new(), None);
        connection.set_options(ChannelOptions::streaming());

        let (local, mut remote) = tokio::io::duplex(64);
        connection.control().attach_reader(Box::new(local));
        let mut reader = connection.take_reader().unwrap();
        assert!(connection.take_reader().is_none());

        remote.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await.unwrap();
        drop(remote);

        let mut received = Vec::new();
        reader.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"HTTP/1.1 100 Continue\r\n\r\n");
        assert!(connection.is_closed());
    }

    #[tokio::test]
    async fn test_peer_eof_keeps_connection_with_half_closure() {
        let connection = Connection::new(Pipeline::new(), None);

        let (local, remote) = tokio::io::duplex(64);
        connection.control().attach_reader(Box::new(local));
        let mut reader = connection.take_reader().unwrap();
        drop(remote);

        let mut received = Vec::new();
        reader.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());
        assert!(!connection.is_closed());
    }
}
