//! The pull-based chunked writer stage.
//!
//! The writer owns the write half of a connection. It writes heads as they
//! arrive and pulls chunks from registered `ChunkSource`s, framing each one
//! with HTTP/1.1 chunked transfer encoding. When a source answers "no data
//! now" the writer parks until it is told to resume; it never re-polls an
//! exhausted source on its own.
//!
//! 拉取式分块写入阶段。
//!
//! 写入器持有连接的写入半部。它按到达顺序写入请求头，并从已注册的
//! `ChunkSource` 中拉取分块，使用HTTP/1.1分块传输编码为每个分块分帧。
//! 当数据源回答“暂无数据”时，写入器会暂停，直到被告知恢复；
//! 它不会自行重新轮询已耗尽的数据源。

use super::{
    completion::{Completion, CompletionHandle},
    connection::ChannelControl,
};
use crate::{
    error::{Error, Result},
    stream::{ChunkSource, Pull},
};
use bytes::Bytes;
use std::{collections::VecDeque, fmt::Debug, io, sync::Arc};
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};
use tracing::{debug, trace, warn};

/// The zero-length chunk that terminates a chunked body.
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// A message written through the chunked writer stage.
///
/// 通过分块写入阶段写出的消息。
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Raw bytes written as-is, such as an encoded request head.
    /// 原样写入的原始字节，例如编码后的请求头。
    Head(Bytes),
    /// A source to pull chunks from until it reports end-of-input.
    /// 一个数据源，从中拉取分块直到其报告输入结束。
    Chunked(Arc<ChunkSource>),
}

/// The chunked writer stage of a connection's pipeline.
///
/// 连接管道中的分块写入阶段。
pub trait ChunkedWriter: Send + Sync + Debug + 'static {
    /// Queues `msg` behind everything written before it.
    ///
    /// Writing a source that is already registered does not register it
    /// again; the returned handle resolves together with the first one.
    ///
    /// 将 `msg` 排在之前写入的所有内容之后。
    /// 写入一个已注册的数据源不会重复注册；返回的句柄与第一次的句柄一起完成。
    fn write(&self, msg: Outbound) -> Result<CompletionHandle>;

    /// Tells a parked writer that its source has data again.
    ///
    /// 通知已暂停的写入器其数据源再次有了数据。
    fn resume_transfer(&self);
}

/// Commands processed by [`chunked_writer_task`].
#[derive(Debug)]
pub enum WriterCommand {
    Write { msg: Outbound, done: Completion },
    Resume,
}

/// The handle to a chunked writer task, installed in a connection's pipeline.
///
/// 分块写入任务的句柄，安装在连接的管道中。
#[derive(Debug, Clone)]
pub struct ChunkedWriteStage {
    tx: mpsc::UnboundedSender<WriterCommand>,
}

impl ChunkedWriteStage {
    /// Creates the stage and the command receiver for its writer task.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WriterCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ChunkedWriter for ChunkedWriteStage {
    fn write(&self, msg: Outbound) -> Result<CompletionHandle> {
        let (done, handle) = CompletionHandle::pair();
        self.tx
            .send(WriterCommand::Write { msg, done })
            .map_err(|_| Error::ConnectionClosed)?;
        Ok(handle)
    }

    fn resume_transfer(&self) {
        if self.tx.send(WriterCommand::Resume).is_err() {
            trace!("resume requested after the chunked writer stopped");
        }
    }
}

/// A registered source together with everyone waiting for it to end.
struct ActiveInput {
    source: Arc<ChunkSource>,
    waiters: Vec<Completion>,
}

/// What a pump pass left behind.
enum Flow {
    /// Nothing to report; keep processing commands.
    Continue,
    /// The current source has no data; wait for a resume.
    Parked,
    /// Every registered source reached end-of-input.
    Drained,
    /// The transport failed; the writer must stop.
    Broken,
}

/// The dedicated task that owns the write half of a connection.
///
/// Processes commands in order, so a head written before a source is
/// registered always precedes the source's chunks on the wire. Exits when the
/// command channel closes, when a write fails, when the connection is closed,
/// or (with `auto_close`) once every registered source has ended. On exit the
/// write half is shut down and anything still pending fails with
/// `Error::ConnectionClosed`.
///
/// 持有连接写入半部的专用任务。
///
/// 按顺序处理命令，因此在注册数据源之前写入的请求头总是先于该数据源的
/// 分块出现在线路上。当命令通道关闭、写入失败、连接关闭，或（启用
/// `auto_close` 时）所有已注册的数据源都结束后退出。退出时关闭写入半部，
/// 所有仍在等待的操作以 `Error::ConnectionClosed` 失败。
pub async fn chunked_writer_task<W>(
    mut io: W,
    mut rx: mpsc::UnboundedReceiver<WriterCommand>,
    control: Arc<ChannelControl>,
) where
    W: AsyncWrite + Unpin + Send,
{
    let conn_id = control.id();
    let mut inputs: VecDeque<ActiveInput> = VecDeque::new();
    debug!(conn_id, "chunked writer started");

    loop {
        let cmd = tokio::select! {
            biased;
            _ = control.closed() => {
                debug!(conn_id, "connection closed; chunked writer stopping");
                break;
            }
            cmd = rx.recv() => match cmd {
                Some(cmd) => cmd,
                None => break, // Channel closed
            },
        };

        let flow = match cmd {
            WriterCommand::Write {
                msg: Outbound::Head(head),
                done,
            } => {
                trace!(conn_id, len = head.len(), "writing head");
                match write_flush(&mut io, &head).await {
                    Ok(()) => {
                        done.succeed();
                        Flow::Continue
                    }
                    Err(e) => {
                        warn!(conn_id, error = %e, "failed to write head");
                        done.fail(Error::Io(e));
                        Flow::Broken
                    }
                }
            }
            WriterCommand::Write {
                msg: Outbound::Chunked(source),
                done,
            } => {
                register(&mut inputs, source, done);
                pump(&mut io, &mut inputs, &control).await
            }
            WriterCommand::Resume => {
                trace!(conn_id, "chunked writer resumed");
                pump(&mut io, &mut inputs, &control).await
            }
        };

        match flow {
            Flow::Continue | Flow::Parked => {}
            Flow::Drained => {
                if control.options().auto_close {
                    debug!(conn_id, "all chunked input written; auto-closing");
                    break;
                }
            }
            Flow::Broken => break,
        }
    }

    if let Err(e) = io.shutdown().await {
        trace!(conn_id, error = %e, "shutdown of write half failed");
    }
    control.mark_closed();

    for input in inputs.drain(..) {
        input.source.abort();
        for waiter in input.waiters {
            waiter.fail(Error::ConnectionClosed);
        }
    }
    rx.close();
    while let Ok(cmd) = rx.try_recv() {
        match cmd {
            WriterCommand::Write {
                msg: Outbound::Chunked(source),
                done,
            } => {
                source.abort();
                done.fail(Error::ConnectionClosed);
            }
            WriterCommand::Write { done, .. } => done.fail(Error::ConnectionClosed),
            WriterCommand::Resume => {}
        }
    }
    debug!(conn_id, "chunked writer stopped");
}

fn register(inputs: &mut VecDeque<ActiveInput>, source: Arc<ChunkSource>, done: Completion) {
    if let Some(input) = inputs.iter_mut().find(|i| Arc::ptr_eq(&i.source, &source)) {
        // Senders re-write their source on every send and drop the handle.
        if !done.is_abandoned() {
            input.waiters.push(done);
        }
        return;
    }
    if source.is_ended() {
        // Already terminated on the wire; a second terminator would corrupt the body.
        done.succeed();
        return;
    }
    inputs.push_back(ActiveInput {
        source,
        waiters: vec![done],
    });
}

/// Pulls from the front source until it parks, the writer breaks, or nothing is left.
///
/// A close is observed between chunks, so a producer that keeps the queue
/// full cannot hold the connection open.
///
/// 从最前面的数据源拉取，直到其暂停、写入器出错或没有剩余数据源。
/// 关闭会在分块之间被观察到，因此持续填充队列的生产者无法让连接保持打开。
async fn pump<W>(io: &mut W, inputs: &mut VecDeque<ActiveInput>, control: &ChannelControl) -> Flow
where
    W: AsyncWrite + Unpin + Send,
{
    let conn_id = control.id();
    let mut ended_any = false;
    loop {
        if control.is_closed() {
            debug!(conn_id, queued = inputs.len(), "connection closed mid-transfer");
            return Flow::Broken;
        }
        let Some(input) = inputs.front() else {
            return if ended_any { Flow::Drained } else { Flow::Continue };
        };

        match input.source.read_chunk() {
            Pull::Chunk(chunk) => {
                let (data, done) = chunk.into_parts();
                if data.is_empty() {
                    // An empty chunk would be read as the terminator.
                    done.succeed();
                    continue;
                }
                trace!(conn_id, len = data.len(), "writing chunk");
                match write_chunk(io, &data).await {
                    Ok(()) => done.succeed(),
                    Err(e) => {
                        warn!(conn_id, error = %e, "failed to write chunk");
                        done.fail(Error::Io(e));
                        return Flow::Broken;
                    }
                }
            }
            Pull::Pending => return Flow::Parked,
            Pull::End => {
                let result = write_flush(io, LAST_CHUNK).await;
                let Some(input) = inputs.pop_front() else {
                    return Flow::Drained;
                };
                ended_any = true;
                input.source.close();
                debug!(conn_id, "chunked input ended");
                match result {
                    Ok(()) => input.waiters.into_iter().for_each(Completion::succeed),
                    Err(e) => {
                        warn!(conn_id, error = %e, "failed to write last chunk");
                        for waiter in input.waiters {
                            waiter.fail(Error::ConnectionClosed);
                        }
                        return Flow::Broken;
                    }
                }
            }
        }
    }
}

/// Frames `data` as one chunk: `<hex length>\r\n<data>\r\n`.
///
/// 将 `data` 分帧为一个分块：`<十六进制长度>\r\n<数据>\r\n`。
pub fn chunk_header(len: usize) -> String {
    format!("{len:x}\r\n")
}

async fn write_chunk<W>(io: &mut W, data: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    io.write_all(chunk_header(data.len()).as_bytes()).await?;
    io.write_all(data).await?;
    io.write_all(b"\r\n").await?;
    io.flush().await
}

async fn write_flush<W>(io: &mut W, data: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    io.write_all(data).await?;
    io.flush().await
}
