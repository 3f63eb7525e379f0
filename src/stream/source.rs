//! The pull adapter between a sender's queue and the chunked writer.
//!
//! 发送器队列与分块写入器之间的拉取适配器。

use crate::{
    error::Error,
    transport::completion::{Completion, CompletionHandle},
};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::trace;

/// A buffer of bytes queued for transmission, with the completion for the
/// `send` call that submitted it.
///
/// 排队等待传输的字节缓冲区，以及提交它的 `send` 调用的完成端。
#[derive(Debug)]
pub struct PendingChunk {
    data: Bytes,
    done: Completion,
}

impl PendingChunk {
    pub fn new(data: Bytes) -> (Self, CompletionHandle) {
        let (done, handle) = CompletionHandle::pair();
        (Self { data, done }, handle)
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_parts(self) -> (Bytes, Completion) {
        (self.data, self.done)
    }

    pub fn fail(self, err: Error) {
        self.done.fail(err);
    }
}

/// The answer to a pull.
///
/// 一次拉取的结果。
#[derive(Debug)]
pub enum Pull {
    /// The oldest queued chunk.
    Chunk(PendingChunk),
    /// Nothing queued yet; the caller must wait to be resumed.
    /// 暂无排队数据；调用方必须等待被恢复。
    Pending,
    /// The stream has ended; no chunk will ever be returned again.
    /// 流已结束；之后不会再返回任何分块。
    End,
}

#[derive(Debug)]
struct SourceState {
    queue: VecDeque<PendingChunk>,
    needs_resume: bool,
    stopped: bool,
    finishing: bool,
    ended: bool,
}

/// Exposes a sender's pending chunks to the chunked writer one at a time.
///
/// All state lives behind one lock, so an enqueue and a pull never
/// interleave. `needs_resume` starts out `true`: a writer that has never
/// pulled is parked by definition.
///
/// 将发送器的待发送分块逐个暴露给分块写入器。
///
/// 所有状态都在同一把锁之后，因此入队与拉取永远不会交错。
/// `needs_resume` 初始为 `true`：从未拉取过的写入器按定义处于暂停状态。
#[derive(Debug)]
pub struct ChunkSource {
    state: Mutex<SourceState>,
}

impl ChunkSource {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SourceState {
                queue: VecDeque::new(),
                needs_resume: true,
                stopped: false,
                finishing: false,
                ended: false,
            }),
        }
    }

    /// Appends `chunk` and reports whether the writer must be re-armed.
    ///
    /// Hands the chunk back if the stream no longer accepts data.
    ///
    /// 追加 `chunk` 并报告写入器是否需要被重新激活。
    /// 如果流不再接受数据，则将分块交还。
    pub fn push(&self, chunk: PendingChunk) -> Result<bool, PendingChunk> {
        let mut state = self.state.lock();
        if state.stopped || state.finishing || state.ended {
            return Err(chunk);
        }
        state.queue.push_back(chunk);
        Ok(state.needs_resume)
    }

    /// Returns the next chunk, or tells the writer to park or stop.
    ///
    /// A stopped source reports `End` even if chunks remain queued. A
    /// finishing source reports `End` once its queue is drained.
    ///
    /// 返回下一个分块，或告知写入器暂停或停止。
    /// 已停止的数据源即使仍有排队分块也报告 `End`。
    /// 正在结束的数据源在队列排空后报告 `End`。
    pub fn read_chunk(&self) -> Pull {
        let mut state = self.state.lock();
        if state.stopped || state.ended {
            state.needs_resume = true;
            state.ended = true;
            return Pull::End;
        }
        match state.queue.pop_front() {
            Some(chunk) => {
                state.needs_resume = false;
                Pull::Chunk(chunk)
            }
            None if state.finishing => {
                state.needs_resume = true;
                state.ended = true;
                Pull::End
            }
            None => {
                state.needs_resume = true;
                Pull::Pending
            }
        }
    }

    /// Returns `true` once no further chunk will be produced.
    pub fn is_end_of_input(&self) -> bool {
        let state = self.state.lock();
        state.stopped || state.ended
    }

    /// Returns `true` once a pull has reported `End` or the source was released.
    pub fn is_ended(&self) -> bool {
        self.state.lock().ended
    }

    pub fn needs_resume(&self) -> bool {
        self.state.lock().needs_resume
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Number of chunks waiting to be pulled.
    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Abandons the stream. Returns whether the writer is parked and must be
    /// resumed to observe the end.
    pub fn stop(&self) -> bool {
        let mut state = self.state.lock();
        state.stopped = true;
        state.needs_resume
    }

    /// Ends the stream once the queue drains. Returns whether the writer is
    /// parked and must be resumed to observe the end.
    pub fn finish(&self) -> bool {
        let mut state = self.state.lock();
        state.finishing = true;
        state.needs_resume
    }

    /// Releases the source. Chunks still queued are not sent; their handles
    /// resolve with `Error::ChunkDiscarded`.
    ///
    /// 释放数据源。仍在排队的分块不会被发送；其句柄以 `Error::ChunkDiscarded` 完成。
    pub fn close(&self) {
        self.drain_with(|| Error::ChunkDiscarded);
    }

    /// Like [`ChunkSource::close`], but the transport went away underneath.
    pub fn abort(&self) {
        self.drain_with(|| Error::ConnectionClosed);
    }

    fn drain_with(&self, reason: fn() -> Error) {
        let discarded: Vec<PendingChunk> = {
            let mut state = self.state.lock();
            state.ended = true;
            state.needs_resume = true;
            state.queue.drain(..).collect()
        };
        if !discarded.is_empty() {
            trace!(count = discarded.len(), "discarding unsent chunks");
        }
        for chunk in discarded {
            chunk.fail(reason());
        }
    }
}

impl Default for ChunkSource {
    fn default() -> Self {
        Self::new()
    }
}
