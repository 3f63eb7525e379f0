//! Common testing infrastructure for unit tests.
//!
//! 单元测试的通用测试基础设施。

use crate::{
    error::{Error, Result},
    stream::{ChunkSource, Pull},
    transport::{
        Connector, Target,
        chunked::{ChunkedWriter, Outbound},
        completion::{Completion, CompletionHandle},
        connection::Connection,
        pipeline::{CHUNKED_WRITER_STAGE, Pipeline, Stage, TLS_STAGE},
        tls::TlsStage,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::{
    io,
    sync::{
        Arc, Once,
        atomic::{AtomicUsize, Ordering},
    },
};

/// Installs a test-friendly tracing subscriber once per test binary.
pub fn init_tracing() {
    static TRACING_INIT: Once = Once::new();
    TRACING_INIT.call_once(|| {
        let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "chunkstream=debug".to_string());
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

// --- Mock Chunked Writer ---

#[derive(Debug, Default)]
struct MockWriterState {
    sources: Vec<Arc<ChunkSource>>,
    waiters: Vec<Completion>,
    heads: Vec<Bytes>,
    written: Vec<Bytes>,
    ended: bool,
}

/// A chunked writer that records what it is asked to do.
///
/// Each `resume_transfer` pulls exactly one answer from the most recently
/// registered source, synchronously, so tests can drive the pull path step by
/// step.
///
/// 一个记录其所受请求的分块写入器。
/// 每次 `resume_transfer` 都会同步地从最近注册的数据源恰好拉取一次，
/// 以便测试可以逐步驱动拉取路径。
#[derive(Debug, Default)]
pub struct MockChunkedWriter {
    state: Mutex<MockWriterState>,
    resumes: AtomicUsize,
}

impl MockChunkedWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct chunk sources written to this stage.
    pub fn registrations(&self) -> usize {
        self.state.lock().sources.len()
    }

    /// Number of `resume_transfer` calls.
    pub fn resumes(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }

    pub fn heads(&self) -> Vec<Bytes> {
        self.state.lock().heads.clone()
    }

    /// Chunk payloads pulled so far, in pull order.
    pub fn written(&self) -> Vec<Bytes> {
        self.state.lock().written.clone()
    }

    /// Whether a pull has observed end-of-input.
    pub fn ended(&self) -> bool {
        self.state.lock().ended
    }

    /// Pulls once from the latest source, as a real writer would after a resume.
    pub fn pull_once(&self) -> Option<Pull> {
        let source = self.state.lock().sources.last().cloned()?;
        let pull = source.read_chunk();
        match &pull {
            Pull::Chunk(chunk) => self.state.lock().written.push(chunk.data().clone()),
            Pull::Pending => {}
            Pull::End => {
                let waiters = {
                    let mut state = self.state.lock();
                    state.ended = true;
                    std::mem::take(&mut state.waiters)
                };
                source.close();
                waiters.into_iter().for_each(Completion::succeed);
            }
        }
        Some(pull)
    }
}

impl ChunkedWriter for MockChunkedWriter {
    fn write(&self, msg: Outbound) -> Result<CompletionHandle> {
        let (done, handle) = CompletionHandle::pair();
        let mut state = self.state.lock();
        match msg {
            Outbound::Head(head) => {
                state.heads.push(head);
                done.succeed();
            }
            Outbound::Chunked(source) => {
                if !state.sources.iter().any(|s| Arc::ptr_eq(s, &source)) {
                    state.sources.push(source);
                }
                state.waiters.push(done);
            }
        }
        Ok(handle)
    }

    fn resume_transfer(&self) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        if let Some(Pull::Chunk(chunk)) = self.pull_once() {
            let (_, done) = chunk.into_parts();
            done.succeed();
        }
    }
}

// --- Mock Connector ---

/// How a [`MockConnector`] sets up the TLS stage of the connections it makes.
#[derive(Debug, Clone)]
pub enum MockTls {
    /// No TLS stage at all.
    None,
    /// A TLS stage whose handshake succeeds.
    Succeeds,
    /// A TLS stage whose handshake fails with the given message.
    Fails(String),
    /// Something other than a TLS stage registered under the TLS name.
    WrongStage,
}

/// A connector that builds in-memory connections around a [`MockChunkedWriter`].
///
/// 一个围绕 [`MockChunkedWriter`] 构建内存连接的连接器。
#[derive(Debug)]
pub struct MockConnector {
    pub writer: Arc<MockChunkedWriter>,
    pub tls: MockTls,
    pub fail_connect: bool,
    pub with_writer: bool,
    connects: AtomicUsize,
    last: Mutex<Option<Arc<Connection>>>,
}

impl MockConnector {
    pub fn new(tls: MockTls) -> Self {
        Self {
            writer: Arc::new(MockChunkedWriter::new()),
            tls,
            fail_connect: false,
            with_writer: true,
            connects: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }

    /// Every connect attempt is refused.
    pub fn refusing() -> Self {
        Self {
            fail_connect: true,
            ..Self::new(MockTls::None)
        }
    }

    /// Connections come without a chunked writer stage.
    pub fn without_writer(tls: MockTls) -> Self {
        Self {
            with_writer: false,
            ..Self::new(tls)
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// The most recently created connection.
    pub fn last_connection(&self) -> Option<Arc<Connection>> {
        self.last.lock().clone()
    }

    /// Builds a connection synchronously, outside of any connector call.
    pub fn connection(&self) -> Arc<Connection> {
        let mut pipeline = Pipeline::new();
        match &self.tls {
            MockTls::None => {}
            MockTls::Succeeds => {
                let (stage, signal) = TlsStage::pending();
                signal.succeed();
                pipeline.add_last(TLS_STAGE, Stage::Tls(stage));
            }
            MockTls::Fails(message) => {
                let (stage, signal) = TlsStage::pending();
                signal.fail(io::Error::new(io::ErrorKind::InvalidData, message.clone()));
                pipeline.add_last(TLS_STAGE, Stage::Tls(stage));
            }
            MockTls::WrongStage => {
                pipeline.add_last(TLS_STAGE, Stage::Custom("not-tls".to_string()));
            }
        }
        if self.with_writer {
            pipeline.add_last(CHUNKED_WRITER_STAGE, Stage::ChunkedWriter(self.writer.clone()));
        }
        Arc::new(Connection::new(pipeline, None))
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _target: &Target) -> Result<Arc<Connection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            return Err(Error::Connect(Arc::new(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))));
        }
        let connection = self.connection();
        *self.last.lock() = Some(connection.clone());
        Ok(connection)
    }
}
