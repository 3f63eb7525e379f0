//! Sequences connect, the optional TLS handshake, and the hand-off of a sender.
//!
//! The sequencer drives a `HandshakePhase` value from `Connecting` to either
//! `Ready` or `Failed`. The ready listener sits in a one-shot slot: it is
//! taken out exactly once, on success, and a second registration is refused
//! when it is made rather than ignored later.
//!
//! 对连接、可选的TLS握手以及发送器的交付进行排序。
//!
//! 序列器驱动一个 `HandshakePhase` 值从 `Connecting` 走到 `Ready` 或
//! `Failed`。就绪监听器存放在一次性槽中：只在成功时被取出恰好一次，
//! 第二次注册会在注册时被拒绝，而不是之后被忽略。

pub mod state;

use crate::{
    error::{Error, Result},
    request::response::StreamingResponse,
    stream::StreamSender,
    transport::connection::Connection,
};
use parking_lot::Mutex;
use std::{future::Future, sync::Arc};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

pub use state::HandshakePhase;

/// A callback invoked with the sender once the request is ready to stream.
pub type ReadyCallback = Box<dyn FnOnce(StreamSender) + Send + 'static>;

enum ReadyListener {
    Callback(ReadyCallback),
    Waiter(oneshot::Sender<Result<StreamSender>>),
}

impl ReadyListener {
    /// A `ready()` waiter whose future was dropped before the sender arrived.
    fn is_abandoned(&self) -> bool {
        match self {
            Self::Callback(_) => false,
            Self::Waiter(tx) => tx.is_closed(),
        }
    }

    /// Hands the sender over, or gives it back if the waiter went away.
    fn notify(self, sender: StreamSender) -> Option<StreamSender> {
        match self {
            Self::Callback(callback) => {
                callback(sender);
                None
            }
            Self::Waiter(tx) => match tx.send(Ok(sender)) {
                Ok(()) => None,
                Err(unsent) => {
                    debug!("ready waiter went away before the sender arrived");
                    unsent.ok()
                }
            },
        }
    }

    fn abandon(self, cause: Arc<Error>) {
        // Callbacks are never invoked on failure; waiters learn the cause.
        if let Self::Waiter(tx) = self {
            if tx.send(Err(Error::RequestFailed(cause))).is_err() {
                debug!("ready waiter went away before the failure arrived");
            }
        }
    }
}

/// The one-shot slot joining the ready listener and the sequencer outcome.
#[derive(Default)]
struct ReadySlot {
    registered: bool,
    listener: Option<ReadyListener>,
    sender: Option<StreamSender>,
    failure: Option<Arc<Error>>,
}

/// Drives a request from connect to a ready `StreamSender`.
///
/// 驱动请求从连接到就绪的 `StreamSender`。
pub struct HandshakeSequencer {
    require_tls: bool,
    response: StreamingResponse,
    phase: watch::Sender<HandshakePhase>,
    ready: Mutex<ReadySlot>,
}

impl std::fmt::Debug for HandshakeSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeSequencer")
            .field("require_tls", &self.require_tls)
            .field("phase", &self.phase.borrow().name())
            .finish()
    }
}

impl HandshakeSequencer {
    /// Creates a sequencer in the `Connecting` phase that reports failures on
    /// `response`.
    pub fn new(require_tls: bool, response: StreamingResponse) -> Self {
        let (phase, _) = watch::channel(HandshakePhase::Connecting);
        Self {
            require_tls,
            response,
            phase,
            ready: Mutex::new(ReadySlot::default()),
        }
    }

    pub fn phase(&self) -> HandshakePhase {
        self.phase.borrow().clone()
    }

    /// Subscribes to phase changes.
    pub fn subscribe(&self) -> watch::Receiver<HandshakePhase> {
        self.phase.subscribe()
    }

    pub fn response(&self) -> &StreamingResponse {
        &self.response
    }

    /// Moves to `next`, rejecting any move the phase machine does not allow.
    ///
    /// 转换到 `next`，拒绝状态机不允许的任何转换。
    pub fn transition(&self, next: HandshakePhase) -> Result<()> {
        let mut rejected = None;
        self.phase.send_if_modified(|current| {
            if current.can_transition_to(&next) {
                debug!(from = current.name(), to = next.name(), "handshake phase transition");
                *current = next.clone();
                true
            } else {
                rejected = Some(current.name());
                false
            }
        });
        match rejected {
            Some(from) => {
                warn!(from, to = next.name(), "rejected handshake phase transition");
                Err(Error::InvalidPhaseTransition {
                    from,
                    to: next.name(),
                })
            }
            None => Ok(()),
        }
    }

    /// Registers the callback to receive the sender.
    ///
    /// Fires at once if the sender is already available. Never fires if the
    /// request fails. Fails with `Error::ReadyAlreadyRegistered` on a second
    /// registration.
    ///
    /// 注册接收发送器的回调。如果发送器已可用则立即触发；如果请求失败则
    /// 永不触发。第二次注册时以 `Error::ReadyAlreadyRegistered` 失败。
    pub fn on_ready<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(StreamSender) + Send + 'static,
    {
        self.register(ReadyListener::Callback(Box::new(callback)))
    }

    /// Waits for the sender instead of registering a callback.
    ///
    /// Shares the one-shot slot with [`HandshakeSequencer::on_ready`].
    ///
    /// 等待发送器而不是注册回调。与 [`HandshakeSequencer::on_ready`] 共享一次性槽。
    pub async fn ready(&self) -> Result<StreamSender> {
        let (tx, rx) = oneshot::channel();
        self.register(ReadyListener::Waiter(tx))?;
        rx.await.map_err(|_| Error::ChannelClosed)?
    }

    fn register(&self, listener: ReadyListener) -> Result<()> {
        let mut slot = self.ready.lock();
        let replaces_abandoned = slot
            .listener
            .as_ref()
            .is_some_and(ReadyListener::is_abandoned);
        if slot.registered && !replaces_abandoned {
            return Err(Error::ReadyAlreadyRegistered);
        }
        slot.registered = true;

        if let Some(sender) = slot.sender.take() {
            drop(slot);
            if let Some(sender) = listener.notify(sender) {
                self.park(sender);
            }
        } else if let Some(cause) = slot.failure.clone() {
            drop(slot);
            listener.abandon(cause);
        } else {
            slot.listener = Some(listener);
        }
        Ok(())
    }

    /// Runs the sequence to completion.
    ///
    /// `connect` yields the connection (or the connect failure). Every failure
    /// is recorded on the response and moves the phase to `Failed`; this
    /// method itself never fails.
    ///
    /// 将序列运行至完成。
    /// `connect` 产生连接（或连接失败）。所有失败都会记录在响应上，
    /// 并将阶段转换为 `Failed`；此方法本身永不失败。
    pub async fn run<F>(&self, connect: F)
    where
        F: Future<Output = Result<Arc<Connection>>>,
    {
        match self.establish(connect).await {
            Ok(sender) => {
                if let Err(e) = self.transition(HandshakePhase::Ready) {
                    warn!(error = %e, "dropping sender for a request that already ended");
                    return;
                }
                info!(conn_id = sender.connection().id(), "streaming request ready");
                self.deliver(sender);
            }
            Err(e) => self.fail(e),
        }
    }

    async fn establish<F>(&self, connect: F) -> Result<StreamSender>
    where
        F: Future<Output = Result<Arc<Connection>>>,
    {
        let connection = connect.await?;
        self.response.attach(connection.clone());

        let result = match self.handshake(&connection).await {
            Ok(()) => StreamSender::new(connection.clone()),
            Err(e) => Err(e),
        };
        if result.is_err() {
            connection.close();
        }
        result
    }

    async fn handshake(&self, connection: &Connection) -> Result<()> {
        let tls = match connection.pipeline().tls() {
            Some(tls) => tls.clone(),
            None if self.require_tls => return Err(Error::TlsStageMissing),
            None => {
                debug!(conn_id = connection.id(), "no TLS stage; connected");
                return Ok(());
            }
        };

        self.transition(HandshakePhase::TlsHandshaking)?;
        tls.handshake_complete().await
    }

    fn deliver(&self, sender: StreamSender) {
        let mut slot = self.ready.lock();
        match slot.listener.take() {
            Some(listener) if !listener.is_abandoned() => {
                drop(slot);
                if let Some(sender) = listener.notify(sender) {
                    self.park(sender);
                }
            }
            Some(_) => {
                debug!("ready waiter was dropped; keeping the sender for the next registration");
                slot.sender = Some(sender);
                slot.registered = false;
            }
            None => slot.sender = Some(sender),
        }
    }

    /// Keeps a sender nobody took, so the next registration receives it.
    fn park(&self, sender: StreamSender) {
        let mut slot = self.ready.lock();
        slot.sender = Some(sender);
        slot.registered = false;
    }

    fn fail(&self, err: Error) {
        let cause = Arc::new(err);
        self.response.mark_failed(cause.clone());
        if let Err(e) = self.transition(HandshakePhase::Failed(cause.clone())) {
            debug!(error = %e, "request had already left the handshake");
        }
        if let Some(connection) = self.response.connection() {
            connection.close();
        }

        let listener = {
            let mut slot = self.ready.lock();
            slot.failure = Some(cause.clone());
            slot.listener.take()
        };
        if let Some(listener) = listener {
            listener.abandon(cause);
        }
    }
}
