//! The TLS stage and its handshake signal.
//!
//! A connector that wraps a connection in TLS installs a `TlsStage` in the
//! pipeline before the handshake has finished and resolves it through the
//! paired `HandshakeSignal`. Anyone holding the stage can wait for the
//! outcome without blocking.
//!
//! TLS阶段及其握手信号。
//!
//! 使用TLS包装连接的连接器会在握手完成之前将 `TlsStage` 安装到管道中，
//! 并通过配对的 `HandshakeSignal` 报告结果。持有该阶段的任何一方都可以
//! 非阻塞地等待结果。

use crate::{
    config::TlsConfig,
    error::{Error, Result},
};
use std::{io, sync::Arc};
use tokio::sync::watch;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tracing::{debug, warn};

type HandshakeOutcome = Option<std::result::Result<(), Arc<io::Error>>>;

/// The inspectable TLS stage of a connection.
///
/// 连接中可检查的TLS阶段。
#[derive(Debug, Clone)]
pub struct TlsStage {
    outcome: watch::Receiver<HandshakeOutcome>,
}

/// Resolves the handshake outcome of a `TlsStage`.
///
/// Dropping the signal without resolving it fails the handshake.
///
/// 报告 `TlsStage` 的握手结果。未报告结果就丢弃该信号会使握手失败。
#[derive(Debug)]
pub struct HandshakeSignal {
    tx: watch::Sender<HandshakeOutcome>,
}

impl TlsStage {
    /// Creates a stage whose handshake is still in progress.
    ///
    /// 创建一个握手仍在进行中的阶段。
    pub fn pending() -> (Self, HandshakeSignal) {
        let (tx, outcome) = watch::channel(None);
        (Self { outcome }, HandshakeSignal { tx })
    }

    /// Returns `true` once the handshake has an outcome.
    pub fn is_complete(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    /// Waits for the handshake to finish.
    ///
    /// Resolves immediately when the outcome is already known. A failed
    /// handshake is reported as `Error::Handshake` carrying the original cause.
    ///
    /// 等待握手完成。如果结果已知则立即返回。
    /// 失败的握手以携带原始原因的 `Error::Handshake` 报告。
    pub async fn handshake_complete(&self) -> Result<()> {
        let mut outcome = self.outcome.clone();
        let settled = match outcome.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone(),
            Err(_) => None,
        };
        match settled {
            Some(Ok(())) => Ok(()),
            Some(Err(cause)) => Err(Error::Handshake(cause)),
            None => Err(Error::Handshake(Arc::new(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "TLS session was dropped before the handshake finished",
            )))),
        }
    }
}

impl HandshakeSignal {
    pub fn succeed(self) {
        debug!("TLS handshake completed");
        self.tx.send_replace(Some(Ok(())));
    }

    pub fn fail(self, cause: io::Error) {
        warn!(error = %cause, "TLS handshake failed");
        self.tx.send_replace(Some(Err(Arc::new(cause))));
    }
}

/// Builds the rustls client configuration used by [`super::TcpConnector`].
///
/// 构建 [`super::TcpConnector`] 使用的 rustls 客户端配置。
pub fn client_config(config: &TlsConfig) -> Arc<ClientConfig> {
    let mut roots = RootCertStore::empty();
    if config.use_native_roots {
        let loaded = rustls_native_certs::load_native_certs();
        for cert in loaded.certs {
            if let Err(e) = roots.add(cert) {
                warn!("Failed to add root cert: {}", e);
            }
        }
        for e in &loaded.errors {
            warn!("Error loading native certs: {}", e);
        }
    }
    debug!(roots = roots.len(), "built TLS client config");

    Arc::new(
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}
