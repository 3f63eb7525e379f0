//! A `Connector` over `tokio::net::TcpStream`, with optional TLS.
//!
//! 基于 `tokio::net::TcpStream` 的 `Connector`，可选TLS。

use super::{
    Connector, Target,
    chunked::{ChunkedWriteStage, chunked_writer_task},
    connection::Connection,
    pipeline::{CHUNKED_WRITER_STAGE, Pipeline, Stage, TLS_STAGE},
    tls::{self, TlsStage},
};
use crate::{
    config::Config,
    error::{Error, Result},
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::{
    TlsConnector,
    rustls::{ClientConfig, pki_types::ServerName},
};
use tracing::{debug, info, warn};

/// Connects over TCP and, for `https` targets, wraps the stream in TLS.
///
/// The returned connection's pipeline is `["tls", "chunked"]` for TLS targets
/// and `["chunked"]` otherwise. The TLS handshake runs on a spawned task; the
/// chunked writer only starts writing once it has succeeded.
///
/// 通过TCP连接，对于 `https` 目标使用TLS包装流。
///
/// 对于TLS目标，返回连接的管道为 `["tls", "chunked"]`，否则为 `["chunked"]`。
/// TLS握手在派生的任务上运行；分块写入器仅在握手成功后才开始写入。
#[derive(Debug, Clone)]
pub struct TcpConnector {
    config: Config,
    tls_config: Option<Arc<ClientConfig>>,
}

impl TcpConnector {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            tls_config: None,
        }
    }

    /// Uses a caller-supplied rustls configuration instead of the native roots.
    pub fn with_tls_config(mut self, tls_config: Arc<ClientConfig>) -> Self {
        self.tls_config = Some(tls_config);
        self
    }

    fn tls_config(&self) -> Arc<ClientConfig> {
        match &self.tls_config {
            Some(config) => config.clone(),
            None => tls::client_config(&self.config.tls),
        }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, target: &Target) -> Result<Arc<Connection>> {
        let tcp = TcpStream::connect((target.host.as_str(), target.port))
            .await
            .map_err(|e| Error::Connect(Arc::new(e)))?;
        if self.config.connection.tcp_nodelay {
            tcp.set_nodelay(true)?;
        }
        let peer_addr = tcp.peer_addr().ok();
        info!(
            host = %target.host,
            port = target.port,
            tls = target.tls,
            "TCP connection established"
        );

        let (writer, commands) = ChunkedWriteStage::channel();
        let mut pipeline = Pipeline::new();

        if !target.tls {
            pipeline.add_last(CHUNKED_WRITER_STAGE, Stage::ChunkedWriter(Arc::new(writer)));
            let connection = Arc::new(Connection::new(pipeline, peer_addr));
            let control = connection.control();
            let (read_half, write_half) = tcp.into_split();
            control.attach_reader(Box::new(read_half));
            tokio::spawn(chunked_writer_task(write_half, commands, control));
            return Ok(connection);
        }

        let server_name = ServerName::try_from(target.host.clone())
            .map_err(|_| Error::InvalidServerName(target.host.clone()))?;
        let (tls_stage, signal) = TlsStage::pending();
        pipeline.add_last(TLS_STAGE, Stage::Tls(tls_stage));
        pipeline.add_last(CHUNKED_WRITER_STAGE, Stage::ChunkedWriter(Arc::new(writer)));
        let connection = Arc::new(Connection::new(pipeline, peer_addr));
        let control = connection.control();
        let connector = TlsConnector::from(self.tls_config());

        tokio::spawn(async move {
            debug!(conn_id = control.id(), "starting TLS handshake");
            match connector.connect(server_name, tcp).await {
                Ok(stream) => {
                    let (read_half, write_half) = tokio::io::split(stream);
                    // The reader must be in place before anyone observes the handshake.
                    control.attach_reader(Box::new(read_half));
                    signal.succeed();
                    chunked_writer_task(write_half, commands, control).await;
                }
                Err(e) => {
                    warn!(
                        conn_id = control.id(),
                        error = %e,
                        "closing connection after TLS failure"
                    );
                    signal.fail(e);
                    control.mark_closed();
                }
            }
        });

        Ok(connection)
    }
}
