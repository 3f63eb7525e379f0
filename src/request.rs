//! The streaming request: framing, connect, and the hand-off of a sender.
//!
//! A `StreamingRequest` prepares the request head for a chunked body, starts
//! the connection on `execute`, and hands a `StreamSender` to the caller once
//! the connection (and its TLS handshake, for `https`) is ready. Failures are
//! reported on the returned `StreamingResponse`.
//!
//! 流式请求：分帧、连接以及发送器的交付。
//!
//! `StreamingRequest` 为分块主体准备请求头，在 `execute` 时开始连接，并在
//! 连接（对于 `https` 还包括其TLS握手）就绪后将 `StreamSender` 交给调用方。
//! 失败会报告在返回的 `StreamingResponse` 上。

pub mod framing;
pub mod response;

use crate::{
    config::{ChannelOptions, Config},
    error::{Error, Result},
    handshake::{HandshakePhase, HandshakeSequencer},
    stream::StreamSender,
    transport::{Connector, Target, chunked::Outbound, tcp::TcpConnector},
};
use http::{HeaderMap, Method, Uri};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

pub use response::{ResponseStatus, StreamingResponse};

#[derive(Debug)]
struct Execution {
    sequencer: Arc<HandshakeSequencer>,
    response: StreamingResponse,
}

/// A POST request whose body is streamed in chunks.
///
/// # Examples
///
/// ```no_run
/// # async fn demo() -> chunkstream::error::Result<()> {
/// use chunkstream::StreamingRequest;
///
/// let mut request = StreamingRequest::new("http://localhost:8080/ingest".parse().unwrap());
/// let response = request.execute()?;
/// let sender = request.ready().await?;
/// sender.send_str(r#"{"event":"start"}"#).await?;
/// sender.finish().await?;
/// # drop(response);
/// # Ok(())
/// # }
/// ```
///
/// 一个主体以分块方式流式发送的POST请求。
#[derive(Debug)]
pub struct StreamingRequest<C: Connector = TcpConnector> {
    uri: Uri,
    original_uri: Option<Uri>,
    method: Method,
    headers: HeaderMap,
    config: Config,
    connector: Arc<C>,
    execution: Option<Execution>,
}

impl StreamingRequest<TcpConnector> {
    /// Creates a request to `uri` with the default configuration.
    pub fn new(uri: Uri) -> Self {
        Self::with_config(uri, Config::default())
    }

    pub fn with_config(uri: Uri, config: Config) -> Self {
        let connector = TcpConnector::new(config.clone());
        Self::with_connector(uri, connector, config)
    }
}

impl<C: Connector> StreamingRequest<C> {
    /// Creates a request that connects through `connector`.
    ///
    /// 创建一个通过 `connector` 建立连接的请求。
    pub fn with_connector(uri: Uri, connector: C, config: Config) -> Self {
        Self {
            uri,
            original_uri: None,
            method: Method::POST,
            headers: HeaderMap::new(),
            config,
            connector: Arc::new(connector),
            execution: None,
        }
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Headers to send. Changes made after `execute` have no effect.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Records the URI the request had before a redirect or rewrite; it is
    /// sent as the `Referer`.
    ///
    /// 记录请求在重定向或重写之前的URI；它将作为 `Referer` 发送。
    pub fn set_original_uri(&mut self, uri: Uri) {
        self.original_uri = Some(uri);
    }

    /// Frames the request and starts connecting.
    ///
    /// Returns the response that reports connect and handshake failures.
    /// Configuration problems with the request itself (an unusable URI or
    /// header) are returned here instead. Calling `execute` again returns the
    /// same response without connecting twice. Must be called within a tokio
    /// runtime.
    ///
    /// 对请求分帧并开始连接。
    ///
    /// 返回用于报告连接和握手失败的响应。请求本身的配置问题（不可用的URI
    /// 或请求头）则在此处直接返回。再次调用 `execute` 会返回同一个响应，
    /// 而不会重复连接。必须在tokio运行时中调用。
    pub fn execute(&mut self) -> Result<StreamingResponse> {
        if let Some(execution) = &self.execution {
            return Ok(execution.response.clone());
        }

        let target = Target::from_uri(&self.uri)?;
        framing::prepare_headers(&mut self.headers, &self.config.framing.default_content_type)?;
        framing::set_host(&mut self.headers, &self.uri)?;
        let referer = self.original_uri.as_ref().unwrap_or(&self.uri);
        framing::set_referer(&mut self.headers, referer)?;
        let path = framing::request_path(&self.uri);
        let head = framing::encode_head(&self.method, path, &self.headers);

        let response = StreamingResponse::new();
        let sequencer = Arc::new(HandshakeSequencer::new(target.tls, response.clone()));
        info!(uri = %self.uri, tls = target.tls, "executing streaming request");

        let connector = self.connector.clone();
        let connect = async move {
            let connection = connector.connect(&target).await?;
            connection.set_options(ChannelOptions::streaming());
            // Queued ahead of every chunk; the writer holds it until TLS is up.
            if let Err(e) = connection.write(Outbound::Head(head)) {
                // A failed TLS session closes the connection; its stage carries the cause.
                if connection.pipeline().tls().is_none() {
                    return Err(e);
                }
                debug!(conn_id = connection.id(), error = %e, "request head not queued");
            }
            Ok::<_, Error>(connection)
        };
        let driver = sequencer.clone();
        tokio::spawn(async move { driver.run(connect).await });

        self.execution = Some(Execution {
            sequencer,
            response: response.clone(),
        });
        Ok(response)
    }

    fn sequencer(&self) -> Result<&Arc<HandshakeSequencer>> {
        self.execution
            .as_ref()
            .map(|execution| &execution.sequencer)
            .ok_or(Error::NotConnected)
    }

    /// Registers the callback that receives the sender once the request is
    /// ready to stream.
    ///
    /// Fails with `Error::NotConnected` before `execute`, and with
    /// `Error::ReadyAlreadyRegistered` if a callback or `ready` waiter was
    /// already registered. The callback is never invoked if the request fails.
    ///
    /// 注册在请求准备好流式传输后接收发送器的回调。
    ///
    /// 在 `execute` 之前调用以 `Error::NotConnected` 失败；如果已注册过回调或
    /// `ready` 等待者，则以 `Error::ReadyAlreadyRegistered` 失败。
    /// 如果请求失败，回调永远不会被调用。
    pub fn on_ready<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(StreamSender) + Send + 'static,
    {
        let sequencer = self.sequencer()?;
        debug!("registering ready callback");
        sequencer.on_ready(callback)
    }

    /// Waits for the sender.
    ///
    /// Resolves with `Error::RequestFailed` carrying the response's cause if
    /// the request fails.
    ///
    /// 等待发送器。如果请求失败，则以携带响应原因的 `Error::RequestFailed` 完成。
    pub async fn ready(&self) -> Result<StreamSender> {
        self.sequencer()?.ready().await
    }

    /// Follows the setup phases of an executed request.
    pub fn phase(&self) -> Option<watch::Receiver<HandshakePhase>> {
        self.execution
            .as_ref()
            .map(|execution| execution.sequencer.subscribe())
    }

    /// The response of an executed request.
    pub fn response(&self) -> Option<&StreamingResponse> {
        self.execution.as_ref().map(|execution| &execution.response)
    }
}
