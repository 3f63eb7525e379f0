//! tests/common/harness.rs
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Once};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::pki_types::PrivatePkcs8KeyDer;
use tokio_rustls::rustls::{ClientConfig, RootCertStore, ServerConfig};
use tracing_subscriber::fmt::format::FmtSpan;

/// Initializes tracing for tests, ensuring it's only done once.
pub fn init_tracing() {
    static TRACING_INIT: Once = Once::new();
    TRACING_INIT.call_once(|| {
        let filter = std::env::var("RUST_LOG")
            .unwrap_or_else(|_| "chunkstream=debug,streaming=info".to_string());
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .with_test_writer()
            .try_init();
    });
}

/// What the peer read off the wire for one request.
#[derive(Debug)]
pub struct ReceivedRequest {
    /// The request line and headers, including the blank line.
    pub head: String,
    /// The decoded chunk payloads, in arrival order.
    pub chunks: Vec<Vec<u8>>,
}

impl ReceivedRequest {
    pub fn body(&self) -> Vec<u8> {
        self.chunks.concat()
    }
}

/// A local HTTP/1.1 peer that accepts one connection and decodes a chunked
/// request body.
pub struct PeerHarness {
    pub addr: SocketAddr,
    handle: JoinHandle<io::Result<ReceivedRequest>>,
}

impl PeerHarness {
    /// Waits for the peer to read a full request.
    pub async fn received(self) -> ReceivedRequest {
        self.handle.await.unwrap().unwrap()
    }
}

/// Starts a peer on an ephemeral loopback port.
pub async fn spawn_peer() -> PeerHarness {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (stream, peer) = listener.accept().await?;
        tracing::info!(%peer, "peer accepted connection");
        read_request(stream).await
    });
    PeerHarness { addr, handle }
}

/// Starts a TLS peer for `localhost` with a freshly generated self-signed
/// certificate, and returns a client config that trusts it.
pub async fn spawn_tls_peer() -> (PeerHarness, Arc<ClientConfig>) {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert = certified.cert.der().clone();
    let key = PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der());

    let server_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert.clone()], key.into())
        .unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(server_config));

    let mut roots = RootCertStore::empty();
    roots.add(cert).unwrap();
    let client_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (stream, peer) = listener.accept().await?;
        let stream = acceptor.accept(stream).await?;
        tracing::info!(%peer, "peer accepted TLS connection");
        read_request(stream).await
    });
    (PeerHarness { addr, handle }, Arc::new(client_config))
}

/// Reads one request head and its chunked body, then answers 200.
async fn read_request<S>(stream: S) -> io::Result<ReceivedRequest>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(stream);

    let mut head = String::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        head.push_str(&line);
        if line == "\r\n" {
            break;
        }
    }

    let mut chunks = Vec::new();
    loop {
        let mut size_line = String::new();
        if reader.read_line(&mut size_line).await? == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        let size = usize::from_str_radix(size_line.trim_end(), 16)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut data = vec![0u8; size + 2];
        reader.read_exact(&mut data).await?;
        if &data[size..] != b"\r\n" {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "chunk not terminated by CRLF",
            ));
        }
        data.truncate(size);
        if size == 0 {
            break;
        }
        chunks.push(data);
    }

    // The client may already be gone; the reply is best effort.
    let _ = reader
        .get_mut()
        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
        .await;
    Ok(ReceivedRequest { head, chunks })
}

/// Starts a plain-TCP peer that answers anything with a non-TLS reply, so a
/// TLS client handshake against it fails.
pub async fn spawn_plaintext_peer() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((mut stream, _)) = listener.accept().await {
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let _ = stream
                .write_all(b"HTTP/1.1 400 Bad Request\r\ncontent-length: 0\r\n\r\n")
                .await;
        }
    });
    addr
}

/// An address nothing is listening on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
