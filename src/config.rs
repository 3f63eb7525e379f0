//! 定义了流式请求和连接的可配置参数。
//! Defines configurable parameters for streaming requests and connections.

use serde::Deserialize;

/// The content type used when a streaming request does not set one.
/// 当流式请求未设置内容类型时使用的默认值。
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// A structure containing all configurable parameters for a streaming request.
///
/// 包含流式请求所有可配置参数的结构体。
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Request framing parameters.
    /// 请求分帧参数。
    pub framing: FramingConfig,

    /// Connection-related parameters.
    /// 连接相关参数。
    pub connection: ConnectionConfig,

    /// TLS-related parameters.
    /// TLS相关参数。
    pub tls: TlsConfig,
}

/// Request framing parameters.
///
/// 请求分帧参数。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FramingConfig {
    /// The `Content-Type` set on a request that does not carry one.
    /// 为未携带 `Content-Type` 的请求设置的值。
    pub default_content_type: String,
}

/// Connection-related parameters.
///
/// 连接相关参数。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Disables Nagle's algorithm on the TCP socket. Chunks are small and
    /// latency-sensitive, so this is on by default.
    /// 在TCP套接字上禁用Nagle算法。
    pub tcp_nodelay: bool,
}

/// TLS-related parameters.
///
/// TLS相关参数。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Loads the platform's trusted root certificates into the client config.
    /// 将平台受信任的根证书加载到客户端配置中。
    pub use_native_roots: bool,
}

/// Per-connection tuning applied after the connect has been issued.
///
/// 发起连接后应用的每连接调优选项。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOptions {
    /// When `false`, either direction closing ends the whole connection.
    /// 为 `false` 时，任一方向关闭都会结束整个连接。
    pub allow_half_closure: bool,
    /// When `true`, the connection is torn down once the exchange concludes.
    /// 为 `true` 时，交换结束后连接会被自动关闭。
    pub auto_close: bool,
}

impl ChannelOptions {
    /// The options a streaming request forces on its connection.
    pub fn streaming() -> Self {
        Self {
            allow_half_closure: false,
            auto_close: true,
        }
    }
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            allow_half_closure: true,
            auto_close: false,
        }
    }
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            default_content_type: DEFAULT_CONTENT_TYPE.to_string(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self { tcp_nodelay: true }
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            use_native_roots: true,
        }
    }
}
