//! Request head framing for chunked streaming.
//!
//! 分块流式传输的请求头分帧。

use crate::error::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use http::{
    HeaderMap, HeaderValue, Method, Uri,
    header::{CONTENT_LENGTH, CONTENT_TYPE, EXPECT, HOST, REFERER, TRANSFER_ENCODING},
};
use tracing::debug;

/// Applies the header invariants of a chunked streaming body.
///
/// Defaults `Content-Type`, removes any `Content-Length` (a fixed length
/// contradicts chunked framing), forces `Transfer-Encoding: chunked` and asks
/// the peer to approve the body with `Expect: 100-continue`.
///
/// 应用分块流式主体的请求头不变量。
///
/// 设置默认的 `Content-Type`，移除任何 `Content-Length`（固定长度与分块分帧
/// 相矛盾），强制 `Transfer-Encoding: chunked`，并通过 `Expect: 100-continue`
/// 请求对端预先批准主体。
pub fn prepare_headers(headers: &mut HeaderMap, default_content_type: &str) -> Result<()> {
    if !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, header_value(default_content_type)?);
    }
    if headers.remove(CONTENT_LENGTH).is_some() {
        debug!("removed Content-Length from a chunked request");
    }
    headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
    headers.insert(EXPECT, HeaderValue::from_static("100-continue"));
    Ok(())
}

/// Sets `Referer` to `uri`, replacing any earlier value.
pub fn set_referer(headers: &mut HeaderMap, uri: &Uri) -> Result<()> {
    headers.insert(REFERER, header_value(&uri.to_string())?);
    Ok(())
}

/// Sets `Host` from the URI authority unless the caller already chose one.
pub fn set_host(headers: &mut HeaderMap, uri: &Uri) -> Result<()> {
    if headers.contains_key(HOST) {
        return Ok(());
    }
    let host = uri
        .host()
        .ok_or_else(|| Error::InvalidUri(format!("'{uri}' has no host")))?;
    let value = match uri.port_u16() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    headers.insert(HOST, header_value(&value)?);
    Ok(())
}

/// The request-target written on the request line: the raw path, without
/// the query.
pub fn request_path(uri: &Uri) -> &str {
    match uri.path() {
        "" => "/",
        path => path,
    }
}

/// Encodes the request line and headers, terminated by the blank line.
///
/// 编码请求行和请求头，以空行结束。
pub fn encode_head(method: &Method, path: &str, headers: &HeaderMap) -> Bytes {
    let mut buf = BytesMut::with_capacity(128 + headers.len() * 32);
    buf.put_slice(method.as_str().as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(path.as_bytes());
    buf.put_slice(b" HTTP/1.1\r\n");
    for (name, value) in headers {
        buf.put_slice(name.as_str().as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(value.as_bytes());
        buf.put_slice(b"\r\n");
    }
    buf.put_slice(b"\r\n");
    buf.freeze()
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| Error::InvalidHeader(value.to_string()))
}
