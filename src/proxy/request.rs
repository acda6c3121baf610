//! 代理请求解析
//!
//! 读取请求行和请求头块，确定目标地址以及是否为 Reversed-VPN 会话。
//! 解析器只读到空行为止，之后的字节属于请求体/隧道数据，由转发阶段处理。

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tracing::debug;

use crate::error::{ProxyError, Result};

/// Reversed-VPN 标记头（区分大小写的前缀匹配，值被忽略）
pub const REVERSED_VPN_MARKER: &str = "Reversed-VPN";

/// 非 CONNECT 请求缺省的目标端口
pub const DEFAULT_HTTP_PORT: u16 = 80;

const CONNECT_METHOD: &str = "CONNECT";

/// 会话协议类型，由请求方法决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// 普通 HTTP 请求，改写为 origin-form 后转发
    Http,
    /// CONNECT 隧道
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl std::fmt::Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 请求行的三个字段以及原始文本
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub url: String,
    pub protocol: String,
    /// 原始请求行（含行结束符），VPN 模式下原样转发
    pub raw: String,
}

impl RequestLine {
    /// 解析请求行：必须恰好三段，且第三段以 `HTTP/` 开头
    pub fn parse(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            [method, url, protocol] if protocol.starts_with("HTTP/") => Ok(Self {
                method: method.to_string(),
                url: url.to_string(),
                protocol: protocol.to_string(),
                raw: line.to_string(),
            }),
            _ => Err(ProxyError::malformed(line)),
        }
    }

    pub fn is_connect(&self) -> bool {
        self.method == CONNECT_METHOD
    }
}

/// 完整解析后的代理请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRequest {
    pub line: RequestLine,
    pub scheme: Scheme,
    /// 目标地址（host:port），拨号前保证非空
    pub target: String,
    /// origin-form 路径，仅 HTTP 请求有值
    pub path: String,
    /// 原始请求头行（含行结束符），保持原有顺序
    pub headers: Vec<String>,
    /// 是否出现 Reversed-VPN 标记
    pub vpn: bool,
}

impl ProxyRequest {
    pub fn method(&self) -> &str {
        &self.line.method
    }

    pub fn protocol(&self) -> &str {
        &self.line.protocol
    }

    pub fn url(&self) -> &str {
        &self.line.url
    }
}

/// 按请求方法确定 (scheme, target, path)
///
/// CONNECT 的目标原样取自请求行，不补默认端口；其他方法取 URL 的 authority 段，
/// 缺少端口时补 80。origin-form 请求回退到 Host 头。
pub fn resolve_target(line: &RequestLine, headers: &[String]) -> Result<(Scheme, String, String)> {
    if line.is_connect() {
        if line.url.is_empty() {
            return Err(ProxyError::missing_authority(&line.url));
        }
        return Ok((Scheme::Https, line.url.clone(), String::new()));
    }

    let url = line.url.as_str();
    let (authority, path) = if url.starts_with('/') {
        let host = host_header(headers).ok_or_else(|| ProxyError::missing_authority(url))?;
        (host.to_string(), url.to_string())
    } else {
        let segments: Vec<&str> = url.split('/').collect();
        match segments.get(2) {
            Some(host) if !host.is_empty() => {
                (host.to_string(), format!("/{}", segments[3..].join("/")))
            }
            _ => return Err(ProxyError::missing_authority(url)),
        }
    };

    let target = if authority.contains(':') {
        authority
    } else {
        format!("{}:{}", authority, DEFAULT_HTTP_PORT)
    };

    Ok((Scheme::Http, target, path))
}

/// 查找 Host 头的值（名称不区分大小写）
fn host_header(headers: &[String]) -> Option<&str> {
    headers.iter().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("host") {
            let value = value.trim();
            (!value.is_empty()).then_some(value)
        } else {
            None
        }
    })
}

fn is_blank_line(line: &str) -> bool {
    line == "\r\n" || line == "\n"
}

/// 读取一行，`budget` 为剩余可读字节数
///
/// 返回 `None` 表示在读到任何字节前遇到 EOF。
async fn read_line_limited<R>(reader: &mut R, budget: &mut usize, limit: usize) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(*budget as u64)
        .read_until(b'\n', &mut buf)
        .await?;
    *budget -= n;

    if n == 0 {
        if *budget == 0 {
            return Err(ProxyError::HeaderTooLarge { limit });
        }
        return Ok(None);
    }
    if buf.last() != Some(&b'\n') && *budget == 0 {
        return Err(ProxyError::HeaderTooLarge { limit });
    }

    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

/// 从客户端连接读取并解析代理请求
///
/// `max_bytes` 限制请求行与请求头的总大小。
pub async fn read_request<R>(reader: &mut R, max_bytes: usize) -> Result<ProxyRequest>
where
    R: AsyncBufRead + Unpin,
{
    let mut budget = max_bytes;

    let first = read_line_limited(reader, &mut budget, max_bytes)
        .await?
        .unwrap_or_default();
    let line = RequestLine::parse(&first)?;

    let mut headers = Vec::new();
    let mut vpn = false;
    loop {
        let header = match read_line_limited(reader, &mut budget, max_bytes).await? {
            Some(header) if header.ends_with('\n') => header,
            _ => return Err(ProxyError::UnexpectedEof),
        };
        debug!(line = %header.trim_end(), "got header");

        if header.starts_with(REVERSED_VPN_MARKER) {
            vpn = true;
        }
        if is_blank_line(&header) {
            break;
        }
        headers.push(header);
    }

    let (scheme, target, path) = resolve_target(&line, &headers)?;

    Ok(ProxyRequest {
        line,
        scheme,
        target,
        path,
        headers,
        vpn,
    })
}
