//! 握手应答与 Reversed-VPN 转发
//!
//! 转发给目标的内容只取决于 (scheme, vpn)：
//!
//! | scheme | vpn   | 客户端收到 | 目标收到                                |
//! |--------|-------|------------|-----------------------------------------|
//! | https  | false | 200 OK     | 无（只有后续转发的字节）                |
//! | https  | true  | 200 OK     | 原始请求行 + 请求头 + 空行              |
//! | http   | false | 无         | 改写后的请求行 + 请求头 + 空行          |
//! | http   | true  | 无         | 改写后的请求行 + 原始请求行 + 请求头 + 空行 |

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use super::request::{ProxyRequest, Scheme};

/// 目标侧看到的三种行为
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardMode {
    /// 纯隧道：目标只看到握手之后的原始字节
    Tunnel,
    /// 普通 HTTP：目标看到改写为 origin-form 的请求
    Rewrite,
    /// Reversed-VPN：目标看到原始请求，代理变为透明的一跳
    Vpn,
}

impl ForwardMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ForwardMode::Tunnel => "tunnel",
            ForwardMode::Rewrite => "rewrite",
            ForwardMode::Vpn => "vpn",
        }
    }
}

/// 握手阶段需要写出的内容
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakePlan {
    /// 向客户端回复 `200 OK`
    pub reply_to_client: bool,
    /// 向目标发送改写后的请求行
    pub rewritten_line: bool,
    /// 向目标发送原始请求行
    pub original_line: bool,
    /// 向目标发送请求头和空行
    pub headers: bool,
}

impl HandshakePlan {
    pub fn new(scheme: Scheme, vpn: bool) -> Self {
        let http = scheme == Scheme::Http;
        Self {
            reply_to_client: scheme == Scheme::Https,
            rewritten_line: http,
            original_line: vpn,
            headers: vpn || http,
        }
    }

    pub fn mode(&self) -> ForwardMode {
        if self.original_line {
            ForwardMode::Vpn
        } else if self.rewritten_line {
            ForwardMode::Rewrite
        } else {
            ForwardMode::Tunnel
        }
    }
}

/// CONNECT 的应答；HTTP 请求不合成任何应答
pub fn client_reply(request: &ProxyRequest) -> Option<Vec<u8>> {
    HandshakePlan::new(request.scheme, request.vpn)
        .reply_to_client
        .then(|| format!("{} 200 OK\r\nConnection: Keep-Alive\r\n\r\n", request.protocol()).into_bytes())
}

/// 在转发开始前写给目标的字节
pub fn target_preamble(request: &ProxyRequest) -> Vec<u8> {
    let plan = HandshakePlan::new(request.scheme, request.vpn);
    let mut out = Vec::new();

    if plan.rewritten_line {
        let line = format!("{} {} {}", request.method(), request.path, request.protocol());
        debug!(line = %line, "sending request");
        out.extend_from_slice(line.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    if plan.original_line {
        out.extend_from_slice(request.line.raw.as_bytes());
    }
    if plan.headers {
        for header in &request.headers {
            debug!(line = %header.trim_end(), "sending header");
            out.extend_from_slice(header.as_bytes());
        }
        out.extend_from_slice(b"\r\n");
    }

    out
}

/// 执行握手：先应答客户端，再把请求写给目标
///
/// 返回写给目标的字节数。所有写入在转发开始前完成。
pub async fn perform<C, T>(client: &mut C, target: &mut T, request: &ProxyRequest) -> std::io::Result<usize>
where
    C: AsyncWrite + Unpin,
    T: AsyncWrite + Unpin,
{
    if let Some(reply) = client_reply(request) {
        client.write_all(&reply).await?;
        client.flush().await?;
    }

    if request.vpn {
        info!(to = %request.url(), "proxying VPN connection");
    }

    let preamble = target_preamble(request);
    if !preamble.is_empty() {
        target.write_all(&preamble).await?;
        target.flush().await?;
    }

    Ok(preamble.len())
}
