use socket2::{SockRef, TcpKeepalive};
use std::io;
use std::time::Duration;
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};

/// 连接目标时使用的套接字选项
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// 解析加建立连接的总超时
    pub connect_timeout: Option<Duration>,
    /// Keepalive 首次探测时间
    pub keepalive_time: Option<Duration>,
    /// Keepalive 探测间隔
    pub keepalive_interval: Option<Duration>,
}

impl From<&ProxyConfig> for ConnectOptions {
    fn from(config: &ProxyConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            keepalive_time: config.keepalive_time(),
            keepalive_interval: config.keepalive_interval(),
        }
    }
}

/// 开启 TCP keepalive，未设置的参数沿用系统默认值
pub fn apply_keepalive(stream: &TcpStream, options: &ConnectOptions) {
    let mut keepalive = TcpKeepalive::new();
    if let Some(time) = options.keepalive_time {
        keepalive = keepalive.with_time(time);
    }
    if let Some(interval) = options.keepalive_interval {
        keepalive = keepalive.with_interval(interval);
    }

    let sock_ref = SockRef::from(stream);
    if let Err(e) = sock_ref.set_tcp_keepalive(&keepalive) {
        warn!(
            "Failed to set TCP keepalive on {}: {}",
            stream
                .peer_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "unknown".into()),
            e
        );
    }
}

async fn dial(target: &str) -> Result<TcpStream> {
    let addrs: Vec<_> = lookup_host(target)
        .await
        .map_err(|e| ProxyError::resolve_failed(target, e))?
        .collect();
    if addrs.is_empty() {
        return Err(ProxyError::resolve_failed(
            target,
            io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
        ));
    }

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(%addr, error = %e, "connect attempt failed");
                last_error = Some(e);
            }
        }
    }

    Err(ProxyError::connection_failed(
        target,
        last_error.unwrap_or_else(|| io::Error::other("no address could be connected")),
    ))
}

/// 解析并连接目标地址，返回已开启 keepalive 的连接
pub async fn connect_target(target: &str, options: &ConnectOptions) -> Result<TcpStream> {
    if target.is_empty() {
        return Err(ProxyError::missing_authority(target));
    }

    let stream = match options.connect_timeout {
        Some(duration) => timeout(duration, dial(target)).await.map_err(|_| {
            ProxyError::connection_failed(
                target,
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect timed out after {:?}", duration),
                ),
            )
        })??,
        None => dial(target).await?,
    };

    apply_keepalive(&stream, options);
    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY: {}", e);
    }

    Ok(stream)
}
