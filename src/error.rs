//! 会话错误类型
//!
//! 使用 thiserror 定义精确的错误类型，区分解析、拨号和传输阶段的失败，
//! 便于会话处理器决定日志级别
use std::io;
use std::time::Duration;
use thiserror::Error;

/// 代理会话的主要错误类型
#[derive(Error, Debug)]
pub enum ProxyError {
    /// 请求行格式错误（不是三段或第三段不以 HTTP/ 开头）
    #[error("Malformed request line: {line:?}")]
    MalformedRequestLine { line: String },

    /// HTTP 请求无法确定目标主机
    #[error("Cannot determine target host from {url:?}")]
    MissingAuthority { url: String },

    /// 请求头读取完成前连接被关闭
    #[error("Unexpected EOF while reading request header")]
    UnexpectedEof,

    /// 请求头超过大小限制
    #[error("Request header exceeds {limit} bytes")]
    HeaderTooLarge { limit: usize },

    /// 超时错误
    #[error("Operation timeout after {duration:?}")]
    Timeout { duration: Duration },

    /// 目标地址解析失败
    #[error("Failed to resolve {target}: {source}")]
    ResolveFailed {
        target: String,
        #[source]
        source: io::Error,
    },

    /// 连接目标失败
    #[error("Failed to connect to {addr}: {source}")]
    ConnectionFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O 错误
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, ProxyError>;

impl ProxyError {
    pub fn malformed(line: impl Into<String>) -> Self {
        Self::MalformedRequestLine { line: line.into() }
    }

    pub fn missing_authority(url: impl Into<String>) -> Self {
        Self::MissingAuthority { url: url.into() }
    }

    pub fn resolve_failed(target: impl Into<String>, source: io::Error) -> Self {
        Self::ResolveFailed {
            target: target.into(),
            source,
        }
    }

    pub fn connection_failed(addr: impl Into<String>, source: io::Error) -> Self {
        Self::ConnectionFailed {
            addr: addr.into(),
            source,
        }
    }

    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// 检查是否为请求解析阶段的错误
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedRequestLine { .. }
                | Self::MissingAuthority { .. }
                | Self::UnexpectedEof
                | Self::HeaderTooLarge { .. }
        )
    }

    /// 检查是否为解析/连接目标阶段的错误
    pub fn is_dial_error(&self) -> bool {
        matches!(
            self,
            Self::ResolveFailed { .. } | Self::ConnectionFailed { .. }
        )
    }

    /// 拨号失败时对应的目标地址
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::ResolveFailed { target, .. } => Some(target),
            Self::ConnectionFailed { addr, .. } => Some(addr),
            _ => None,
        }
    }

    /// 检查是否为超时错误
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
