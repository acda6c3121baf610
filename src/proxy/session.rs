use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use super::connector::{connect_target, ConnectOptions};
use super::handshake::{self, ForwardMode, HandshakePlan};
use super::relay::{relay, RelayStats};
use super::request::{read_request, ProxyRequest};
use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};

/// 会话状态
///
/// `Parsing -> Connecting -> Handshaking -> Relaying -> Closed`，
/// 解析或连接阶段的致命错误进入 `Failed`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Parsing,
    Connecting,
    Handshaking,
    Relaying,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

/// 每个会话共享的只读参数
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub max_header_bytes: usize,
    pub header_timeout: Option<Duration>,
    pub idle_timeout: Option<Duration>,
    pub connect: ConnectOptions,
}

impl From<&ProxyConfig> for SessionOptions {
    fn from(config: &ProxyConfig) -> Self {
        Self {
            max_header_bytes: config.max_header_bytes,
            header_timeout: config.header_timeout(),
            idle_timeout: config.idle_timeout(),
            connect: ConnectOptions::from(config),
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&ProxyConfig::default())
    }
}

/// 会话结束后的报告
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub request: ProxyRequest,
    pub mode: ForwardMode,
    pub stats: RelayStats,
}

/// 单个客户端连接的处理器
pub struct Session {
    id: Uuid,
    peer: String,
    state: SessionState,
    started_at: Instant,
    options: Arc<SessionOptions>,
}

impl Session {
    pub fn new(peer: impl Into<String>, options: Arc<SessionOptions>) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer: peer.into(),
            state: SessionState::Parsing,
            started_at: Instant::now(),
            options,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    fn fail(&mut self, err: ProxyError) -> ProxyError {
        self.transition(SessionState::Failed);
        err
    }

    async fn parse<R>(&self, reader: &mut BufReader<R>) -> Result<ProxyRequest>
    where
        R: AsyncRead + Unpin,
    {
        let parse = read_request(reader, self.options.max_header_bytes);
        match self.options.header_timeout {
            Some(duration) => timeout(duration, parse)
                .await
                .map_err(|_| ProxyError::timeout(duration))?,
            None => parse.await,
        }
    }

    /// 运行整个会话，直到两端连接都关闭
    pub async fn run<C>(&mut self, client: C) -> Result<SessionReport>
    where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        let mut client = BufReader::new(client);

        let request = match self.parse(&mut client).await {
            Ok(request) => request,
            Err(e) => return Err(self.fail(e)),
        };
        info!(
            from = %self.peer,
            to = %request.url(),
            proto = %request.protocol(),
            scheme = %request.scheme,
            verb = %request.method(),
            vpn = request.vpn,
            "new connection"
        );

        self.transition(SessionState::Connecting);
        let mut target: TcpStream = match connect_target(&request.target, &self.options.connect).await {
            Ok(stream) => stream,
            Err(e) => return Err(self.fail(e)),
        };

        self.transition(SessionState::Handshaking);
        let mode = HandshakePlan::new(request.scheme, request.vpn).mode();
        if let Err(e) = handshake::perform(&mut client, &mut target, &request).await {
            debug!(error = %e, "handshake write failed");
            self.transition(SessionState::Closed);
            return Ok(SessionReport {
                request,
                mode,
                stats: RelayStats {
                    duration: self.started_at.elapsed(),
                    ..Default::default()
                },
            });
        }

        self.transition(SessionState::Relaying);
        let stats = relay(client, target, self.options.idle_timeout, self.started_at).await;
        self.transition(SessionState::Closed);

        Ok(SessionReport {
            request,
            mode,
            stats,
        })
    }
}

fn truncate_to_millis(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}

/// 处理一个已接受的连接并记录结果
///
/// 失败只影响当前会话，错误在这里记录后返回给调用方用于统计。
pub async fn handle_connection<C>(
    client: C,
    peer: String,
    options: Arc<SessionOptions>,
) -> Result<SessionReport>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    let mut session = Session::new(peer, options);
    let span = info_span!("session", id = %session.id(), peer = %session.peer());
    let result = session.run(client).instrument(span.clone()).await;

    span.in_scope(|| match &result {
        Ok(report) => info!(
            from = %session.peer(),
            to = %report.request.url(),
            target = %report.request.target,
            mode = report.mode.as_str(),
            bytes_received_from_client = report.stats.bytes_from_client,
            bytes_sent_to_client = report.stats.bytes_to_client,
            duration = ?truncate_to_millis(report.stats.duration),
            "connection closed"
        ),
        Err(e) if e.is_dial_error() => {
            error!(
                from = %session.peer(),
                target = e.target().unwrap_or_default(),
                error = %e,
                "Error connecting to target"
            )
        }
        Err(ProxyError::Timeout { duration }) => {
            error!(from = %session.peer(), timeout = ?duration, "Timed out reading request header")
        }
        Err(e) => error!(from = %session.peer(), error = %e, "Error parsing request"),
    });

    result
}
