use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 数据复制缓冲区大小（64KB 适合高吞吐）
const COPY_BUFFER_SIZE: usize = 65536;

/// 转发结束后的统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelayStats {
    /// 客户端 -> 目标 的字节数
    pub bytes_from_client: u64,
    /// 目标 -> 客户端 的字节数
    pub bytes_to_client: u64,
    /// 从会话开始到转发结束的时长
    pub duration: Duration,
}

/// 单方向复制的结果，出错时也保留已写出的字节数
struct CopyOutcome {
    bytes: u64,
    error: Option<io::Error>,
}

/// 两个方向共享的空闲计时
///
/// 任一方向读写成功都会刷新活动时间，只有两个方向都空闲满 `timeout` 才算超时。
struct IdleTimer {
    timeout: Duration,
    origin: Instant,
    last_activity_ms: AtomicU64,
}

impl IdleTimer {
    fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            origin: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let now = self.origin.elapsed().as_millis() as u64;
        self.last_activity_ms.fetch_max(now, Ordering::Relaxed);
    }

    fn remaining(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed));
        let idle = self.origin.elapsed().saturating_sub(last);
        self.timeout.saturating_sub(idle)
    }
}

fn idle_timeout_error() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "Connection idle timeout")
}

async fn read_with_idle_timeout<R>(
    reader: &mut R,
    buf: &mut [u8],
    idle: Option<&IdleTimer>,
) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let Some(timer) = idle else {
        return reader.read(buf).await;
    };

    // 超时后重新检查共享的活动时间，另一方向仍在传输时继续等待
    loop {
        let remaining = timer.remaining();
        if remaining.is_zero() {
            return Err(idle_timeout_error());
        }
        if let Ok(result) = timeout(remaining, reader.read(&mut *buf)).await {
            if matches!(result, Ok(n) if n > 0) {
                timer.touch();
            }
            return result;
        }
    }
}

async fn write_with_idle_timeout<W>(
    writer: &mut W,
    data: &[u8],
    idle: Option<&IdleTimer>,
) -> io::Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let Some(timer) = idle else {
        return writer.write(data).await;
    };

    loop {
        let remaining = timer.remaining();
        if remaining.is_zero() {
            return Err(idle_timeout_error());
        }
        if let Ok(result) = timeout(remaining, writer.write(data)).await {
            if matches!(result, Ok(n) if n > 0) {
                timer.touch();
            }
            return result;
        }
    }
}

async fn cancelled(cancel: Option<&CancellationToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

/// 带空闲超时的数据复制
///
/// 读到 EOF、出错、空闲超时或被取消时结束。取消对阻塞中的读和写都生效，
/// 计数只包含已成功写出的字节。
async fn copy_counted<R, W>(
    reader: &mut R,
    writer: &mut W,
    idle: Option<&IdleTimer>,
    cancel: Option<&CancellationToken>,
) -> CopyOutcome
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut total_copied = 0u64;

    loop {
        let read = tokio::select! {
            biased;
            _ = cancelled(cancel) => None,
            result = read_with_idle_timeout(reader, &mut buf, idle) => Some(result),
        };

        let n = match read {
            None | Some(Ok(0)) => break,
            Some(Ok(n)) => n,
            Some(Err(e)) => {
                return CopyOutcome {
                    bytes: total_copied,
                    error: Some(e),
                }
            }
        };

        let mut written = 0;
        while written < n {
            let write = tokio::select! {
                biased;
                _ = cancelled(cancel) => None,
                result = write_with_idle_timeout(writer, &buf[written..n], idle) => Some(result),
            };

            let error = match write {
                None => {
                    return CopyOutcome {
                        bytes: total_copied,
                        error: None,
                    }
                }
                Some(Ok(0)) => io::Error::from(io::ErrorKind::WriteZero),
                Some(Ok(m)) => {
                    written += m;
                    total_copied += m as u64;
                    continue;
                }
                Some(Err(e)) => e,
            };
            return CopyOutcome {
                bytes: total_copied,
                error: Some(error),
            };
        }
    }

    CopyOutcome {
        bytes: total_copied,
        error: None,
    }
}

/// 在客户端和目标之间双向转发数据
///
/// 两个方向并发运行，各自通过返回值上报字节数。客户端先结束时半关闭目标写端，
/// 等待目标结束；目标 -> 客户端 结束时取消另一方向。两个计数都确定后才丢弃连接，
/// 连接在此函数返回时关闭且只关闭一次。复制中的 I/O 错误视为正常结束。
/// 空闲超时按两个方向合计的最近活动计算。
pub async fn relay<C, T>(
    client: C,
    target: T,
    idle_timeout: Option<Duration>,
    started_at: Instant,
) -> RelayStats
where
    C: AsyncRead + AsyncWrite + Unpin,
    T: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut target_read, mut target_write) = tokio::io::split(target);
    let target_done = CancellationToken::new();
    let idle = idle_timeout.map(IdleTimer::new);

    let client_to_target = async {
        let outcome = copy_counted(
            &mut client_read,
            &mut target_write,
            idle.as_ref(),
            Some(&target_done),
        )
        .await;
        if let Some(e) = &outcome.error {
            debug!(error = %e, "Error copying from client to target");
        }
        let _ = target_write.shutdown().await;
        outcome.bytes
    };

    let target_to_client = async {
        let outcome = copy_counted(&mut target_read, &mut client_write, idle.as_ref(), None).await;
        if let Some(e) = &outcome.error {
            debug!(error = %e, "Error copying from target to client");
        }
        let _ = client_write.shutdown().await;
        target_done.cancel();
        outcome.bytes
    };

    let (bytes_from_client, bytes_to_client) = tokio::join!(client_to_target, target_to_client);

    RelayStats {
        bytes_from_client,
        bytes_to_client,
        duration: started_at.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_relay_both_directions() {
        let (client_proxy, mut client) = duplex(1024);
        let (target_proxy, mut target) = duplex(1024);

        let handle = tokio::spawn(relay(client_proxy, target_proxy, None, Instant::now()));

        client.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        target.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        target.write_all(b"world!").await.unwrap();
        drop(target);

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"world!");

        let stats = handle.await.unwrap();
        assert_eq!(stats.bytes_from_client, 5);
        assert_eq!(stats.bytes_to_client, 6);
    }

    #[tokio::test]
    async fn test_client_close_half_closes_target() {
        let (client_proxy, mut client) = duplex(1024);
        let (target_proxy, mut target) = duplex(1024);

        let handle = tokio::spawn(relay(client_proxy, target_proxy, None, Instant::now()));

        client.write_all(b"request").await.unwrap();
        client.shutdown().await.unwrap();

        let mut request = Vec::new();
        target.read_to_end(&mut request).await.unwrap();
        assert_eq!(request, b"request");

        target.write_all(b"late response").await.unwrap();
        drop(target);

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, b"late response");

        let stats = handle.await.unwrap();
        assert_eq!(stats.bytes_from_client, 7);
        assert_eq!(stats.bytes_to_client, 13);
    }

    #[tokio::test]
    async fn test_target_close_ends_session_while_client_idle() {
        let (client_proxy, _client) = duplex(1024);
        let (target_proxy, target) = duplex(1024);

        let handle = tokio::spawn(relay(client_proxy, target_proxy, None, Instant::now()));
        drop(target);

        let stats = timeout(Duration::from_secs(5), handle)
            .await
            .expect("relay should end when target closes")
            .unwrap();
        assert_eq!(stats.bytes_from_client, 0);
        assert_eq!(stats.bytes_to_client, 0);
    }

    #[tokio::test]
    async fn test_idle_timeout_reclaims_session() {
        let (client_proxy, _client) = duplex(1024);
        let (target_proxy, _target) = duplex(1024);

        let stats = timeout(
            Duration::from_secs(5),
            relay(
                client_proxy,
                target_proxy,
                Some(Duration::from_millis(50)),
                Instant::now(),
            ),
        )
        .await
        .expect("idle relay should time out");
        assert_eq!(stats.bytes_from_client, 0);
        assert!(stats.duration >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_active_upload_survives_silent_target() {
        let (client_proxy, client) = duplex(1024);
        let (target_proxy, mut target) = duplex(1024);
        let idle = Duration::from_millis(200);
        let handle = tokio::spawn(relay(client_proxy, target_proxy, Some(idle), Instant::now()));

        let (_client_read, mut client_write) = tokio::io::split(client);
        let uploader = tokio::spawn(async move {
            for i in 0..20u8 {
                client_write.write_all(&[i]).await.unwrap();
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            client_write.shutdown().await.unwrap();
        });

        let mut got = Vec::new();
        timeout(Duration::from_secs(5), target.read_to_end(&mut got))
            .await
            .expect("upload should finish")
            .unwrap();
        uploader.await.unwrap();
        assert_eq!(got, (0..20u8).collect::<Vec<_>>());

        drop(target);
        let stats = handle.await.unwrap();
        assert_eq!(stats.bytes_from_client, 20);
        assert!(stats.duration >= Duration::from_millis(900));
    }

    #[tokio::test]
    async fn test_active_download_survives_silent_client() {
        let (client_proxy, mut client) = duplex(1024);
        let (target_proxy, target) = duplex(1024);
        let idle = Duration::from_millis(200);
        let handle = tokio::spawn(relay(client_proxy, target_proxy, Some(idle), Instant::now()));

        let (_target_read, mut target_write) = tokio::io::split(target);
        let downloader = tokio::spawn(async move {
            for i in 0..20u8 {
                target_write.write_all(&[i]).await.unwrap();
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            target_write.shutdown().await.unwrap();
        });

        let mut got = Vec::new();
        timeout(Duration::from_secs(5), client.read_to_end(&mut got))
            .await
            .expect("download should finish")
            .unwrap();
        downloader.await.unwrap();
        assert_eq!(got, (0..20u8).collect::<Vec<_>>());

        let stats = handle.await.unwrap();
        assert_eq!(stats.bytes_to_client, 20);
    }

    #[tokio::test]
    async fn test_target_close_interrupts_blocked_upload() {
        let (client_proxy, mut client) = duplex(4096);
        let (target_proxy, mut target) = duplex(64);
        let handle = tokio::spawn(relay(client_proxy, target_proxy, None, Instant::now()));

        // 目标不读数据，上传方向会阻塞在写入上
        client.write_all(&[7u8; 1024]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        target.shutdown().await.unwrap();

        let stats = timeout(Duration::from_secs(2), handle)
            .await
            .expect("relay should end when target closes")
            .unwrap();

        let mut delivered = Vec::new();
        target.read_to_end(&mut delivered).await.unwrap();
        assert!(!delivered.is_empty());
        assert_eq!(stats.bytes_from_client, delivered.len() as u64);
        assert_eq!(stats.bytes_to_client, 0);
    }

    #[tokio::test]
    async fn test_counts_match_bytes_delivered() {
        let mut upload = vec![0u8; 300 * 1024];
        let mut download = vec![0u8; 200 * 1024 + 17];
        rand::rng().fill_bytes(&mut upload);
        rand::rng().fill_bytes(&mut download);

        let (client_proxy, client) = duplex(8192);
        let (target_proxy, target) = duplex(8192);
        let handle = tokio::spawn(relay(client_proxy, target_proxy, None, Instant::now()));

        let (mut client_read, mut client_write) = tokio::io::split(client);
        let (mut target_read, mut target_write) = tokio::io::split(target);

        let up = upload.clone();
        let client_writer = tokio::spawn(async move {
            client_write.write_all(&up).await.unwrap();
            client_write.shutdown().await.unwrap();
        });
        let target_reader = tokio::spawn(async move {
            let mut got = Vec::new();
            target_read.read_to_end(&mut got).await.unwrap();
            got
        });

        let got_upload = target_reader.await.unwrap();
        client_writer.await.unwrap();
        assert_eq!(got_upload, upload);

        let down = download.clone();
        let target_writer = tokio::spawn(async move {
            target_write.write_all(&down).await.unwrap();
            target_write.shutdown().await.unwrap();
        });
        let mut got_download = Vec::new();
        client_read.read_to_end(&mut got_download).await.unwrap();
        target_writer.await.unwrap();
        assert_eq!(got_download, download);

        let stats = handle.await.unwrap();
        assert_eq!(stats.bytes_from_client, upload.len() as u64);
        assert_eq!(stats.bytes_to_client, download.len() as u64);
    }
}
