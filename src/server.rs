use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use crate::config::ProxyConfig;
use crate::proxy::connector::apply_keepalive;
use crate::proxy::{handle_connection, SessionOptions};
use crate::stats::{ProxyStats, StatsTracker};

/// 绑定监听地址并运行代理，直到收到 Ctrl+C
pub async fn run_proxy(config: ProxyConfig) -> Result<()> {
    let bind_addr = config.bind_addr();
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind proxy to {}", bind_addr))?;

    info!("Proxy server listening on {}", bind_addr);
    info!("Waiting for client connections... (Press Ctrl+C to stop)");

    let stats = serve(listener, config, tokio::signal::ctrl_c()).await;
    info!(
        total = stats.total_connections,
        active = stats.active_connections,
        failed = stats.failed_connections,
        vpn = stats.vpn_connections,
        bytes_from_clients = stats.bytes_from_clients,
        bytes_to_clients = stats.bytes_to_clients,
        "Proxy server stopped"
    );

    Ok(())
}

/// 在已绑定的监听器上接受连接，每个连接一个独立任务
///
/// `shutdown` 完成后停止接受新连接，已建立的会话继续运行到自然结束。
pub async fn serve<F>(listener: TcpListener, config: ProxyConfig, shutdown: F) -> ProxyStats
where
    F: Future,
{
    let options = Arc::new(SessionOptions::from(&config));
    let stats = StatsTracker::new();

    // 创建信号量限制并发连接数
    let connection_limiter = Arc::new(Semaphore::new(config.max_connections));
    info!("Maximum concurrent connections: {}", config.max_connections);

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((client_stream, peer_addr)) => {
                        apply_keepalive(&client_stream, &options.connect);
                        if let Err(e) = client_stream.set_nodelay(true) {
                            warn!("Failed to set TCP_NODELAY: {}", e);
                        }

                        let permit = match connection_limiter.clone().try_acquire_owned() {
                            Ok(permit) => permit,
                            Err(_) => {
                                warn!(
                                    "Connection limit reached ({}), rejecting connection from {}",
                                    config.max_connections, peer_addr
                                );
                                drop(client_stream);
                                continue;
                            }
                        };

                        stats.connection_started();
                        let options = options.clone();
                        let stats = stats.clone();

                        tokio::spawn(async move {
                            // 持有 permit 直到任务结束，自动释放
                            let _permit = permit;
                            match handle_connection(client_stream, peer_addr.to_string(), options).await {
                                Ok(report) => stats.connection_closed(report.mode, &report.stats),
                                Err(_) => stats.connection_failed(),
                            }
                        });
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        sleep(Duration::from_millis(100)).await;
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Received shutdown signal, stopping proxy...");
                break;
            }
        }
    }

    stats.snapshot()
}
