/// Common utilities for integration tests
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use vpn_proxy::config::ProxyConfig;
use vpn_proxy::stats::ProxyStats;

/// Running proxy instance bound to an ephemeral loopback port
pub struct TestProxy {
    pub addr: SocketAddr,
    stop_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<ProxyStats>,
}

impl TestProxy {
    /// Stop accepting and return the final counters
    pub async fn stop(mut self) -> ProxyStats {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        self.handle.await.expect("proxy task panicked")
    }
}

/// Proxy configuration with short timeouts suitable for tests
pub fn test_config() -> ProxyConfig {
    ProxyConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        header_timeout_secs: 5,
        idle_timeout_secs: 10,
        connect_timeout_secs: 2,
        ..Default::default()
    }
}

/// Start the proxy on 127.0.0.1 with a random port
pub async fn start_proxy(config: ProxyConfig) -> TestProxy {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind proxy listener");
    let addr = listener.local_addr().expect("Failed to get local addr");
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(vpn_proxy::serve(listener, config, stop_rx));

    TestProxy {
        addr,
        stop_tx: Some(stop_tx),
        handle,
    }
}

/// Target that accepts one connection and hands the stream to the test
pub async fn start_target() -> (SocketAddr, JoinHandle<TcpStream>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind target");
    let addr = listener.local_addr().expect("Failed to get local addr");
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("target accept failed");
        stream
    });
    (addr, handle)
}

/// Create a simple echo server for testing
pub async fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind echo server");
    let addr = listener.local_addr().expect("Failed to get local addr");

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut buf = vec![0u8; 8192];
                        loop {
                            match socket.read(&mut buf).await {
                                Ok(0) => break,
                                Ok(n) => {
                                    if socket.write_all(&buf[..n]).await.is_err() {
                                        break;
                                    }
                                }
                                Err(_) => break,
                            }
                        }
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Address nothing is listening on
pub async fn closed_port_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to random port");
    let addr = listener.local_addr().expect("Failed to get local addr");
    drop(listener);
    addr
}

/// Read exactly `len` bytes or fail after a timeout
pub async fn read_exactly(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .expect("Timeout waiting for data")
        .expect("Failed to read data");
    buf
}

/// Read until the peer closes; connection resets count as close
pub async fn read_until_close(stream: &mut TcpStream) -> Vec<u8> {
    let mut out = Vec::new();
    let _ = timeout(Duration::from_secs(5), stream.read_to_end(&mut out))
        .await
        .expect("Timeout waiting for close");
    out
}

/// Assert that nothing arrives on `stream` within `wait`
pub async fn assert_silent(stream: &mut TcpStream, wait: Duration) {
    let mut buf = [0u8; 1];
    match timeout(wait, stream.read(&mut buf)).await {
        Err(_) => {}
        Ok(Ok(0)) => panic!("stream closed unexpectedly"),
        Ok(Ok(_)) => panic!("unexpected byte received: {:?}", buf[0]),
        Ok(Err(e)) => panic!("read error: {}", e),
    }
}
