//! vpn-proxy 库入口
//!
//! 将核心模块导出为库，方便测试和复用
pub mod cli;
pub mod config;
pub mod error;
pub mod proxy;
pub mod server;
pub mod stats;

// 重新导出常用类型
pub use config::ProxyConfig;
pub use error::{ProxyError, Result};
pub use proxy::{handle_connection, ProxyRequest, Session, SessionOptions, SessionState};
pub use server::{run_proxy, serve};
