use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{ProxyError, Result};

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "vpn-proxy.toml";

/// 日志输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// 人类可读的单行文本
    #[default]
    Text,
    /// 每条记录一行 JSON
    Json,
}

/// 代理配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// 监听地址（`:8080` 形式等价于 `0.0.0.0:8080`）
    pub listen_addr: String,
    /// 日志级别 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 日志格式
    pub log_format: LogFormat,
    /// 请求头解析超时（秒，0 表示不限制）
    pub header_timeout_secs: u64,
    /// 转发空闲超时（秒，0 表示不限制）
    pub idle_timeout_secs: u64,
    /// 连接目标超时（秒，0 表示不限制）
    pub connect_timeout_secs: u64,
    /// TCP keepalive 首次探测时间（秒，0 表示使用系统默认）
    pub keepalive_secs: u64,
    /// TCP keepalive 探测间隔（秒，0 表示使用系统默认）
    pub keepalive_interval_secs: u64,
    /// 请求行加请求头的最大字节数
    pub max_header_bytes: usize,
    /// 最大并发会话数
    pub max_connections: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            header_timeout_secs: 30,
            idle_timeout_secs: 5 * 60,
            connect_timeout_secs: 10,
            keepalive_secs: 30,
            keepalive_interval_secs: 10,
            max_header_bytes: 64 * 1024,
            max_connections: 1000,
        }
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl ProxyConfig {
    /// 规范化后的监听地址
    pub fn bind_addr(&self) -> String {
        let addr = self.listen_addr.trim();
        if addr.starts_with(':') {
            format!("0.0.0.0{}", addr)
        } else {
            addr.to_string()
        }
    }

    pub fn header_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.header_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.idle_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.connect_timeout_secs)
    }

    pub fn keepalive_time(&self) -> Option<Duration> {
        non_zero_secs(self.keepalive_secs)
    }

    pub fn keepalive_interval(&self) -> Option<Duration> {
        non_zero_secs(self.keepalive_interval_secs)
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        let addr = self.bind_addr();
        if addr.is_empty() {
            return Err(ProxyError::config_error("listen_addr cannot be empty"));
        }
        match addr.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => match port.parse::<u16>() {
                Ok(0) => {
                    return Err(ProxyError::config_error(format!(
                        "listen_addr '{}': port cannot be 0",
                        addr
                    )))
                }
                Ok(_) => {}
                Err(e) => {
                    return Err(ProxyError::config_error(format!(
                        "listen_addr '{}': invalid port: {}",
                        addr, e
                    )))
                }
            },
            _ => {
                return Err(ProxyError::config_error(format!(
                    "listen_addr '{}' must be in host:port form",
                    addr
                )))
            }
        }

        if self.max_header_bytes == 0 {
            return Err(ProxyError::config_error("max_header_bytes cannot be 0"));
        }
        if self.max_connections == 0 {
            return Err(ProxyError::config_error("max_connections cannot be 0"));
        }
        if self.log_level.trim().is_empty() {
            return Err(ProxyError::config_error("log_level cannot be empty"));
        }

        Ok(())
    }

    /// 从 TOML 文本解析配置（`[proxy]` 表）
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        #[derive(Deserialize)]
        struct ProxyConfigWrapper {
            #[serde(default)]
            proxy: ProxyConfig,
        }

        let wrapper: ProxyConfigWrapper =
            toml::from_str(content).context("Failed to parse proxy configuration")?;
        wrapper
            .proxy
            .validate()
            .context("Proxy configuration validation failed")?;
        Ok(wrapper.proxy)
    }

    /// 从文件加载配置
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        Self::from_toml_str(&content)
    }

    /// 从文件加载配置，文件不存在时使用默认值
    pub fn load_or_default(path: &str) -> anyhow::Result<Self> {
        if Path::new(path).exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// 序列化为 `[proxy]` 表形式的 TOML
    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        #[derive(Serialize)]
        struct ProxyConfigWrapper<'a> {
            proxy: &'a ProxyConfig,
        }

        toml::to_string_pretty(&ProxyConfigWrapper { proxy: self })
            .context("Failed to serialize proxy configuration")
    }
}
