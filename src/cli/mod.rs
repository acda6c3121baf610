pub mod commands;
pub mod config;
pub mod template;

use clap::{Parser, Subcommand};

use crate::config::{LogFormat, DEFAULT_CONFIG_PATH};

// Re-export commonly used items
pub use commands::load_run_config;

#[derive(Parser, Debug)]
#[command(name = "vpn-proxy")]
#[command(author, version, about = "Forward HTTP/CONNECT proxy with reversed-VPN forwarding", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// 配置文件路径（不存在时使用默认配置）
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, global = true)]
    pub config: String,

    /// 日志级别 (trace, debug, info, warn, error)，覆盖配置文件
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// 日志格式，覆盖配置文件
    #[arg(long, value_enum, global = true)]
    pub log_format: Option<LogFormat>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 运行代理（默认）
    Run {
        /// 监听地址，覆盖配置文件中的 listen_addr
        #[arg(long, value_name = "ADDR")]
        listen: Option<String>,
    },
    /// 检查配置文件格式是否正确
    Check {
        /// 输出格式 (text, json)
        #[arg(long, default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },
    /// 生成示例配置文件
    Template {
        /// 输出文件路径（缺省输出到标准输出）
        #[arg(short, long)]
        output: Option<String>,
    },
}
