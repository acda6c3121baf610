use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use vpn_proxy::cli::{commands::execute_command, load_run_config, Cli, Commands};
use vpn_proxy::config::{LogFormat, ProxyConfig};

/// 初始化日志；RUST_LOG 优先于配置中的级别
fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.command {
        Some(Commands::Run { listen }) => Some(load_run_config(&cli, listen.as_deref())?),
        None => Some(load_run_config(&cli, None)?),
        _ => None,
    };

    let defaults = ProxyConfig::default();
    let (level, format) = match &config {
        Some(config) => (config.log_level.clone(), config.log_format),
        None => (
            cli.log_level.clone().unwrap_or(defaults.log_level),
            cli.log_format.unwrap_or(defaults.log_format),
        ),
    };
    init_tracing(&level, format);

    execute_command(&cli, config).await
}
