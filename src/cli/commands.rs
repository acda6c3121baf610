use anyhow::Result;
use tracing::info;

use crate::config::ProxyConfig;

use super::config::{check_config, expand_path};
use super::{template, Cli, Commands};

/// 加载运行配置：配置文件（可缺省）加命令行覆盖项
pub fn load_run_config(cli: &Cli, listen: Option<&str>) -> Result<ProxyConfig> {
    let config_path = expand_path(&cli.config)?;
    let mut config = ProxyConfig::load_or_default(&config_path)?;

    if let Some(addr) = listen {
        config.listen_addr = addr.to_string();
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }

    config.validate()?;
    Ok(config)
}

/// Execute CLI commands
pub async fn execute_command(cli: &Cli, config: Option<ProxyConfig>) -> Result<()> {
    match &cli.command {
        Some(Commands::Check { format }) => {
            let config_path = expand_path(&cli.config)?;
            check_config(&config_path, format)?;
        }
        Some(Commands::Template { output }) => {
            template::generate_config_template(output.as_deref())?;
        }
        Some(Commands::Run { .. }) | None => {
            let config = match config {
                Some(config) => config,
                None => load_run_config(cli, None)?,
            };
            info!("vpn-proxy v{}", env!("CARGO_PKG_VERSION"));
            crate::server::run_proxy(config).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogFormat;
    use clap::Parser;

    #[test]
    fn test_cli_overrides_file_defaults() {
        let cli = Cli::try_parse_from([
            "vpn-proxy",
            "--config",
            "/nonexistent/vpn-proxy.toml",
            "--log-level",
            "debug",
            "--log-format",
            "json",
        ])
        .unwrap();
        let config = load_run_config(&cli, Some(":3128")).unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:3128");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_listen_override_rejected() {
        let cli = Cli::try_parse_from(["vpn-proxy", "--config", "/nonexistent/vpn-proxy.toml"]).unwrap();
        assert!(load_run_config(&cli, Some("no-port")).is_err());
    }
}
