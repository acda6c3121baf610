use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::ProxyConfig;

#[derive(Serialize)]
struct CheckResult {
    valid: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<ProxyConfig>,
}

/// Expand path with tilde (~) and make it absolute
pub fn expand_path(path: &str) -> Result<String> {
    let expanded = shellexpand::tilde(path);
    let path_buf = PathBuf::from(expanded.as_ref());

    if path_buf.is_absolute() {
        Ok(expanded.into_owned())
    } else {
        std::env::current_dir()
            .context("Failed to get current directory")?
            .join(&path_buf)
            .to_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid path: {}", path))
    }
}

/// 非致命的配置提示
fn config_warnings(config: &ProxyConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    if config.header_timeout().is_none() {
        warnings.push("header_timeout_secs = 0: slow clients can hold sessions open forever".to_string());
    }
    if config.idle_timeout().is_none() {
        warnings.push("idle_timeout_secs = 0: silent peers are never reclaimed".to_string());
    }
    if config.connect_timeout().is_none() {
        warnings.push("connect_timeout_secs = 0: dialing relies on the OS timeout".to_string());
    }
    warnings
}

fn print_result(result: &CheckResult, format: &str) -> Result<()> {
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    match (&result.config, &result.error) {
        (Some(config), _) => {
            println!("✓ Configuration is valid\n");
            println!("{}", config.to_toml_string()?);
        }
        (None, Some(error)) => println!("✗ {}", error),
        (None, None) => {}
    }
    for warning in &result.warnings {
        println!("⚠ {}", warning);
    }
    Ok(())
}

/// Check configuration file format
pub fn check_config(config_path: &str, format: &str) -> Result<()> {
    if !Path::new(config_path).exists() {
        let error = format!("Configuration file not found: {}", config_path);
        print_result(
            &CheckResult {
                valid: false,
                warnings: vec![],
                error: Some(error.clone()),
                config: None,
            },
            format,
        )?;
        anyhow::bail!(error);
    }

    if format == "text" {
        println!("Checking configuration file: {}\n", config_path);
    }

    match ProxyConfig::load(config_path) {
        Ok(config) => print_result(
            &CheckResult {
                valid: true,
                warnings: config_warnings(&config),
                error: None,
                config: Some(config),
            },
            format,
        ),
        Err(e) => {
            let error = format!("{:#}", e);
            print_result(
                &CheckResult {
                    valid: false,
                    warnings: vec![],
                    error: Some(error.clone()),
                    config: None,
                },
                format,
            )?;
            anyhow::bail!(error)
        }
    }
}
