//! Engine configuration for a CLI invocation.
//!
//! Precedence: command-line flags (with their env fallbacks) over the
//! config file over built-in defaults. The config file is the same TOML
//! shape the engine itself deserializes, so partial files work.

use std::path::{Path, PathBuf};

use anyhow::Context;
use yuume_engine::EngineConfig;

use crate::Cli;

pub fn resolve(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let path = config_path(cli.config.as_deref());
    let mut config = load_file(&path)?;

    if let Some(shop_domain) = &cli.shop_domain {
        config.shop_domain = shop_domain.clone();
    }
    if let Some(api_base) = &cli.api_base {
        config.api_base = api_base.clone();
    }
    if let Some(socket_url) = &cli.socket_url {
        config.socket_url = socket_url.clone();
    }
    if let Some(lang) = &cli.lang {
        config.lang = lang.clone();
    }
    if let Some(data_dir) = &cli.data_dir {
        config.data_dir = Some(data_dir.clone());
    }

    Ok(config)
}

fn config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".yuume")
        .join("config.toml")
}

fn load_file(path: &Path) -> anyhow::Result<EngineConfig> {
    if !path.exists() {
        return Ok(EngineConfig::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            shop_domain = "from-file.example.com"
            lang = "it"
            "#,
        )
        .expect("write config");

        let cli = Cli::try_parse_from([
            "yuume",
            "--config",
            path.to_str().expect("utf-8 path"),
            "--shop-domain",
            "from-flag.example.com",
            "chat",
        ])
        .expect("parse args");

        let config = resolve(&cli).expect("resolve");
        assert_eq!(config.shop_domain, "from-flag.example.com");
        assert_eq!(config.lang, "it");
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let cli = Cli::try_parse_from([
            "yuume",
            "--config",
            "/nonexistent/yuume-config.toml",
            "status",
        ])
        .expect("parse args");

        let config = resolve(&cli).expect("resolve");
        assert_eq!(config.api_base, "https://api.yuume.app");
        assert!(config.shop_domain.is_empty());
    }
}
