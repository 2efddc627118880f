//! 全局连接参数（覆盖配置文件和环境变量）

use crate::config::CenterConfig;
use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

/// 全局参数
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// 配置文件路径 (默认: ~/.config/notification-center/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// 订阅者 id
    #[arg(long, short, global = true)]
    pub subscriber: Option<String>,

    /// REST 接口基础 URL
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// 推送通道 URL 模板
    #[arg(long, global = true)]
    pub ws_url: Option<String>,

    /// Bearer token
    #[arg(long, global = true)]
    pub token: Option<String>,
}

impl GlobalArgs {
    /// 合并配置文件、环境变量和命令行参数
    pub fn resolve(&self) -> Result<CenterConfig> {
        let path = self.config.clone().unwrap_or_else(CenterConfig::path);
        let config = CenterConfig::load_from(&path)?.with_env_overrides();
        let config = self.apply(config);
        config.validate()?;
        Ok(config)
    }

    fn apply(&self, mut config: CenterConfig) -> CenterConfig {
        if let Some(subscriber) = &self.subscriber {
            config.subscriber_id = Some(subscriber.clone());
        }
        if let Some(url) = &self.api_url {
            config.api_base_url = url.clone();
        }
        if let Some(url) = &self.ws_url {
            config.ws_url_template = url.clone();
        }
        if let Some(token) = &self.token {
            config.api_token = token.clone();
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_flags_override_config() {
        let args = GlobalArgs {
            subscriber: Some("prof-2".to_string()),
            api_url: Some("https://api.example.edu".to_string()),
            ..Default::default()
        };
        let base = CenterConfig {
            subscriber_id: Some("prof-1".to_string()),
            api_token: "from-file".to_string(),
            ..Default::default()
        };

        let config = args.apply(base);
        assert_eq!(config.subscriber_id.as_deref(), Some("prof-2"));
        assert_eq!(config.api_base_url, "https://api.example.edu");
        assert_eq!(config.api_token, "from-file");
    }

    #[test]
    fn test_resolve_reads_given_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"subscriber_id": "prof-file", "capacity": 10}"#).unwrap();

        let args = GlobalArgs {
            config: Some(path),
            subscriber: Some("prof-flag".to_string()),
            ..Default::default()
        };
        let config = args.resolve().unwrap();
        assert_eq!(config.capacity, 10);
        assert_eq!(config.subscriber_id.as_deref(), Some("prof-flag"));
    }
}
