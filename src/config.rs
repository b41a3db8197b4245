//! 配置管理模块
//! 支持从环境变量和配置文件加载配置

use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// 应用配置结构体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub chain: ChainConfig,
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
}

/// 私钥加密配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// 存放主密钥的环境变量名（主密钥本身不写入配置文件）
    pub key_env: String,
}

/// 链交互配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// 单次 RPC 调用超时
    pub rpc_timeout_secs: u64,
    /// 等待回执的整体超时
    pub confirmation_timeout_secs: u64,
    pub receipt_poll_interval_ms: u64,
    pub default_confirmations: u64,
    /// 批量余额查询的并发上限
    pub balance_fan_out: usize,
    pub per_item_gas_floor: u64,
    pub fallback_gas_price_gwei: u64,
}

impl ChainConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://postgres@localhost:5432/ironescrow".into()),
            max_connections: env_parse("DB_MAX_CONNS").unwrap_or(16),
            min_connections: env_parse("DB_MIN_CONNS").unwrap_or(2),
            acquire_timeout_secs: env_parse("DB_ACQ_TIMEOUT_SECS").unwrap_or(5),
            idle_timeout_secs: env_parse("DB_IDLE_TIMEOUT_SECS").unwrap_or(300),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".into()),
        }
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            key_env: std::env::var("VAULT_KEY_ENV").unwrap_or_else(|_| "WALLET_ENC_KEY".into()),
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_timeout_secs: env_parse("RPC_TIMEOUT_SECS").unwrap_or(15),
            confirmation_timeout_secs: env_parse("CONFIRMATION_TIMEOUT_SECS").unwrap_or(120),
            receipt_poll_interval_ms: env_parse("RECEIPT_POLL_INTERVAL_MS").unwrap_or(2000),
            default_confirmations: env_parse("DEFAULT_CONFIRMATIONS").unwrap_or(1),
            balance_fan_out: env_parse("BALANCE_FAN_OUT").unwrap_or(8),
            per_item_gas_floor: env_parse("PER_ITEM_GAS_FLOOR").unwrap_or(200_000),
            fallback_gas_price_gwei: env_parse("FALLBACK_GAS_PRICE_GWEI").unwrap_or(20),
        }
    }
}

impl Config {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            vault: VaultConfig::default(),
            chain: ChainConfig::default(),
        })
    }

    /// 从配置文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// 从环境变量和配置文件合并加载（配置文件优先级更高）
    pub fn from_env_and_file<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut config = Self::from_env()?;

        if let Some(path) = path {
            if path.as_ref().exists() {
                config = Self::from_file(path)?;
            }
        }

        Ok(config)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        if !self.database.url.starts_with("postgres://")
            && !self.database.url.starts_with("postgresql://")
        {
            anyhow::bail!("DATABASE_URL must start with postgres:// or postgresql://");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("LOG_LEVEL must be one of: {:?}", valid_levels);
        }

        if self.logging.format != "json" && self.logging.format != "text" {
            anyhow::bail!("LOG_FORMAT must be 'json' or 'text'");
        }

        if self.vault.key_env.trim().is_empty() {
            anyhow::bail!("vault.key_env must name an environment variable");
        }

        if self.chain.rpc_timeout_secs == 0 || self.chain.confirmation_timeout_secs == 0 {
            anyhow::bail!("RPC and confirmation timeouts must be non-zero");
        }

        if self.chain.balance_fan_out == 0 {
            anyhow::bail!("BALANCE_FAN_OUT must be at least 1");
        }

        if self.chain.default_confirmations == 0 {
            anyhow::bail!("DEFAULT_CONFIRMATIONS must be at least 1");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[database]
url = "postgres://test@localhost/test"
max_connections = 20
min_connections = 5
acquire_timeout_secs = 30
idle_timeout_secs = 600

[logging]
level = "debug"
format = "json"

[vault]
key_env = "ESCROW_MASTER_KEY"

[chain]
rpc_timeout_secs = 10
confirmation_timeout_secs = 90
receipt_poll_interval_ms = 500
default_confirmations = 2
balance_fan_out = 4
per_item_gas_floor = 150000
fallback_gas_price_gwei = 25
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.vault.key_env, "ESCROW_MASTER_KEY");
        assert_eq!(config.chain.default_confirmations, 2);
        assert_eq!(config.chain.rpc_timeout(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sections_default_when_missing() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[database]
url = "postgres://test@localhost/test"
max_connections = 4
min_connections = 1
acquire_timeout_secs = 5
idle_timeout_secs = 60

[logging]
level = "info"
format = "text"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert!(config.chain.balance_fan_out >= 1);
        assert!(!config.vault.key_env.is_empty());
    }

    #[test]
    fn test_config_validation_rejects_bad_format() {
        let mut config = Config::from_env().unwrap();
        config.database.url = "postgres://localhost/x".into();
        config.logging.level = "info".into();
        config.logging.format = "yaml".into();
        assert!(config.validate().is_err());
    }
}
