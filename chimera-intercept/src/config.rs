//! 拦截引擎配置
//!
//! 从 TOML 文件加载，再用带前缀的环境变量覆盖：
//!
//! ```toml
//! [proxy]
//! expose_proxy = true
//! cache_chains = true
//!
//! [logging]
//! level = "debug"
//! ```
//!
//! 环境变量名由前缀加上大写的配置键组成，例如 `CHIMERA_AOP_PROXY_EXPOSE_PROXY=true`。

use crate::error::{AopError, AopResult};
use crate::logging::LoggingConfig;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// 默认的环境变量前缀
pub const DEFAULT_ENV_PREFIX: &str = "CHIMERA_AOP_";

/// 代理配置
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// 类型过滤已经在上游完成，解析时跳过类型过滤器
    pub pre_filtered: bool,

    /// 在调用期间通过 `AopContext::current_proxy` 暴露代理
    pub expose_proxy: bool,

    /// 构建后冻结顾问配置
    pub frozen: bool,

    /// 缓存解析出的拦截链（默认：true）
    pub cache_chains: bool,

    /// 以 debug 级别输出每次解析出的拦截链
    pub trace_resolution: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            pre_filtered: false,
            expose_proxy: false,
            frozen: false,
            cache_chains: true,
            trace_resolution: false,
        }
    }
}

/// 完整配置
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InterceptConfig {
    pub proxy: ProxyConfig,
    pub logging: LoggingConfig,
}

impl InterceptConfig {
    /// 从 TOML 文件加载配置
    pub fn from_file(path: impl AsRef<Path>) -> AopResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            AopError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml(&content)
    }

    /// 从字符串解析 TOML 配置
    pub fn from_toml(content: &str) -> AopResult<Self> {
        toml::from_str(content)
            .map_err(|e| AopError::Config(format!("Failed to parse TOML: {}", e)))
    }

    /// 加载配置文件（文件不存在时使用默认值），再应用环境变量覆盖
    pub fn load(path: impl AsRef<Path>, prefix: &str) -> AopResult<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            tracing::debug!("Config file {:?} not found, using defaults", path);
            Self::default()
        };
        config.apply_env(prefix)?;
        Ok(config)
    }

    /// 应用环境变量覆盖
    pub fn apply_env(&mut self, prefix: &str) -> AopResult<()> {
        self.apply_overrides(prefix, |key| std::env::var(key).ok())
    }

    pub(crate) fn apply_overrides<F>(&mut self, prefix: &str, lookup: F) -> AopResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let proxy = &mut self.proxy;
        let flags: [(&str, &mut bool); 5] = [
            ("proxy.pre_filtered", &mut proxy.pre_filtered),
            ("proxy.expose_proxy", &mut proxy.expose_proxy),
            ("proxy.frozen", &mut proxy.frozen),
            ("proxy.cache_chains", &mut proxy.cache_chains),
            ("proxy.trace_resolution", &mut proxy.trace_resolution),
        ];
        for (key, slot) in flags {
            let env_key = key_to_env(prefix, key);
            if let Some(value) = lookup(&env_key) {
                *slot = parse_bool(&env_key, &value)?;
            }
        }

        self.logging.apply_overrides(&lookup);
        if let Some(level) = lookup(&key_to_env(prefix, "logging.level")) {
            self.logging.level = level.parse().map_err(AopError::Config)?;
        }
        if let Some(format) = lookup(&key_to_env(prefix, "logging.format")) {
            self.logging.format = format.parse().map_err(AopError::Config)?;
        }
        Ok(())
    }
}

/// 将配置键转换为环境变量名
/// 例如: proxy.expose_proxy -> CHIMERA_AOP_PROXY_EXPOSE_PROXY
fn key_to_env(prefix: &str, key: &str) -> String {
    format!("{}{}", prefix, key.replace('.', "_").to_uppercase())
}

fn parse_bool(key: &str, value: &str) -> AopResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(AopError::Config(format!(
            "Invalid boolean '{}' for {}",
            other, key
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogFormat, LogLevel};
    use std::collections::HashMap;

    fn lookup<'a>(
        env: &'a HashMap<&'static str, &'static str>,
    ) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| env.get(key).map(|value| value.to_string())
    }

    #[test]
    fn test_defaults() {
        let config = InterceptConfig::default();
        assert!(config.proxy.cache_chains);
        assert!(!config.proxy.expose_proxy);
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_from_toml() {
        let config = InterceptConfig::from_toml(
            r#"
            [proxy]
            expose_proxy = true
            cache_chains = false

            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();
        assert!(config.proxy.expose_proxy);
        assert!(!config.proxy.cache_chains);
        assert!(!config.proxy.frozen);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_toml() {
        let err = InterceptConfig::from_toml("[proxy]\nexpose_proxy = \"maybe\"").unwrap_err();
        assert!(matches!(err, AopError::Config(_)));
    }

    #[test]
    fn test_env_overrides() {
        let env = HashMap::from([
            ("CHIMERA_AOP_PROXY_EXPOSE_PROXY", "true"),
            ("CHIMERA_AOP_PROXY_CACHE_CHAINS", "off"),
            ("CHIMERA_AOP_LOGGING_LEVEL", "warn"),
        ]);
        let mut config = InterceptConfig::default();
        config.apply_overrides(DEFAULT_ENV_PREFIX, lookup(&env)).unwrap();

        assert!(config.proxy.expose_proxy);
        assert!(!config.proxy.cache_chains);
        assert_eq!(config.logging.level, LogLevel::Warn);
    }

    #[test]
    fn test_env_override_rejects_bad_boolean() {
        let env = HashMap::from([("APP_PROXY_FROZEN", "perhaps")]);
        let mut config = InterceptConfig::default();
        let err = config.apply_overrides("APP_", lookup(&env)).unwrap_err();
        assert!(err.to_string().contains("APP_PROXY_FROZEN"));
    }

    #[test]
    fn test_key_to_env() {
        assert_eq!(
            key_to_env(DEFAULT_ENV_PREFIX, "proxy.pre_filtered"),
            "CHIMERA_AOP_PROXY_PRE_FILTERED"
        );
    }
}
