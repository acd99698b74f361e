//! 配置管理模块
//!
//! 该模块负责加载 Operator 的配置，支持 YAML/JSON 配置文件，并允许通过
//! `KUBEGATE_` 前缀的环境变量覆盖（嵌套字段以 `__` 分隔）。

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::error::Result;

/// Operator 配置结构
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    /// 监听的命名空间，缺省监听全部
    pub namespace: Option<String>,
    /// 日志级别
    pub log_level: String,
    /// 签名私钥配置
    pub signing: SigningConfig,
    /// 重新调度间隔配置
    pub timing: TimingConfig,
}

/// 签名私钥配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// 私钥 Secret 名称（位于令牌所在命名空间）
    pub secret_name: String,
    /// 私钥字段
    pub secret_field: String,
}

/// 重新调度间隔配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// 创建服务账号后首次检查令牌的间隔（秒）
    pub credential_recheck_seconds: u64,
    /// 令牌尚未签发时的重试间隔（秒）
    pub credential_retry_seconds: u64,
    /// 协调出错后的重试间隔（秒）
    pub error_requeue_seconds: u64,
    /// 单次等待的上限（秒），调度器无法接受过远的唤醒时间
    pub max_requeue_seconds: u64,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            log_level: "info".to_string(),
            signing: SigningConfig::default(),
            timing: TimingConfig::default(),
        }
    }
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            secret_name: "kubegate-jwt-secret".to_string(),
            secret_field: "key.pem".to_string(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            credential_recheck_seconds: 10,
            credential_retry_seconds: 5,
            error_requeue_seconds: 60,
            max_requeue_seconds: 86_400,
        }
    }
}

impl TimingConfig {
    /// 创建服务账号后的检查间隔
    pub fn credential_recheck(&self) -> Duration {
        Duration::from_secs(self.credential_recheck_seconds)
    }

    /// 令牌尚未签发时的重试间隔
    pub fn credential_retry(&self) -> Duration {
        Duration::from_secs(self.credential_retry_seconds)
    }

    /// 出错后的重试间隔
    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_seconds)
    }

    /// 单次等待的上限，至少为 1 秒
    pub fn max_requeue(&self) -> Duration {
        Duration::from_secs(self.max_requeue_seconds.max(1))
    }
}

impl OperatorConfig {
    /// 加载配置：默认值 < 配置文件 < 环境变量
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = config_path {
            // 确定配置文件格式
            let format = match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml") | Some("yml") => FileFormat::Yaml,
                Some("json") => FileFormat::Json,
                _ => {
                    return Err(ConfigError::Message(format!(
                        "不支持的配置文件格式 {:?}，仅支持 YAML 或 JSON",
                        path
                    ))
                    .into())
                }
            };
            builder = builder.add_source(File::from(path).format(format));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("KUBEGATE")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize::<OperatorConfig>()?;

        debug!(?config, "配置加载完成");
        Ok(config)
    }
}
