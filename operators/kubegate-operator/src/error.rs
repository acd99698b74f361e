//! 错误处理模块
//!
//! Operator 层的错误类型，包装 Kubernetes API、签名库以及 finalizer 的错误。
//! 生命周期中的致命错误由状态机写入条件日志，这里的错误只用于驱动重试。

use thiserror::Error;

/// Operator 错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API 错误
    #[error("Kubernetes API 错误: {0}")]
    Kube(#[from] kube::Error),

    /// 领域模型错误
    #[error(transparent)]
    Common(#[from] kubegate_common::Error),

    /// JWT 签名错误
    #[error("JWT 签名错误: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] config::ConfigError),

    /// 资源缺少命名空间
    #[error("GateToken {0} 缺少命名空间")]
    MissingNamespace(String),

    /// finalizer 处理失败
    #[error("Finalizer 错误: {0}")]
    Finalizer(#[source] Box<kube::runtime::finalizer::Error<Error>>),

    /// 删除清理未完成，需要再尝试一次
    #[error("GateToken {0} 的删除清理未完成")]
    CleanupIncomplete(String),
}

/// Operator 结果类型别名
pub type Result<T, E = Error> = std::result::Result<T, E>;
