//! 错误处理模块
//!
//! 该模块提供 KubeGate 项目的统一错误类型。令牌生命周期中的致命错误
//! 各自对应一个变体，便于状态机把它们映射为条件日志中的失败原因。

use thiserror::Error;

use crate::models::token::{FailureReason, Phase};

/// KubeGate 统一错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// 用户数据错误（授权范围非法、时间格式错误等）
    #[error("用户数据错误: {0}")]
    UserData(String),

    /// 私钥不可读、格式错误或签名失败
    #[error("私钥错误: {0}")]
    PrivateKey(String),

    /// 身份或绑定创建失败
    #[error("副作用执行失败: {0}")]
    SideEffect(String),

    /// 无法读取系统签发的令牌
    #[error("令牌读取错误: {0}")]
    TokenGetter(String),

    /// 非法的阶段转换
    #[error("非法的阶段转换: {from} -> {to}")]
    InvalidTransition {
        /// 当前阶段
        from: Phase,
        /// 目标阶段
        to: Phase,
    },
}

impl Error {
    /// 返回该错误写入条件日志时使用的失败原因
    ///
    /// 只有令牌生命周期的四类致命错误有对应原因，其余错误属于基础设施问题，
    /// 由调用方重试而不是写入 Error 阶段。
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            Error::UserData(_) => Some(FailureReason::UserDataError),
            Error::PrivateKey(_) => Some(FailureReason::PrivateKeyError),
            Error::SideEffect(_) => Some(FailureReason::FailedSideEffect),
            Error::TokenGetter(_) => Some(FailureReason::TokenGetterError),
            _ => None,
        }
    }
}

/// KubeGate 结果类型别名
pub type Result<T> = std::result::Result<T, Error>;
