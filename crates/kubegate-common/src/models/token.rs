//! 令牌状态模型
//!
//! 该模块定义了令牌对象在生命周期中的阶段、一次性计算的缓存记录以及
//! 只追加的条件日志。所有状态变更都以纯函数的形式实现：
//! 输入旧状态、原因、消息和当前时间，返回新状态，不依赖任何集群连接。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::models::scope::{AccessRule, BindingTarget};
use crate::time::format_epoch;

/// 固定的签名算法标识
pub const SIGNING_ALGORITHM: &str = "RS256";

/// 令牌阶段
///
/// 只允许沿 "" → Pending → Ready → Completed 前进，或从任意非终止阶段进入 Error。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
pub enum Phase {
    /// 新建，尚未处理
    #[default]
    #[serde(rename = "")]
    New,
    /// 已签发记录，等待生效时间
    Pending,
    /// 已生效，等待过期
    Ready,
    /// 已过期（终止）
    Completed,
    /// 发生致命错误（终止）
    Error,
}

impl Phase {
    /// 阶段名称，New 为空字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::New => "",
            Phase::Pending => "Pending",
            Phase::Ready => "Ready",
            Phase::Completed => "Completed",
            Phase::Error => "Error",
        }
    }

    /// 是否为终止阶段
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Error)
    }

    /// 检查能否转换到目标阶段
    pub fn can_transition_to(&self, next: Phase) -> bool {
        match (self, next) {
            (Phase::New, Phase::Pending)
            | (Phase::Pending, Phase::Ready)
            | (Phase::Ready, Phase::Completed) => true,
            (from, Phase::Error) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::New => write!(f, "New"),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

/// 致命错误原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    /// 授权范围非法或用户数据无法解析
    UserDataError,
    /// 签名私钥不可读或签名失败
    PrivateKeyError,
    /// 身份或绑定创建失败
    FailedSideEffect,
    /// 系统签发的令牌无法读取
    TokenGetterError,
}

impl FailureReason {
    /// 原因标识
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::UserDataError => "UserDataError",
            FailureReason::PrivateKeyError => "PrivateKeyError",
            FailureReason::FailedSideEffect => "FailedSideEffect",
            FailureReason::TokenGetterError => "TokenGetterError",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 条件日志条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenCondition {
    /// 条件类型，与进入的阶段同名
    #[serde(rename = "type")]
    pub type_: String,
    /// 条件状态
    pub status: String,
    /// 原因
    pub reason: String,
    /// 详细信息
    pub message: String,
    /// 转换时间（RFC3339，秒精度）
    pub last_transition_time: String,
}

/// 令牌缓存记录，首次处理时计算一次，之后不再改变
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    /// 生效时间（RFC3339）
    pub from: String,
    /// 过期时间（RFC3339）
    pub until: String,
    /// 有效期长度（秒）
    pub duration_sec: i64,
    /// 生效时间（Unix 秒）
    pub nbf: i64,
    /// 过期时间（Unix 秒）
    pub exp: i64,
    /// 签名算法
    pub alg: String,
    /// 授权规则副本
    #[serde(flatten)]
    pub rule: AccessRule,
    /// 是否生成服务账号
    #[serde(default)]
    pub generate_service_account: bool,
    /// 服务账号的绑定目标
    #[serde(default)]
    pub binding: BindingTarget,
}

impl TokenRecord {
    /// 根据生效时间和有效期计算记录
    pub fn new(not_before: i64, duration_sec: i64, rule: AccessRule) -> Self {
        let exp = not_before + duration_sec;
        Self {
            from: format_epoch(not_before),
            until: format_epoch(exp),
            duration_sec,
            nbf: not_before,
            exp,
            alg: SIGNING_ALGORITHM.to_string(),
            rule,
            generate_service_account: false,
            binding: BindingTarget::Cluster,
        }
    }

    /// 记录需要生成服务账号及其绑定目标
    pub fn with_identity(mut self, binding: BindingTarget) -> Self {
        self.generate_service_account = true;
        self.binding = binding;
        self
    }
}

/// 令牌状态
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GateTokenStatus {
    /// 当前阶段
    #[serde(default)]
    pub phase: Phase,

    /// 缓存记录，一旦写入用户无法再修改
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<TokenRecord>,

    /// 生成的令牌
    #[serde(default)]
    pub token: String,

    /// 生成的服务账号名称
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_account_name: String,

    /// 条件日志，只追加
    #[serde(default)]
    pub conditions: Vec<TokenCondition>,

    /// 删除清理已尝试的次数
    #[serde(default)]
    pub cleanup_attempts: u32,
}

impl GateTokenStatus {
    /// 是否处于终止阶段
    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// 转换到下一阶段并追加条件
    pub fn transition(mut self, next: Phase, reason: &str, message: &str, now: i64) -> Result<Self> {
        if !self.phase.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }

        self.phase = next;
        self.conditions.push(TokenCondition {
            type_: next.as_str().to_string(),
            status: "True".to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: format_epoch(now),
        });
        Ok(self)
    }

    /// 进入 Error 阶段
    pub fn fail(self, reason: FailureReason, message: &str, now: i64) -> Result<Self> {
        self.transition(Phase::Error, reason.as_str(), message, now)
    }

    /// 写入缓存记录，已有记录时保持不变
    pub fn with_record(mut self, record: TokenRecord) -> Self {
        if self.data.is_none() {
            self.data = Some(record);
        }
        self
    }

    /// 写入令牌，已有令牌时保持不变
    pub fn with_token(mut self, token: String) -> Self {
        if self.token.is_empty() {
            self.token = token;
        }
        self
    }

    /// 记录生成的服务账号
    pub fn with_service_account(mut self, name: &str) -> Self {
        self.service_account_name = name.to_string();
        self
    }

    /// 删除清理次数加一
    pub fn with_cleanup_attempt(mut self) -> Self {
        self.cleanup_attempts += 1;
        self
    }
}
