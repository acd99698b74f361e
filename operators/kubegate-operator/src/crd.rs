//! 自定义资源定义模块
//!
//! 该模块定义了 KubeGate 的 GateToken 自定义资源。用户通过它申请一个
//! 带有效期的访问令牌：要么由 Operator 用私钥签发 JWT，要么生成一个
//! 服务账号并交付集群签发的令牌。状态字段由状态机独占维护。

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use kubegate_common::time::parse_rfc3339;
use kubegate_common::{AccessRule, BindingSpec, GateTokenStatus};

/// GateToken 规范
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(group = "kubegate.io", version = "v1beta1", kind = "GateToken", namespaced)]
#[kube(status = "GateTokenStatus", shortname = "gt")]
#[kube(printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#)]
#[kube(printcolumn = r#"{"name":"From", "type":"string", "jsonPath":".status.data.from"}"#)]
#[kube(printcolumn = r#"{"name":"Until", "type":"string", "jsonPath":".status.data.until"}"#)]
#[serde(rename_all = "camelCase")]
pub struct GateTokenSpec {
    /// 令牌生效时间（RFC3339），缺省为首次处理时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    /// 有效期（秒），默认 3600
    #[serde(default = "default_duration_sec")]
    pub duration_sec: i64,

    /// 是否生成服务账号并交付集群签发的令牌，而不是 JWT
    #[serde(default)]
    pub generate_service_account: bool,

    /// 授权规则
    #[serde(flatten)]
    pub rule: AccessRule,

    /// 服务账号的绑定目标，默认为集群级，处理时校验
    #[serde(default)]
    pub binding: BindingSpec,

    /// 签名私钥位置，缺省使用 Operator 配置
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_key_ref: Option<SecretKeyRef>,
}

/// Secret 中某个字段的引用
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct SecretKeyRef {
    /// Secret 名称
    pub name: String,

    /// 命名空间，缺省为令牌所在命名空间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// 字段名，缺省使用 Operator 配置
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// 默认有效期
fn default_duration_sec() -> i64 {
    3600
}

impl GateTokenSpec {
    /// 解析生效时间，空字符串视为未设置
    pub fn not_before(&self) -> kubegate_common::Result<Option<i64>> {
        match self.from.as_deref() {
            None | Some("") => Ok(None),
            Some(from) => parse_rfc3339(from).map(Some),
        }
    }
}

impl GateToken {
    /// 当前状态，未设置时为新建状态
    pub fn current_status(&self) -> GateTokenStatus {
        self.status.clone().unwrap_or_default()
    }
}
