//! 授权范围模型
//!
//! 用户在令牌请求中给出的是一条扁平的访问规则（与 Kubernetes PolicyRule 同形），
//! 这里负责把它解析为两种互斥形态之一：API 资源规则或非资源 URL 规则。
//! 同时定义绑定目标，明确区分集群级绑定与命名空间级绑定。

use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// 通配命名空间选择器
pub const WILDCARD_NAMESPACE: &str = "*";

/// 用户提交的访问规则
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccessRule {
    /// 允许的动作，默认为 ["get"]
    #[serde(default = "default_verbs")]
    pub verbs: Vec<String>,

    /// API 组
    #[serde(default, rename = "apiGroups", skip_serializing_if = "Vec::is_empty")]
    pub api_groups: Vec<String>,

    /// 资源类型
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,

    /// 资源名称白名单
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_names: Vec<String>,

    /// 非资源 URL，只能通过集群级绑定生效
    #[serde(default, rename = "nonResourceURLs", skip_serializing_if = "Vec::is_empty")]
    pub non_resource_urls: Vec<String>,
}

fn default_verbs() -> Vec<String> {
    vec!["get".to_string()]
}

impl Default for AccessRule {
    fn default() -> Self {
        Self {
            verbs: default_verbs(),
            api_groups: Vec::new(),
            resources: Vec::new(),
            resource_names: Vec::new(),
            non_resource_urls: Vec::new(),
        }
    }
}

/// 解析后的授权范围
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationScope {
    /// API 资源规则
    Resources {
        verbs: Vec<String>,
        api_groups: Vec<String>,
        resources: Vec<String>,
        resource_names: Vec<String>,
    },
    /// 非资源 URL 规则
    NonResourceUrls {
        verbs: Vec<String>,
        urls: Vec<String>,
    },
}

impl AccessRule {
    /// 是否填写了 API 资源形态
    pub fn has_resource_shape(&self) -> bool {
        !self.api_groups.is_empty() || !self.resources.is_empty() || !self.resource_names.is_empty()
    }

    /// 是否填写了非资源 URL 形态
    pub fn has_url_shape(&self) -> bool {
        !self.non_resource_urls.is_empty()
    }

    /// 解析访问规则，两种形态必须恰好填写一种
    pub fn resolve(&self) -> Result<AuthorizationScope> {
        if self.verbs.is_empty() {
            return Err(Error::UserData("授权规则的 verbs 不能为空".to_string()));
        }

        match (self.has_resource_shape(), self.has_url_shape()) {
            (true, true) => Err(Error::UserData(
                "授权规则只能作用于 API 资源或非资源 URL 之一，不能同时填写".to_string(),
            )),
            (false, false) => Err(Error::UserData(
                "授权规则只能作用于 API 资源或非资源 URL 之一，但不能为空".to_string(),
            )),
            (true, false) => Ok(AuthorizationScope::Resources {
                verbs: self.verbs.clone(),
                api_groups: self.api_groups.clone(),
                resources: self.resources.clone(),
                resource_names: self.resource_names.clone(),
            }),
            (false, true) => Ok(AuthorizationScope::NonResourceUrls {
                verbs: self.verbs.clone(),
                urls: self.non_resource_urls.clone(),
            }),
        }
    }
}

impl AuthorizationScope {
    /// 获取动作列表
    pub fn verbs(&self) -> &[String] {
        match self {
            AuthorizationScope::Resources { verbs, .. } => verbs,
            AuthorizationScope::NonResourceUrls { verbs, .. } => verbs,
        }
    }

    /// 检查该范围能否通过给定的绑定目标生效
    pub fn check_binding(&self, target: &BindingTarget) -> Result<()> {
        match (self, target) {
            (AuthorizationScope::NonResourceUrls { .. }, BindingTarget::Namespace { name }) => {
                Err(Error::UserData(format!(
                    "非资源 URL 规则只能绑定到整个集群，不能绑定到命名空间 {}",
                    name
                )))
            }
            _ => Ok(()),
        }
    }
}

/// 绑定目标
///
/// 在资源对象中以 [`BindingSpec`] 的形式出现，读入时校验。
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "BindingSpec", into = "BindingSpec")]
pub enum BindingTarget {
    /// 集群级绑定（ClusterRoleBinding）
    #[default]
    Cluster,
    /// 命名空间级绑定（RoleBinding）
    Namespace {
        /// 目标命名空间
        name: String,
    },
}

/// 绑定种类
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum BindingKind {
    /// 集群级
    #[default]
    Cluster,
    /// 命名空间级
    Namespace,
}

/// 绑定目标在资源对象中的形式
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BindingSpec {
    /// 绑定种类，默认为集群级
    #[serde(default)]
    pub kind: BindingKind,

    /// 目标命名空间，仅命名空间级绑定使用
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl BindingSpec {
    /// 校验并转换为绑定目标
    pub fn target(&self) -> Result<BindingTarget> {
        match (self.kind, self.name.as_deref()) {
            (BindingKind::Cluster, _) => Ok(BindingTarget::Cluster),
            (BindingKind::Namespace, Some(name)) if !name.is_empty() => {
                Ok(BindingTarget::from_selector(name))
            }
            (BindingKind::Namespace, _) => Err(Error::UserData(
                "命名空间级绑定必须给出目标命名空间".to_string(),
            )),
        }
    }
}

impl TryFrom<BindingSpec> for BindingTarget {
    type Error = Error;

    fn try_from(spec: BindingSpec) -> Result<Self> {
        spec.target()
    }
}

impl From<BindingTarget> for BindingSpec {
    fn from(target: BindingTarget) -> Self {
        match target {
            BindingTarget::Cluster => BindingSpec::default(),
            BindingTarget::Namespace { name } => BindingSpec {
                kind: BindingKind::Namespace,
                name: Some(name),
            },
        }
    }
}

impl JsonSchema for BindingTarget {
    fn schema_name() -> String {
        BindingSpec::schema_name()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        BindingSpec::json_schema(gen)
    }
}

impl BindingTarget {
    /// 从命名空间选择器构造，通配符 "*" 表示集群级
    pub fn from_selector(selector: &str) -> Self {
        if selector.is_empty() || selector == WILDCARD_NAMESPACE {
            BindingTarget::Cluster
        } else {
            BindingTarget::Namespace {
                name: selector.to_string(),
            }
        }
    }

    /// 是否为集群级绑定
    pub fn is_cluster(&self) -> bool {
        matches!(self, BindingTarget::Cluster)
    }

    /// 命名空间级绑定的目标命名空间
    pub fn namespace(&self) -> Option<&str> {
        match self {
            BindingTarget::Cluster => None,
            BindingTarget::Namespace { name } => Some(name),
        }
    }
}

impl fmt::Display for BindingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingTarget::Cluster => write!(f, "cluster"),
            BindingTarget::Namespace { name } => write!(f, "namespace/{}", name),
        }
    }
}
