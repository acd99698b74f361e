//! 签名声明模型
//!
//! 由缓存记录构造的规范声明集合，签名后作为 JWT 访问令牌交给客户端。

use serde::{Deserialize, Serialize};

use crate::models::token::TokenRecord;

/// JWT 声明
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// 过期时间（Unix 秒）
    pub exp: i64,
    /// 生效时间（Unix 秒）
    pub nbf: i64,
    /// 允许的动作
    pub verbs: Vec<String>,
    #[serde(default, rename = "apiGroups", skip_serializing_if = "Vec::is_empty")]
    pub api_groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
    #[serde(default, rename = "resourceNames", skip_serializing_if = "Vec::is_empty")]
    pub resource_names: Vec<String>,
    #[serde(default, rename = "nonResourceURLs", skip_serializing_if = "Vec::is_empty")]
    pub non_resource_urls: Vec<String>,
}

impl TokenClaims {
    /// 从缓存记录构造声明
    pub fn from_record(record: &TokenRecord) -> Self {
        let rule = &record.rule;
        Self {
            exp: record.exp,
            nbf: record.nbf,
            verbs: rule.verbs.clone(),
            api_groups: rule.api_groups.clone(),
            resources: rule.resources.clone(),
            resource_names: rule.resource_names.clone(),
            non_resource_urls: rule.non_resource_urls.clone(),
        }
    }
}
