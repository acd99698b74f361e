//! 凭据存储模块
//!
//! 按名称、命名空间和字段读取 Secret 中的数据，用于获取签名私钥以及
//! 服务账号令牌。Secret 或字段不存在时返回 None，由调用方决定是否视为错误。

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{api::Api, client::Client};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::error::Result;

/// 凭据存储
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// 读取 Secret 字段，不存在时返回 None
    async fn get(&self, name: &str, namespace: &str, field: &str) -> Result<Option<Vec<u8>>>;
}

/// 基于 Kubernetes Secret 的凭据存储
pub struct SecretStore {
    /// Kubernetes 客户端
    client: Client,
}

impl SecretStore {
    /// 创建新的凭据存储
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CredentialStore for SecretStore {
    async fn get(&self, name: &str, namespace: &str, field: &str) -> Result<Option<Vec<u8>>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);

        let Some(secret) = api.get_opt(name).await? else {
            debug!(secret = %name, namespace = %namespace, "Secret 不存在");
            return Ok(None);
        };

        Ok(secret_field(secret, field))
    }
}

/// 取出 Secret 中的字段
fn secret_field(secret: Secret, field: &str) -> Option<Vec<u8>> {
    secret
        .data
        .and_then(|mut data| data.remove(field))
        .map(|bytes| bytes.0)
}
