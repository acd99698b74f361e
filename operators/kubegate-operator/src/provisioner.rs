//! 副作用供给模块
//!
//! 负责创建和删除支撑服务账号令牌的集群对象：服务账号、令牌 Secret、
//! ClusterRole 以及 ClusterRoleBinding 或 RoleBinding。
//! 创建时对象已存在视为成功，删除时对象不存在视为成功。ClusterRole 例外：
//! 它以服务端应用写入，残留的同名对象会被覆盖为当前请求的规则。

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, RoleBinding};
use kube::{
    api::{Api, DeleteParams, Patch, PatchParams, PostParams},
    client::Client,
    Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use kubegate_common::{AccessRule, BindingTarget};

use crate::crd::GateToken;
use crate::error::{Error, Result};
use crate::templates;

/// 副作用供给器
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// 创建服务账号及其令牌 Secret
    async fn create_identity(&self, token: &GateToken) -> Result<()>;

    /// 创建 ClusterRole 及绑定
    async fn create_binding(
        &self,
        token: &GateToken,
        target: &BindingTarget,
        rule: &AccessRule,
    ) -> Result<()>;

    /// 删除服务账号及其令牌 Secret
    async fn delete_identity(&self, token: &GateToken) -> Result<()>;

    /// 删除绑定及 ClusterRole
    async fn delete_binding(&self, token: &GateToken, target: &BindingTarget) -> Result<()>;
}

/// 基于 Kubernetes API 的副作用供给器
pub struct KubeProvisioner {
    /// Kubernetes 客户端
    client: Client,
}

impl KubeProvisioner {
    /// 创建新的供给器
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn cluster<K>(&self) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::ClusterResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::all(self.client.clone())
    }
}

/// 创建对象，已存在时视为成功
async fn create<K>(api: &Api<K>, obj: &K) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    let name = obj.name_any();
    match api.create(&PostParams::default(), obj).await {
        Ok(_) => {
            debug!(object = %name, "已创建对象");
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            debug!(object = %name, "对象已存在");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Operator 在服务端应用中使用的字段管理者
const FIELD_MANAGER: &str = "kubegate-operator";

/// 服务端应用参数，强制接管冲突字段
fn apply_params() -> PatchParams {
    PatchParams::apply(FIELD_MANAGER).force()
}

/// ClusterRole 的期望内容
fn cluster_role_patch(token: &GateToken, rule: &AccessRule) -> Patch<ClusterRole> {
    Patch::Apply(templates::cluster_role(token, rule))
}

/// 以服务端应用写入对象，已存在时覆盖为期望内容
async fn apply<K>(api: &Api<K>, name: &str, patch: &Patch<K>) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    api.patch(name, &apply_params(), patch).await?;
    debug!(object = %name, "已应用对象");
    Ok(())
}

/// 删除对象，不存在时视为成功
async fn delete<K>(api: &Api<K>, name: &str) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => {
            debug!(object = %name, "已删除对象");
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            debug!(object = %name, "对象不存在（已删除）");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// 逐个记录删除失败，返回第一个错误
fn first_error(results: Vec<Result<()>>) -> Result<()> {
    let mut first: Option<Error> = None;
    for err in results.into_iter().filter_map(Result::err) {
        warn!(error = %err, "删除对象失败");
        first.get_or_insert(err);
    }
    first.map_or(Ok(()), Err)
}

#[async_trait]
impl Provisioner for KubeProvisioner {
    async fn create_identity(&self, token: &GateToken) -> Result<()> {
        let namespace = templates::namespace_of(token);

        let sa_api: Api<ServiceAccount> = self.namespaced(&namespace);
        create(&sa_api, &templates::service_account(token)).await?;

        let secret_api: Api<Secret> = self.namespaced(&namespace);
        create(&secret_api, &templates::token_secret(token)).await?;

        info!(token = %token.name_any(), namespace = %namespace, "已创建服务账号");
        Ok(())
    }

    async fn create_binding(
        &self,
        token: &GateToken,
        target: &BindingTarget,
        rule: &AccessRule,
    ) -> Result<()> {
        let role_api: Api<ClusterRole> = self.cluster();
        apply(
            &role_api,
            &templates::cluster_object_name(token),
            &cluster_role_patch(token, rule),
        )
        .await?;

        match target {
            BindingTarget::Cluster => {
                let api: Api<ClusterRoleBinding> = self.cluster();
                create(&api, &templates::cluster_role_binding(token)).await?;
            }
            BindingTarget::Namespace { name } => {
                let api: Api<RoleBinding> = self.namespaced(name);
                create(&api, &templates::role_binding(token, name)).await?;
            }
        }

        info!(token = %token.name_any(), target = %target, "已创建授权绑定");
        Ok(())
    }

    async fn delete_identity(&self, token: &GateToken) -> Result<()> {
        let namespace = templates::namespace_of(token);

        let secret_api: Api<Secret> = self.namespaced(&namespace);
        let sa_api: Api<ServiceAccount> = self.namespaced(&namespace);

        first_error(vec![
            delete(&secret_api, &templates::token_secret_name(token)).await,
            delete(&sa_api, &templates::service_account_name(token)).await,
        ])
    }

    async fn delete_binding(&self, token: &GateToken, target: &BindingTarget) -> Result<()> {
        let name = templates::cluster_object_name(token);

        let binding = match target {
            BindingTarget::Cluster => {
                let api: Api<ClusterRoleBinding> = self.cluster();
                delete(&api, &name).await
            }
            BindingTarget::Namespace { name: namespace } => {
                let api: Api<RoleBinding> = self.namespaced(namespace);
                delete(&api, &name).await
            }
        };

        let role_api: Api<ClusterRole> = self.cluster();
        first_error(vec![binding, delete(&role_api, &name).await])
    }
}
