//! 资源模板模块
//!
//! 构造服务账号、令牌 Secret、ClusterRole 以及两种绑定对象的模板。
//! 命名空间内的对象带有指向 GateToken 的 owner reference，集群级对象
//! 以命名空间加名称命名，避免不同命名空间的同名令牌互相冲突。

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, RoleBinding, RoleRef, Subject,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};

use kubegate_common::AccessRule;

use crate::crd::GateToken;

/// 服务账号令牌 Secret 中令牌所在的字段
pub const TOKEN_FIELD: &str = "token";

/// 服务账号令牌 Secret 的类型
pub const SERVICE_ACCOUNT_TOKEN_TYPE: &str = "kubernetes.io/service-account-token";

/// 服务账号令牌 Secret 上指向服务账号的注解
pub const SERVICE_ACCOUNT_NAME_ANNOTATION: &str = "kubernetes.io/service-account.name";

const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// 令牌所在命名空间，缺省为 default
pub fn namespace_of(token: &GateToken) -> String {
    token.namespace().unwrap_or_else(|| "default".into())
}

/// 服务账号名称，与令牌同名
pub fn service_account_name(token: &GateToken) -> String {
    token.name_any()
}

/// 服务账号令牌 Secret 名称
pub fn token_secret_name(token: &GateToken) -> String {
    format!("{}-token", token.name_any())
}

/// 集群级对象名称
pub fn cluster_object_name(token: &GateToken) -> String {
    format!("kubegate-{}-{}", namespace_of(token), token.name_any())
}

/// 公共标签
fn labels(token: &GateToken) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), token.name_any()),
        (
            "app.kubernetes.io/managed-by".to_string(),
            "kubegate-operator".to_string(),
        ),
    ])
}

/// 命名空间内对象的元数据
fn namespaced_meta(token: &GateToken, name: String, namespace: String) -> ObjectMeta {
    let owned = namespace == namespace_of(token);
    ObjectMeta {
        name: Some(name),
        namespace: Some(namespace),
        labels: Some(labels(token)),
        owner_references: token
            .controller_owner_ref(&())
            .filter(|_| owned)
            .map(|owner| vec![owner]),
        ..Default::default()
    }
}

/// 服务账号模板
pub fn service_account(token: &GateToken) -> ServiceAccount {
    ServiceAccount {
        metadata: namespaced_meta(token, service_account_name(token), namespace_of(token)),
        ..Default::default()
    }
}

/// 服务账号令牌 Secret 模板，令牌由集群填充
pub fn token_secret(token: &GateToken) -> Secret {
    let mut metadata = namespaced_meta(token, token_secret_name(token), namespace_of(token));
    metadata.annotations = Some(BTreeMap::from([(
        SERVICE_ACCOUNT_NAME_ANNOTATION.to_string(),
        service_account_name(token),
    )]));

    Secret {
        metadata,
        type_: Some(SERVICE_ACCOUNT_TOKEN_TYPE.to_string()),
        ..Default::default()
    }
}

/// 授权规则转换为 PolicyRule
fn policy_rule(rule: &AccessRule) -> PolicyRule {
    fn non_empty(items: &[String]) -> Option<Vec<String>> {
        (!items.is_empty()).then(|| items.to_vec())
    }

    PolicyRule {
        verbs: rule.verbs.clone(),
        api_groups: non_empty(&rule.api_groups),
        resources: non_empty(&rule.resources),
        resource_names: non_empty(&rule.resource_names),
        non_resource_urls: non_empty(&rule.non_resource_urls),
    }
}

/// ClusterRole 模板
pub fn cluster_role(token: &GateToken, rule: &AccessRule) -> ClusterRole {
    ClusterRole {
        metadata: ObjectMeta {
            name: Some(cluster_object_name(token)),
            labels: Some(labels(token)),
            ..Default::default()
        },
        rules: Some(vec![policy_rule(rule)]),
        ..Default::default()
    }
}

fn subjects(token: &GateToken) -> Option<Vec<Subject>> {
    Some(vec![Subject {
        kind: "ServiceAccount".to_string(),
        name: service_account_name(token),
        namespace: Some(namespace_of(token)),
        ..Default::default()
    }])
}

fn role_ref(token: &GateToken) -> RoleRef {
    RoleRef {
        api_group: RBAC_API_GROUP.to_string(),
        kind: "ClusterRole".to_string(),
        name: cluster_object_name(token),
    }
}

/// ClusterRoleBinding 模板
pub fn cluster_role_binding(token: &GateToken) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(cluster_object_name(token)),
            labels: Some(labels(token)),
            ..Default::default()
        },
        subjects: subjects(token),
        role_ref: role_ref(token),
    }
}

/// RoleBinding 模板，在目标命名空间内引用 ClusterRole
pub fn role_binding(token: &GateToken, namespace: &str) -> RoleBinding {
    RoleBinding {
        metadata: namespaced_meta(token, cluster_object_name(token), namespace.to_string()),
        subjects: subjects(token),
        role_ref: role_ref(token),
    }
}
