//! 控制器模块
//!
//! 该模块把令牌状态机接入 kube-runtime 的控制器循环：监听 GateToken 资源，
//! 通过 finalizer 保证删除前执行清理，持久化状态机返回的新状态，并按返回的
//! 延迟重新调度。

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use kube::{
    api::{Api, Patch, PatchParams},
    client::Client,
    runtime::{
        controller::{Action, Controller as KubeController},
        finalizer::{finalizer, Event},
        watcher,
    },
    ResourceExt,
};
use serde_json::json;
use tracing::{debug, error, info, warn};

#[cfg(test)]
use mockall::automock;

use kubegate_common::GateTokenStatus;

use crate::clock::SystemClock;
use crate::config::OperatorConfig;
use crate::credential_store::SecretStore;
use crate::crd::GateToken;
use crate::error::{Error, Result};
use crate::provisioner::KubeProvisioner;
use crate::reconcile::{Cleanup, Outcome, Reconciler, ReconcilerSettings};
use crate::signer::Rs256Signer;

/// GateToken 上的 finalizer 名称
pub const TOKEN_FINALIZER: &str = "kubegate.io/finalizer";

/// 状态写入器
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StatusWriter: Send + Sync {
    /// 写入 GateToken 状态
    async fn write(&self, name: &str, status: &GateTokenStatus) -> Result<()>;
}

/// 通过 status 子资源写入状态
pub struct ApiStatusWriter {
    /// 令牌所在命名空间的 API
    api: Api<GateToken>,
}

impl ApiStatusWriter {
    /// 创建新的状态写入器
    pub fn new(api: Api<GateToken>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl StatusWriter for ApiStatusWriter {
    async fn write(&self, name: &str, status: &GateTokenStatus) -> Result<()> {
        self.api
            .patch_status(name, &PatchParams::default(), &status_patch(status))
            .await?;
        debug!(token = %name, phase = %status.phase, "状态已更新");
        Ok(())
    }
}

/// 控制器上下文
pub struct Context {
    /// Kubernetes 客户端
    pub client: Client,
    /// 令牌状态机
    pub reconciler: Reconciler,
    /// Operator 配置
    pub config: OperatorConfig,
}

impl Context {
    /// 创建基于集群 API 的上下文
    pub fn new(client: Client, config: OperatorConfig) -> Self {
        let reconciler = Reconciler::new(
            Arc::new(SecretStore::new(client.clone())),
            Arc::new(KubeProvisioner::new(client.clone())),
            Arc::new(Rs256Signer),
            Arc::new(SystemClock),
            ReconcilerSettings::from(&config),
        );

        Self {
            client,
            reconciler,
            config,
        }
    }
}

/// 控制器结构体
pub struct Controller {
    /// 控制器上下文
    context: Arc<Context>,
}

impl Controller {
    /// 创建新的控制器
    pub fn new(client: Client, config: OperatorConfig) -> Self {
        Self {
            context: Arc::new(Context::new(client, config)),
        }
    }

    /// 运行控制器，直到收到退出信号
    pub async fn run(&self) {
        let client = self.context.client.clone();
        let tokens: Api<GateToken> = match &self.context.config.namespace {
            Some(namespace) => Api::namespaced(client, namespace),
            None => Api::all(client),
        };

        info!(
            namespace = self.context.config.namespace.as_deref().unwrap_or("*"),
            "启动 GateToken 控制器"
        );

        KubeController::new(tokens, watcher::Config::default())
            .shutdown_on_signal()
            .run(reconcile, error_policy, self.context.clone())
            .for_each(|result| async move {
                match result {
                    Ok((token, action)) => debug!(token = %token.name, ?action, "协调成功"),
                    Err(e) => warn!(error = %e, "协调错误"),
                }
            })
            .await;

        info!("GateToken 控制器已停止");
    }
}

/// 协调入口
pub async fn reconcile(token: Arc<GateToken>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = token
        .namespace()
        .ok_or_else(|| Error::MissingNamespace(token.name_any()))?;
    let api: Api<GateToken> = Api::namespaced(ctx.client.clone(), &namespace);
    let writer = ApiStatusWriter::new(api.clone());

    finalizer(&api, TOKEN_FINALIZER, token, |event| async {
        match event {
            Event::Apply(token) => apply(&ctx.reconciler, &writer, &token).await,
            Event::Cleanup(token) => cleanup(&ctx.reconciler, &writer, &token).await,
        }
    })
    .await
    .map_err(|e| Error::Finalizer(Box::new(e)))
}

/// 出错后按配置的间隔重试
pub fn error_policy(token: Arc<GateToken>, err: &Error, ctx: Arc<Context>) -> Action {
    error!(token = %token.name_any(), error = %err, "协调失败，稍后重试");
    Action::requeue(ctx.config.timing.error_requeue())
}

/// 推进状态机并持久化结果
async fn apply(
    reconciler: &Reconciler,
    writer: &dyn StatusWriter,
    token: &GateToken,
) -> Result<Action> {
    let outcome = reconciler.reconcile(token).await?;

    if let Some(status) = &outcome.status {
        writer.write(&token.name_any(), status).await?;
    }

    Ok(next_action(&outcome))
}

/// 删除前清理副作用
///
/// 返回 Ok 时 finalizer 被移除；清理需要重试时先写入尝试次数，再返回错误保留 finalizer。
async fn cleanup(
    reconciler: &Reconciler,
    writer: &dyn StatusWriter,
    token: &GateToken,
) -> Result<Action> {
    match reconciler.cleanup(token).await? {
        Cleanup::Done => {
            info!(token = %token.name_any(), "清理完成，移除 finalizer");
            Ok(Action::await_change())
        }
        Cleanup::Retry(status) => {
            warn!(token = %token.name_any(), "清理未完成，保留 finalizer 并重试");
            writer.write(&token.name_any(), &status).await?;
            Err(Error::CleanupIncomplete(token.name_any()))
        }
    }
}

/// 协调结果对应的调度动作
fn next_action(outcome: &Outcome) -> Action {
    match outcome.requeue_after {
        Some(after) => Action::requeue(after),
        None => Action::await_change(),
    }
}

/// 状态补丁
fn status_patch(status: &GateTokenStatus) -> Patch<serde_json::Value> {
    Patch::Merge(json!({ "status": status }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::credential_store::MockCredentialStore;
    use crate::crd::GateTokenSpec;
    use crate::provisioner::{MockProvisioner, Provisioner};
    use crate::signer::Rs256Signer;
    use kubegate_common::{Phase, TokenRecord};
    use std::time::Duration;

    const T0: i64 = 1_700_000_000;

    fn engine(provisioner: impl Provisioner + 'static) -> Reconciler {
        Reconciler::new(
            Arc::new(MockCredentialStore::new()),
            Arc::new(provisioner),
            Arc::new(Rs256Signer),
            Arc::new(FixedClock::new(T0)),
            ReconcilerSettings::default(),
        )
    }

    fn token(generate_service_account: bool, phase: Phase) -> GateToken {
        let spec: GateTokenSpec = serde_json::from_value(serde_json::json!({
            "generateServiceAccount": generate_service_account,
            "resources": ["pods"],
        }))
        .unwrap();
        let mut token = GateToken::new("demo", spec);
        token.metadata.namespace = Some("vms".to_string());

        let record = TokenRecord::new(T0 - 3600, 3600, token.spec.rule.clone());
        token.status = Some(GateTokenStatus {
            phase,
            token: "issued".to_string(),
            data: Some(if generate_service_account {
                record.with_identity(Default::default())
            } else {
                record
            }),
            ..Default::default()
        });
        token
    }

    fn api_error(code: u16) -> Error {
        Error::Kube(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "InternalError".to_string(),
            code,
        }))
    }

    #[tokio::test]
    async fn test_cleanup_failure_keeps_finalizer_once() {
        let mut provisioner = MockProvisioner::new();
        provisioner
            .expect_delete_binding()
            .times(2)
            .returning(|_, _| Err(api_error(500)));
        provisioner.expect_delete_identity().times(2).returning(|_| Ok(()));
        let engine = engine(provisioner);

        // 只有第一次失败会写入尝试次数
        let mut writer = MockStatusWriter::new();
        writer
            .expect_write()
            .withf(|name, status| name == "demo" && status.cleanup_attempts == 1)
            .times(1)
            .returning(|_, _| Ok(()));

        let mut token = token(true, Phase::Ready);

        let err = cleanup(&engine, &writer, &token).await.unwrap_err();
        assert!(matches!(err, Error::CleanupIncomplete(name) if name == "demo"));

        token.status = Some(token.current_status().with_cleanup_attempt());
        let action = cleanup(&engine, &writer, &token).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn test_cleanup_success_releases_without_write() {
        let mut provisioner = MockProvisioner::new();
        provisioner.expect_delete_binding().times(1).returning(|_, _| Ok(()));
        provisioner.expect_delete_identity().times(1).returning(|_| Ok(()));
        let engine = engine(provisioner);
        let writer = MockStatusWriter::new();

        let action = cleanup(&engine, &writer, &token(true, Phase::Ready))
            .await
            .unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn test_apply_persists_changed_status() {
        let engine = engine(MockProvisioner::new());
        let mut writer = MockStatusWriter::new();
        writer
            .expect_write()
            .withf(|_, status| status.phase == Phase::Completed && status.token == "issued")
            .times(1)
            .returning(|_, _| Ok(()));

        // 已过期的 JWT 令牌
        let action = apply(&engine, &writer, &token(false, Phase::Ready))
            .await
            .unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn test_apply_terminal_token_writes_nothing() {
        let engine = engine(MockProvisioner::new());
        let writer = MockStatusWriter::new();

        let action = apply(&engine, &writer, &token(true, Phase::Completed))
            .await
            .unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn test_apply_write_failure_is_returned() {
        let engine = engine(MockProvisioner::new());
        let mut writer = MockStatusWriter::new();
        writer
            .expect_write()
            .times(1)
            .returning(|_, _| Err(api_error(409)));

        let err = apply(&engine, &writer, &token(false, Phase::Ready))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Kube(_)));
    }

    #[test]
    fn test_next_action() {
        let waiting = Outcome {
            status: None,
            requeue_after: Some(Duration::from_secs(30)),
            terminal: false,
        };
        assert_eq!(next_action(&waiting), Action::requeue(Duration::from_secs(30)));

        let finished = Outcome {
            status: Some(GateTokenStatus::default()),
            requeue_after: None,
            terminal: true,
        };
        assert_eq!(next_action(&finished), Action::await_change());
    }

    #[test]
    fn test_status_patch_body() {
        let status = GateTokenStatus::default()
            .transition(Phase::Pending, "TokenPending", "令牌等待生效", 1_700_000_000)
            .unwrap();

        match status_patch(&status) {
            Patch::Merge(body) => {
                assert_eq!(body["status"]["phase"], "Pending");
                assert_eq!(body["status"]["conditions"][0]["type"], "Pending");
                assert_eq!(body["status"]["cleanupAttempts"], 0);
            }
            other => panic!("unexpected patch: {:?}", other),
        }
    }
}
