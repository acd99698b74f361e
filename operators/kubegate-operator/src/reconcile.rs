//! 令牌协调模块
//!
//! 该模块实现 GateToken 的生命周期状态机：
//! "" → Pending → Ready → Completed，任意非终止阶段出错则进入 Error。
//!
//! 每次调用都只依据已持久化的状态、当前时间以及外部适配器的响应推导下一步，
//! 不做任何阻塞等待。需要等待时返回一个延迟，由驱动方按该延迟重新调度；
//! 一旦命中等待条件，本次调用立即结束，不再尝试下一阶段的动作。
//! 状态变更以纯函数方式构造，由驱动方负责持久化。

use std::sync::Arc;
use std::time::Duration;

use kube::ResourceExt;
use tracing::{debug, info, warn};

use kubegate_common::{
    Error as CommonError, GateTokenStatus, Phase, TokenClaims, TokenRecord,
};

use crate::clock::{requeue_delay, Clock};
use crate::config::OperatorConfig;
use crate::credential_store::CredentialStore;
use crate::crd::GateToken;
use crate::error::{Error, Result};
use crate::provisioner::Provisioner;
use crate::signer::Signer;
use crate::templates;

/// 状态机参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerSettings {
    /// 默认私钥 Secret 名称
    pub signing_secret_name: String,
    /// 默认私钥字段
    pub signing_secret_field: String,
    /// 创建服务账号后首次检查令牌的间隔
    pub credential_recheck: Duration,
    /// 令牌尚未签发时的重试间隔
    pub credential_retry: Duration,
    /// 单次等待的上限，超过时提前唤醒并重新计算
    pub max_requeue: Duration,
}

impl From<&OperatorConfig> for ReconcilerSettings {
    fn from(config: &OperatorConfig) -> Self {
        Self {
            signing_secret_name: config.signing.secret_name.clone(),
            signing_secret_field: config.signing.secret_field.clone(),
            credential_recheck: config.timing.credential_recheck(),
            credential_retry: config.timing.credential_retry(),
            max_requeue: config.timing.max_requeue(),
        }
    }
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self::from(&OperatorConfig::default())
    }
}

/// 一次协调的结果
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// 需要持久化的新状态，未变化时为 None
    pub status: Option<GateTokenStatus>,
    /// 下一次唤醒的延迟，None 表示等待资源变更
    pub requeue_after: Option<Duration>,
    /// 是否已进入终止阶段
    pub terminal: bool,
}

/// 删除清理的结果
#[derive(Debug, Clone, PartialEq)]
pub enum Cleanup {
    /// 清理结束，可以移除 finalizer
    Done,
    /// 清理失败，持久化该状态后再尝试一次
    Retry(GateTokenStatus),
}

/// 本次调用之后的动作
enum Next {
    Requeue(Duration),
    Done,
}

/// 状态机的一步
struct Step {
    status: GateTokenStatus,
    next: Next,
}

impl Step {
    fn requeue(status: GateTokenStatus, after: Duration) -> Self {
        Self {
            status,
            next: Next::Requeue(after),
        }
    }

    fn done(status: GateTokenStatus) -> Self {
        Self {
            status,
            next: Next::Done,
        }
    }

    /// 转换为协调结果
    ///
    /// 等待时间被限制在 max_requeue 以内。状态有变化且无需等待时不安排定时唤醒，
    /// 由状态写入产生的变更事件驱动下一步，避免基于尚未刷新的缓存重复处理。
    fn into_outcome(self, original: &GateTokenStatus, max_requeue: Duration) -> Outcome {
        let terminal = self.status.is_terminal();
        let changed = self.status != *original;
        Outcome {
            requeue_after: match self.next {
                Next::Requeue(after) if after.is_zero() && changed => None,
                Next::Requeue(after) => Some(after.min(max_requeue)),
                Next::Done => None,
            },
            status: changed.then_some(self.status),
            terminal,
        }
    }
}

/// 令牌生命周期状态机
pub struct Reconciler {
    /// 凭据存储
    store: Arc<dyn CredentialStore>,
    /// 副作用供给器
    provisioner: Arc<dyn Provisioner>,
    /// 签名器
    signer: Arc<dyn Signer>,
    /// 时钟
    clock: Arc<dyn Clock>,
    /// 参数
    settings: ReconcilerSettings,
}

impl Reconciler {
    /// 创建新的状态机
    pub fn new(
        store: Arc<dyn CredentialStore>,
        provisioner: Arc<dyn Provisioner>,
        signer: Arc<dyn Signer>,
        clock: Arc<dyn Clock>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            store,
            provisioner,
            signer,
            clock,
            settings,
        }
    }

    /// 协调 GateToken 资源
    pub async fn reconcile(&self, token: &GateToken) -> Result<Outcome> {
        let current = token.current_status();
        let now = self.clock.now();

        debug!(token = %token.name_any(), phase = %current.phase, now, "协调 GateToken");

        let step = match current.phase {
            Phase::Completed | Phase::Error => {
                debug!(token = %token.name_any(), phase = %current.phase, "令牌已处于终止阶段");
                return Ok(Outcome {
                    status: None,
                    requeue_after: None,
                    terminal: true,
                });
            }
            Phase::New => self.admit(token, current.clone(), now).await?,
            Phase::Pending => self.activate(token, current.clone(), now).await?,
            Phase::Ready => self.watch_expiry(token, current.clone(), now).await?,
        };

        Ok(step.into_outcome(&current, self.settings.max_requeue))
    }

    /// 删除清理
    ///
    /// 只有曾经（或可能）创建过服务账号的令牌才需要清理。第一次清理失败时
    /// 记录一次尝试并要求重试，第二次无论成败都允许资源被删除。
    pub async fn cleanup(&self, token: &GateToken) -> Result<Cleanup> {
        let status = token.current_status();
        let name = token.name_any();

        let record = match &status.data {
            Some(record) if record.generate_service_account && status.phase != Phase::Completed => {
                record.clone()
            }
            _ => {
                info!(token = %name, phase = %status.phase, "无需清理副作用");
                return Ok(Cleanup::Done);
            }
        };

        let errors = self.teardown(token, &record).await;
        if errors.is_empty() {
            return Ok(Cleanup::Done);
        }

        if status.cleanup_attempts >= 1 {
            warn!(token = %name, failures = errors.len(), "清理再次失败，放弃重试并允许删除");
            return Ok(Cleanup::Done);
        }

        Ok(Cleanup::Retry(status.with_cleanup_attempt()))
    }

    /// "" → Pending：校验请求，计算缓存记录，必要时签发 JWT
    async fn admit(&self, token: &GateToken, status: GateTokenStatus, now: i64) -> Result<Step> {
        let record = match self.build_record(token, now) {
            Ok(record) => record,
            Err(e) => return self.fail(token, status, e, now),
        };

        let mut status = status.with_record(record.clone());

        if !record.generate_service_account {
            match self.sign(token, &record).await {
                Ok(jwt) => status = status.with_token(jwt),
                Err(e) => return self.fail(token, status, e, now),
            }
        }

        let status = status.transition(Phase::Pending, "TokenPending", "令牌等待生效", now)?;
        info!(
            token = %token.name_any(),
            nbf = record.nbf,
            exp = record.exp,
            service_account = record.generate_service_account,
            "令牌进入 Pending 阶段"
        );

        Ok(Step::requeue(status, requeue_delay(now, record.nbf)))
    }

    /// Pending → Ready：到达生效时间后创建副作用
    async fn activate(&self, token: &GateToken, status: GateTokenStatus, now: i64) -> Result<Step> {
        let Some(record) = status.data.clone() else {
            return self.fail(token, status, missing_record(), now);
        };

        if now < record.nbf {
            debug!(token = %token.name_any(), wait = record.nbf - now, "尚未到达生效时间");
            return Ok(Step::requeue(status, requeue_delay(now, record.nbf)));
        }

        // 有效期已经结束的身份不再创建
        if record.generate_service_account && now < record.exp {
            if let Err(e) = self.provision(token, &record).await {
                return self.fail(token, status, e, now);
            }

            let status = status
                .with_service_account(&templates::service_account_name(token))
                .transition(Phase::Ready, "Ready", "令牌已生效", now)?;
            info!(token = %token.name_any(), "令牌进入 Ready 阶段，等待集群签发服务账号令牌");

            return Ok(Step::requeue(status, self.settings.credential_recheck));
        }

        let status = status.transition(Phase::Ready, "Ready", "令牌已生效", now)?;
        info!(token = %token.name_any(), "令牌进入 Ready 阶段");

        self.watch_expiry(token, status, now).await
    }

    /// Ready → Completed：取回服务账号令牌，到达过期时间后清理副作用
    async fn watch_expiry(
        &self,
        token: &GateToken,
        status: GateTokenStatus,
        now: i64,
    ) -> Result<Step> {
        let Some(record) = status.data.clone() else {
            return self.fail(token, status, missing_record(), now);
        };

        let mut status = status;

        if record.generate_service_account && status.token.is_empty() && now < record.exp {
            match self.pull_credential(token).await {
                Ok(Some(credential)) => {
                    info!(token = %token.name_any(), "已取得服务账号令牌");
                    status = status.with_token(credential);
                }
                Ok(None) => {
                    let wait = self
                        .settings
                        .credential_retry
                        .min(requeue_delay(now, record.exp));
                    debug!(token = %token.name_any(), ?wait, "服务账号令牌尚未签发");
                    return Ok(Step::requeue(status, wait));
                }
                Err(e) => return self.fail(token, status, e, now),
            }
        }

        if now < record.exp {
            debug!(token = %token.name_any(), wait = record.exp - now, "令牌尚未过期");
            return Ok(Step::requeue(status, requeue_delay(now, record.exp)));
        }

        if record.generate_service_account && !status.service_account_name.is_empty() {
            // 清理失败只记录日志，过期必须被记录
            self.teardown(token, &record).await;
        }

        let status = status.transition(Phase::Completed, "Expired", "令牌已过期", now)?;
        info!(token = %token.name_any(), "令牌已过期");

        Ok(Step::done(status))
    }

    /// 进入 Error 阶段
    fn fail(
        &self,
        token: &GateToken,
        status: GateTokenStatus,
        err: CommonError,
        now: i64,
    ) -> Result<Step> {
        let Some(reason) = err.failure_reason() else {
            return Err(err.into());
        };

        warn!(token = %token.name_any(), %reason, error = %err, "令牌进入 Error 阶段");
        let status = status.fail(reason, &err.to_string(), now)?;
        Ok(Step::done(status))
    }

    /// 校验请求并计算缓存记录
    fn build_record(&self, token: &GateToken, now: i64) -> kubegate_common::Result<TokenRecord> {
        let spec = &token.spec;

        let scope = spec.rule.resolve()?;
        let binding = if spec.generate_service_account {
            let binding = spec.binding.target()?;
            scope.check_binding(&binding)?;
            Some(binding)
        } else {
            None
        };

        if spec.duration_sec < 0 {
            return Err(CommonError::UserData(format!(
                "有效期不能为负数: {}",
                spec.duration_sec
            )));
        }

        let not_before = spec.not_before()?.unwrap_or(now);
        if not_before.checked_add(spec.duration_sec).is_none() {
            return Err(CommonError::UserData("有效期超出范围".to_string()));
        }

        let record = TokenRecord::new(not_before, spec.duration_sec, spec.rule.clone());
        Ok(match binding {
            Some(binding) => record.with_identity(binding),
            None => record,
        })
    }

    /// 私钥位置：(名称, 命名空间, 字段)
    fn signing_key_location(&self, token: &GateToken) -> (String, String, String) {
        let namespace = templates::namespace_of(token);
        match &token.spec.signing_key_ref {
            Some(key) => (
                key.name.clone(),
                key.namespace.clone().unwrap_or(namespace),
                key.field
                    .clone()
                    .unwrap_or_else(|| self.settings.signing_secret_field.clone()),
            ),
            None => (
                self.settings.signing_secret_name.clone(),
                namespace,
                self.settings.signing_secret_field.clone(),
            ),
        }
    }

    /// 读取私钥并签发 JWT
    async fn sign(&self, token: &GateToken, record: &TokenRecord) -> kubegate_common::Result<String> {
        let (name, namespace, field) = self.signing_key_location(token);

        let key = self
            .store
            .get(&name, &namespace, &field)
            .await
            .map_err(|e| {
                CommonError::PrivateKey(format!("读取私钥 {}/{} 失败: {}", namespace, name, e))
            })?
            .ok_or_else(|| {
                CommonError::PrivateKey(format!(
                    "私钥 Secret {}/{} 或字段 {} 不存在",
                    namespace, name, field
                ))
            })?;

        self.signer
            .sign(&TokenClaims::from_record(record), &key)
            .map_err(|e| CommonError::PrivateKey(format!("签发令牌失败: {}", e)))
    }

    /// 创建服务账号及绑定，任一步失败立即返回，不回滚已创建的对象
    async fn provision(&self, token: &GateToken, record: &TokenRecord) -> kubegate_common::Result<()> {
        self.provisioner
            .create_identity(token)
            .await
            .map_err(|e| CommonError::SideEffect(format!("创建服务账号失败: {}", e)))?;

        self.provisioner
            .create_binding(token, &record.binding, &record.rule)
            .await
            .map_err(|e| CommonError::SideEffect(format!("创建授权绑定失败: {}", e)))?;

        Ok(())
    }

    /// 读取集群签发的服务账号令牌，尚未签发时返回 None
    async fn pull_credential(&self, token: &GateToken) -> kubegate_common::Result<Option<String>> {
        let namespace = templates::namespace_of(token);
        let secret = templates::token_secret_name(token);

        match self.store.get(&secret, &namespace, templates::TOKEN_FIELD).await {
            Ok(Some(bytes)) if !bytes.is_empty() => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| CommonError::TokenGetter(format!("服务账号令牌不是有效的 UTF-8: {}", e))),
            Ok(_) => Ok(None),
            Err(e) => Err(CommonError::TokenGetter(format!(
                "读取服务账号令牌 {}/{} 失败: {}",
                namespace, secret, e
            ))),
        }
    }

    /// 尽力删除服务账号及绑定，收集并记录所有错误
    async fn teardown(&self, token: &GateToken, record: &TokenRecord) -> Vec<Error> {
        let name = token.name_any();
        let mut errors = Vec::new();

        if let Err(e) = self.provisioner.delete_binding(token, &record.binding).await {
            warn!(token = %name, error = %e, "删除授权绑定失败");
            errors.push(e);
        }

        if let Err(e) = self.provisioner.delete_identity(token).await {
            warn!(token = %name, error = %e, "删除服务账号失败");
            errors.push(e);
        }

        if errors.is_empty() {
            info!(token = %name, "已删除服务账号及授权绑定");
        } else {
            warn!(token = %name, failures = errors.len(), "副作用清理未完成");
        }

        errors
    }
}

fn missing_record() -> CommonError {
    CommonError::UserData("状态中缺少缓存记录".to_string())
}
