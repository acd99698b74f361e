//! KubeGate Operator - 管理带有效期的 Kubernetes 访问令牌
//!
//! 该模块实现了 KubeGate 的 Kubernetes Operator，负责处理 GateToken 自定义资源：
//! 在生效时间到达后交付访问凭据（RS256 JWT 或集群签发的服务账号令牌），
//! 在过期或删除时撤销为其创建的服务账号及授权绑定。

pub mod clock;
pub mod config;
pub mod controller;
pub mod crd;
pub mod credential_store;
pub mod error;
pub mod provisioner;
pub mod reconcile;
pub mod signer;
pub mod templates;

use anyhow::Result;
use kube::Client;

use crate::config::OperatorConfig;

/// Operator 主结构体
pub struct KubeGateOperator {
    /// 控制器
    controller: controller::Controller,
}

impl KubeGateOperator {
    /// 创建新的 Operator 实例
    pub async fn new(config: OperatorConfig) -> Result<Self> {
        // 创建 Kubernetes 客户端
        let client = Client::try_default().await?;

        Ok(Self {
            controller: controller::Controller::new(client, config),
        })
    }

    /// 运行 Operator，直到收到退出信号
    pub async fn run(&self) -> Result<()> {
        self.controller.run().await;
        Ok(())
    }
}
