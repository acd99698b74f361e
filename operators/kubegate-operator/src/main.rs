//! KubeGate Operator 入口

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use kube::CustomResourceExt;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kubegate_operator::config::OperatorConfig;
use kubegate_operator::crd::GateToken;
use kubegate_operator::KubeGateOperator;

/// KubeGate - 按时间窗口发放 Kubernetes 访问令牌
#[derive(Parser, Debug)]
#[command(name = "kubegate-operator", version, about, long_about = None)]
struct Args {
    /// 配置文件路径（YAML 或 JSON）
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 只监听指定命名空间，覆盖配置文件
    #[arg(short, long)]
    namespace: Option<String>,

    /// 输出 CRD 清单后退出
    #[arg(long)]
    print_crd: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.print_crd {
        let crd = serde_yaml::to_string(&GateToken::crd()).context("序列化 CRD 失败")?;
        println!("{crd}");
        return Ok(());
    }

    let mut config = OperatorConfig::load(args.config.as_deref()).context("加载配置失败")?;
    if args.namespace.is_some() {
        config.namespace = args.namespace;
    }

    // RUST_LOG 优先于配置文件中的日志级别
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("日志级别无效")?;
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "启动 KubeGate Operator");

    let operator = KubeGateOperator::new(config).await?;
    operator.run().await?;

    info!("KubeGate Operator 已退出");
    Ok(())
}
