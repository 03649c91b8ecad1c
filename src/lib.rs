//! XJP Edge Provisioner - 边缘节点开通工具
//!
//! 在新主机上开通单租户边缘端点：子域名 A 记录、通配符 TLS 证书、
//! 容器化服务栈。每一步先检查现状再动作，整个流程可安全重跑，
//! 部分失败后重新执行会收敛到相同终态，不产生重复资源。

pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod services;

use std::sync::Arc;

use config::Settings;
use error::ProvisionError;
use infra::{CloudflareDns, IpifyDiscovery, SystemExecutor};
use services::{Provisioner, TaskRegistry};

/// 初始化日志（RUST_LOG 可覆盖级别）
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

/// 以真实基础设施执行一次开通
pub async fn run(subdomain: &str, api_token: &str) -> Result<(), ProvisionError> {
    let settings = Settings::from_env();

    let provider = Arc::new(CloudflareDns::new(api_token)?);
    let discovery = Arc::new(IpifyDiscovery::new()?);
    let executor = Arc::new(SystemExecutor::new());
    let registry = Arc::new(TaskRegistry::new());

    let provisioner = Provisioner::new(settings, provider, discovery, executor, registry);
    provisioner.provision(subdomain, api_token).await
}
