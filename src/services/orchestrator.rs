//! 开通编排
//!
//! 顺序执行各组件：输入校验 → DNS 对账 → 传播等待 → 证书 →
//! 安装 → 证书放置 → 配置渲染 → 启动。每一步自身幂等，
//! 首个致命错误即中止整个流程并标明失败步骤；流程内无并发。

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::config::constants::DOMAIN_PLACEHOLDER;
use crate::config::Settings;
use crate::domain::{ProvisionRequest, ProvisionStep};
use crate::error::ProvisionError;
use crate::infra::command::CommandExecutor;
use crate::services::certificate::CertificateManager;
use crate::services::deploy::ServiceDeployer;
use crate::services::dns::{AddressDiscovery, DnsProvider, DnsReconciler};
use crate::services::scheduler::TaskRegistry;
use crate::services::template::ConfigTemplater;

/// 开通编排器
///
/// 自身不持有跨运行状态；幂等性由各步骤的状态检查保证，
/// 因此失败后整体重跑是安全的。
pub struct Provisioner {
    settings: Settings,
    dns: DnsReconciler,
    certificates: CertificateManager,
    deployer: Arc<ServiceDeployer>,
    registry: Arc<TaskRegistry>,
}

impl Provisioner {
    pub fn new(
        settings: Settings,
        provider: Arc<dyn DnsProvider>,
        discovery: Arc<dyn AddressDiscovery>,
        executor: Arc<dyn CommandExecutor>,
        registry: Arc<TaskRegistry>,
    ) -> Self {
        Self {
            dns: DnsReconciler::new(provider, discovery),
            certificates: CertificateManager::new(settings.clone(), executor.clone()),
            deployer: Arc::new(ServiceDeployer::new(settings.clone(), executor)),
            settings,
            registry,
        }
    }

    /// 执行一次完整开通
    ///
    /// 任何网络调用之前先校验输入。
    pub async fn provision(
        &self,
        subdomain: &str,
        api_token: &str,
    ) -> Result<(), ProvisionError> {
        let request = self.checked(
            ProvisionStep::Validate,
            ProvisionRequest::new(subdomain, api_token, &self.settings.base_domain),
        )?;
        info!(domain = %request.full_domain, "Provisioning started");

        self.step(ProvisionStep::Dns, self.dns.reconcile(&request))
            .await?;

        // 等待 DNS 传播，之后的 DNS-01 验证才能查到记录
        if self.settings.propagation_wait_secs > 0 {
            info!(
                wait_secs = self.settings.propagation_wait_secs,
                "Waiting for DNS propagation"
            );
            tokio::time::sleep(Duration::from_secs(self.settings.propagation_wait_secs)).await;
        }

        let bundle = self
            .step(
                ProvisionStep::Certificate,
                self.certificates.ensure_certificate(&request),
            )
            .await?;

        self.certificates
            .schedule_renewal(&self.registry, self.deployer.clone(), &request.full_domain)
            .await;

        self.step(ProvisionStep::Install, self.deployer.ensure_installed())
            .await?;

        self.step(
            ProvisionStep::PlaceCertificates,
            self.deployer.place_certificates(&bundle),
        )
        .await?;

        let substitutions = HashMap::from([(
            DOMAIN_PLACEHOLDER.to_string(),
            request.full_domain.clone(),
        )]);
        self.step(
            ProvisionStep::RenderConfig,
            ConfigTemplater::render(
                &self.settings.template_path,
                &substitutions,
                &self.settings.rendered_config_path,
            ),
        )
        .await?;

        self.step(ProvisionStep::Start, self.deployer.start()).await?;

        info!(domain = %request.full_domain, "Provisioning complete");
        Ok(())
    }

    /// 执行一个步骤，失败时记录步骤标识
    async fn step<T, F>(&self, step: ProvisionStep, fut: F) -> Result<T, ProvisionError>
    where
        F: Future<Output = Result<T, ProvisionError>>,
    {
        match fut.await {
            Ok(value) => Ok(value),
            Err(e) => {
                error!(step = %step, error = %e, "Provisioning step failed");
                Err(e)
            }
        }
    }

    fn checked<T>(
        &self,
        step: ProvisionStep,
        result: Result<T, ProvisionError>,
    ) -> Result<T, ProvisionError> {
        result.map_err(|e| {
            error!(step = %step, error = %e, "Provisioning step failed");
            e
        })
    }
}
