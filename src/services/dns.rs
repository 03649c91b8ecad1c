//! DNS 对账
//!
//! 确保 `subdomain.base_domain` 的 A 记录存在且指向本机公网地址。
//! 决策前总是重新读取提供商侧状态，不缓存；三种处置：
//! 缺失则创建、已一致则跳过、指向别处则原地更新，绝不追加第二条记录。

use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::domain::{DnsRecordState, HostAddress, ProvisionRequest, RecordDisposition};
use crate::error::ProvisionError;

/// 提供商侧的一条 A 记录
#[derive(Clone, Debug)]
pub struct ARecord {
    pub id: String,
    pub address: Ipv4Addr,
}

/// DNS 提供商能力（区查询、记录读写）
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// 按域名查找区 ID
    async fn zone_id(&self, base_domain: &str) -> Result<String, ProvisionError>;

    /// 列出某完整域名下的 A 记录
    async fn list_a_records(&self, zone_id: &str, fqdn: &str)
        -> Result<Vec<ARecord>, ProvisionError>;

    /// 创建 A 记录，返回记录 ID
    async fn create_a_record(
        &self,
        zone_id: &str,
        fqdn: &str,
        address: Ipv4Addr,
    ) -> Result<String, ProvisionError>;

    /// 原地更新 A 记录
    async fn update_a_record(
        &self,
        zone_id: &str,
        record_id: &str,
        fqdn: &str,
        address: Ipv4Addr,
    ) -> Result<(), ProvisionError>;
}

/// 公网地址发现能力
#[async_trait]
pub trait AddressDiscovery: Send + Sync {
    /// 解析本机的外部可路由 IPv4 地址
    async fn public_ipv4(&self) -> Result<HostAddress, ProvisionError>;
}

/// DNS 对账器
pub struct DnsReconciler {
    provider: Arc<dyn DnsProvider>,
    discovery: Arc<dyn AddressDiscovery>,
}

impl DnsReconciler {
    pub fn new(provider: Arc<dyn DnsProvider>, discovery: Arc<dyn AddressDiscovery>) -> Self {
        Self {
            provider,
            discovery,
        }
    }

    /// 对账：确保 A 记录指向本机地址，返回对账后的记录状态
    ///
    /// 任一提供商调用失败都是致命错误，由调用方整体重试。
    pub async fn reconcile(
        &self,
        request: &ProvisionRequest,
    ) -> Result<DnsRecordState, ProvisionError> {
        let host = self.discovery.public_ipv4().await?;
        info!(address = %host, "Resolved host public address");

        let zone_id = self.provider.zone_id(&request.base_domain).await?;

        // 决策前读取提供商侧真实状态
        let records = self
            .provider
            .list_a_records(&zone_id, &request.full_domain)
            .await?;

        if records.len() > 1 {
            warn!(
                fqdn = %request.full_domain,
                count = records.len(),
                "Multiple A records found, reconciling the first only"
            );
        }

        let state = match records.first() {
            Some(record) => DnsRecordState::existing(record.id.clone(), record.address),
            None => DnsRecordState::absent(),
        };

        match state.disposition(host) {
            RecordDisposition::Absent => {
                info!(fqdn = %request.full_domain, address = %host, "Creating A record");
                let record_id = self
                    .provider
                    .create_a_record(&zone_id, &request.full_domain, host.0)
                    .await?;
                Ok(DnsRecordState::existing(record_id, host.0))
            }
            RecordDisposition::Converged => {
                info!(fqdn = %request.full_domain, address = %host, "A record already converged");
                Ok(state)
            }
            RecordDisposition::Divergent => {
                // state.disposition 保证存在 record_id
                let record_id = state.record_id.clone().unwrap_or_default();
                info!(
                    fqdn = %request.full_domain,
                    from = ?state.current_address,
                    to = %host,
                    "Updating A record in place"
                );
                self.provider
                    .update_a_record(&zone_id, &record_id, &request.full_domain, host.0)
                    .await?;
                Ok(DnsRecordState::existing(record_id, host.0))
            }
        }
    }
}
