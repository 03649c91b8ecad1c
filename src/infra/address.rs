//! 公网地址发现
//!
//! 通过返回纯文本 IPv4 的外部服务解析本机地址。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::domain::HostAddress;
use crate::error::ProvisionError;
use crate::services::dns::AddressDiscovery;

/// 默认地址发现服务
const IPIFY_URL: &str = "https://api.ipify.org";

/// 基于 ipify 的地址发现实现
pub struct IpifyDiscovery {
    client: Client,
    url: String,
}

impl IpifyDiscovery {
    pub fn new() -> Result<Self, ProvisionError> {
        Self::with_url(IPIFY_URL)
    }

    /// 指定服务地址创建（测试用）
    pub fn with_url(url: &str) -> Result<Self, ProvisionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| {
                ProvisionError::external_api("address discovery", format!("HTTP client init: {}", e))
            })?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl AddressDiscovery for IpifyDiscovery {
    async fn public_ipv4(&self) -> Result<HostAddress, ProvisionError> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ProvisionError::external_api("address discovery", e.to_string()))?
            .text()
            .await
            .map_err(|e| ProvisionError::external_api("address discovery", e.to_string()))?;

        let address = body.trim().parse().map_err(|_| {
            ProvisionError::external_api(
                "address discovery",
                format!("not an IPv4 address: '{}'", body.trim()),
            )
        })?;

        debug!(%address, "Discovered public address");
        Ok(HostAddress(address))
    }
}
