//! Cloudflare DNS API Client
//!
//! 封装区查询与 A 记录读写。所有响应以 `success` 布尔位判定成败，
//! 非成功响应将原始响应体带入错误，便于排查。

use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ProvisionError;
use crate::services::dns::{ARecord, DnsProvider};

/// Cloudflare v4 API 基地址
const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// API 响应信封
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    success: bool,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ZoneJson {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RecordJson {
    id: String,
    content: String,
}

/// A 记录写入载荷
#[derive(Debug, Serialize)]
struct RecordPayload<'a> {
    #[serde(rename = "type")]
    record_type: &'static str,
    name: &'a str,
    content: String,
    ttl: u32,
    proxied: bool,
}

impl<'a> RecordPayload<'a> {
    fn a_record(name: &'a str, address: Ipv4Addr) -> Self {
        Self {
            record_type: "A",
            name,
            content: address.to_string(),
            ttl: 120,
            proxied: false,
        }
    }
}

/// Cloudflare DNS 提供商实现
pub struct CloudflareDns {
    client: Client,
    api_base: String,
    token: String,
}

impl CloudflareDns {
    /// 创建客户端（Bearer 令牌认证）
    pub fn new(token: &str) -> Result<Self, ProvisionError> {
        Self::with_base_url(token, CLOUDFLARE_API_BASE)
    }

    /// 指定 API 基地址创建（测试用）
    pub fn with_base_url(token: &str, api_base: &str) -> Result<Self, ProvisionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                ProvisionError::external_api("cloudflare", format!("HTTP client init: {}", e))
            })?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// 发送请求并解析信封，保留原始响应体
    async fn parse_envelope<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<T, ProvisionError> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| {
                ProvisionError::external_api("cloudflare", format!("{}: {}", context, e))
            })?;

        let body = response.text().await.map_err(|e| {
            ProvisionError::external_api("cloudflare", format!("{}: read body: {}", context, e))
        })?;

        let envelope: ApiEnvelope<T> = serde_json::from_str(&body).map_err(|_| {
            ProvisionError::external_api(
                "cloudflare",
                format!("{}: unexpected response: {}", context, body),
            )
        })?;

        if !envelope.success {
            return Err(ProvisionError::external_api(
                "cloudflare",
                format!("{}: provider reported failure: {}", context, body),
            ));
        }

        envelope.result.ok_or_else(|| {
            ProvisionError::external_api(
                "cloudflare",
                format!("{}: success without result: {}", context, body),
            )
        })
    }
}

#[async_trait]
impl DnsProvider for CloudflareDns {
    async fn zone_id(&self, base_domain: &str) -> Result<String, ProvisionError> {
        let url = format!("{}/zones?name={}", self.api_base, base_domain);
        let zones: Vec<ZoneJson> = self
            .parse_envelope(self.client.get(&url), "zone lookup")
            .await?;

        let zone = zones.into_iter().next().ok_or_else(|| {
            ProvisionError::external_api(
                "cloudflare",
                format!("zone lookup: no zone for '{}'", base_domain),
            )
        })?;

        debug!(base_domain, zone_id = %zone.id, "Resolved zone");
        Ok(zone.id)
    }

    async fn list_a_records(
        &self,
        zone_id: &str,
        fqdn: &str,
    ) -> Result<Vec<ARecord>, ProvisionError> {
        let url = format!(
            "{}/zones/{}/dns_records?type=A&name={}",
            self.api_base, zone_id, fqdn
        );
        let records: Vec<RecordJson> = self
            .parse_envelope(self.client.get(&url), "record lookup")
            .await?;

        Ok(records
            .into_iter()
            .filter_map(|r| match r.content.parse() {
                Ok(address) => Some(ARecord { id: r.id, address }),
                Err(_) => {
                    warn!(record_id = %r.id, content = %r.content, "Skipping non-IPv4 A record content");
                    None
                }
            })
            .collect())
    }

    async fn create_a_record(
        &self,
        zone_id: &str,
        fqdn: &str,
        address: Ipv4Addr,
    ) -> Result<String, ProvisionError> {
        let url = format!("{}/zones/{}/dns_records", self.api_base, zone_id);
        let payload = RecordPayload::a_record(fqdn, address);
        let record: RecordJson = self
            .parse_envelope(self.client.post(&url).json(&payload), "record create")
            .await?;

        Ok(record.id)
    }

    async fn update_a_record(
        &self,
        zone_id: &str,
        record_id: &str,
        fqdn: &str,
        address: Ipv4Addr,
    ) -> Result<(), ProvisionError> {
        let url = format!("{}/zones/{}/dns_records/{}", self.api_base, zone_id, record_id);
        let payload = RecordPayload::a_record(fqdn, address);
        let _record: RecordJson = self
            .parse_envelope(self.client.put(&url).json(&payload), "record update")
            .await?;

        Ok(())
    }
}
