//! 开通流程领域模型

use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::constants::MIN_TOKEN_LEN;
use crate::error::ProvisionError;

/// 一次开通请求
///
/// 在入口处校验并构造，之后整个流程只读。
/// `full_domain` 在构造时拼接一次，流程中不再重新计算。
#[derive(Clone, Debug)]
pub struct ProvisionRequest {
    /// 子域名（`[a-zA-Z0-9-]+`）
    pub subdomain: String,
    /// DNS 提供商 API 令牌
    pub api_token: String,
    /// 基础域名
    pub base_domain: String,
    /// 完整域名（subdomain.base_domain）
    pub full_domain: String,
}

impl ProvisionRequest {
    /// 校验输入并构造请求
    ///
    /// 任何网络调用之前必须先通过这里的校验。
    pub fn new(
        subdomain: &str,
        api_token: &str,
        base_domain: &str,
    ) -> Result<Self, ProvisionError> {
        if subdomain.is_empty()
            || !subdomain
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(ProvisionError::InvalidInput(format!(
                "subdomain '{}' must match [a-zA-Z0-9-]+",
                subdomain
            )));
        }

        if api_token.len() < MIN_TOKEN_LEN {
            return Err(ProvisionError::InvalidInput(format!(
                "API token too short ({} chars, minimum {})",
                api_token.len(),
                MIN_TOKEN_LEN
            )));
        }

        Ok(Self {
            subdomain: subdomain.to_string(),
            api_token: api_token.to_string(),
            base_domain: base_domain.to_string(),
            full_domain: format!("{}.{}", subdomain, base_domain),
        })
    }
}

/// 主机的公网 IPv4 地址
///
/// 每次运行解析一次，作为 DNS 对账的基准事实。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HostAddress(pub Ipv4Addr);

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// 提供商侧的 A 记录状态
///
/// 每次决策前从提供商重新读取，不跨重试缓存。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DnsRecordState {
    /// 记录是否存在
    pub exists: bool,
    /// 记录 ID（存在时）
    pub record_id: Option<String>,
    /// 记录当前指向的地址（存在时）
    pub current_address: Option<Ipv4Addr>,
}

impl DnsRecordState {
    /// 不存在的记录
    pub fn absent() -> Self {
        Self {
            exists: false,
            record_id: None,
            current_address: None,
        }
    }

    /// 已存在的记录
    pub fn existing(record_id: impl Into<String>, address: Ipv4Addr) -> Self {
        Self {
            exists: true,
            record_id: Some(record_id.into()),
            current_address: Some(address),
        }
    }

    /// 对照主机地址判断处置方式
    pub fn disposition(&self, host: HostAddress) -> RecordDisposition {
        match (self.exists, self.current_address) {
            (false, _) => RecordDisposition::Absent,
            (true, Some(addr)) if addr == host.0 => RecordDisposition::Converged,
            (true, _) => RecordDisposition::Divergent,
        }
    }
}

/// A 记录相对主机地址的处置方式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordDisposition {
    /// 不存在，需要创建
    Absent,
    /// 已指向主机地址，无需操作
    Converged,
    /// 指向别处，原地更新
    Divergent,
}

/// TLS 证书束
///
/// 由证书管理器独占管理；下游只读取路径，不修改文件。
#[derive(Clone, Debug)]
pub struct CertificateBundle {
    /// 证书链文件
    pub fullchain_path: PathBuf,
    /// 私钥文件
    pub private_key_path: PathBuf,
    /// 过期时间
    pub not_after: DateTime<Utc>,
}

impl CertificateBundle {
    /// 距过期的剩余天数（已过期为负）
    pub fn days_until_expiry(&self, now: DateTime<Utc>) -> i64 {
        (self.not_after - now).num_days()
    }
}

/// 开通流程的步骤标识
///
/// 失败时记录到日志并随错误一起返回
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProvisionStep {
    Validate,
    Dns,
    Certificate,
    Install,
    PlaceCertificates,
    RenderConfig,
    Start,
}

impl ProvisionStep {
    /// 转换为字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisionStep::Validate => "validate",
            ProvisionStep::Dns => "dns",
            ProvisionStep::Certificate => "certificate",
            ProvisionStep::Install => "install",
            ProvisionStep::PlaceCertificates => "place_certificates",
            ProvisionStep::RenderConfig => "render_config",
            ProvisionStep::Start => "start",
        }
    }
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
