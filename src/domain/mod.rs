//! 领域模型模块
//!
//! 纯数据结构，不依赖 tokio/reqwest

pub mod provision;

// Re-exports for convenience
pub use provision::{
    CertificateBundle, DnsRecordState, HostAddress, ProvisionRequest, ProvisionStep,
    RecordDisposition,
};
