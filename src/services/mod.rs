//! 服务层模块
//!
//! 包含核心业务逻辑

pub mod certificate;
pub mod deploy;
pub mod dns;
pub mod orchestrator;
pub mod scheduler;
pub mod template;

pub use certificate::CertificateManager;
pub use deploy::ServiceDeployer;
pub use dns::DnsReconciler;
pub use orchestrator::Provisioner;
pub use scheduler::TaskRegistry;
pub use template::ConfigTemplater;
