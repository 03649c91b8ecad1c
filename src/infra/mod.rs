//! 基础设施模块
//!
//! 封装外部依赖（HTTP client、命令执行等）

pub mod address;
pub mod cloudflare;
pub mod command;

pub use address::IpifyDiscovery;
pub use cloudflare::CloudflareDns;
pub use command::{CommandError, CommandExecutor, CommandOutput, SystemExecutor};
