//! 统一错误处理
//!
//! 开通流程的错误分类：输入校验、外部 API、前置条件、宿主环境。
//! 所有错误均为致命错误并中止整个流程，续期钩子的失败除外
//! （仅记录日志，见 `services::scheduler`）。

use thiserror::Error;

use crate::infra::command::CommandError;

/// 开通流程错误类型
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// 输入校验失败（子域名格式、令牌长度）
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// 外部 API 调用失败或返回非成功响应
    ///
    /// `detail` 保留原始响应内容，便于排查
    #[error("{service} API call failed: {detail}")]
    ExternalApi { service: &'static str, detail: String },

    /// 前置条件缺失（模板文件、证书源文件不存在）
    #[error("missing precondition: {0}")]
    PreconditionMissing(String),

    /// 宿主环境不满足（容器运行时或 compose 不可用）
    #[error("environment not usable: {0}")]
    Environment(String),

    /// 外部命令执行失败
    #[error("command execution failed: {0}")]
    Command(#[from] CommandError),

    /// 文件系统操作失败
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProvisionError {
    /// 创建外部 API 错误，保留原始响应
    pub fn external_api(service: &'static str, detail: impl Into<String>) -> Self {
        Self::ExternalApi {
            service,
            detail: detail.into(),
        }
    }
}
