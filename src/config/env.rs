//! 环境变量配置加载
//!
//! 所有路径与等待时间均有默认值，可通过 `EDGE_*` 环境变量覆盖。
//! 配置在启动时加载一次，之后只读传递，流程中不再读取环境。

use std::env;
use std::path::PathBuf;

/// 开通工具配置
#[derive(Clone, Debug)]
pub struct Settings {
    /// 基础域名（子域名挂在其下）
    pub base_domain: String,
    /// 服务栈目录（compose 文件、配置、证书副本）
    pub stack_dir: PathBuf,
    /// certbot 签发证书的 live 目录
    pub letsencrypt_live_dir: PathBuf,
    /// DNS 提供商凭据文件路径（由证书管理器写入）
    pub dns_credentials_path: PathBuf,
    /// 外部安装器程序
    pub installer_program: String,
    /// 安装器的存储后端选择
    pub installer_backend: String,
    /// 服务配置模板路径
    pub template_path: PathBuf,
    /// 渲染后的服务配置输出路径
    pub rendered_config_path: PathBuf,
    /// DNS 记录写入后的传播等待（秒）
    pub propagation_wait_secs: u64,
    /// DNS-01 验证前的传播等待（秒，传给 certbot）
    pub challenge_propagation_secs: u64,
    /// 后台续期检查间隔（秒）
    pub renewal_check_interval_secs: u64,
}

impl Settings {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        let base_domain = env::var("EDGE_BASE_DOMAIN")
            .unwrap_or_else(|_| constants::DEFAULT_BASE_DOMAIN.to_string());

        let stack_dir = path_var("EDGE_STACK_DIR", "/opt/xjp-edge");
        let letsencrypt_live_dir = path_var("EDGE_LETSENCRYPT_LIVE_DIR", "/etc/letsencrypt/live");
        let dns_credentials_path =
            path_var("EDGE_DNS_CREDENTIALS_PATH", "/root/.secrets/cloudflare.ini");

        let installer_program = env::var("EDGE_INSTALLER_PROGRAM")
            .unwrap_or_else(|_| "/opt/xjp-edge/install.sh".to_string());
        let installer_backend =
            env::var("EDGE_INSTALLER_BACKEND").unwrap_or_else(|_| "sqlite".to_string());

        let template_path = path_var("EDGE_TEMPLATE_PATH", "/opt/xjp-edge/xray.json.template");
        let rendered_config_path =
            path_var("EDGE_RENDERED_CONFIG_PATH", "/opt/xjp-edge/xray/config.json");

        let propagation_wait_secs = env::var("EDGE_PROPAGATION_WAIT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(constants::DEFAULT_PROPAGATION_WAIT_SECS);

        let challenge_propagation_secs = env::var("EDGE_CHALLENGE_PROPAGATION_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(constants::DEFAULT_CHALLENGE_PROPAGATION_SECS);

        let renewal_check_interval_secs = env::var("EDGE_RENEWAL_CHECK_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(constants::DEFAULT_RENEWAL_CHECK_INTERVAL_SECS);

        Self {
            base_domain,
            stack_dir,
            letsencrypt_live_dir,
            dns_credentials_path,
            installer_program,
            installer_backend,
            template_path,
            rendered_config_path,
            propagation_wait_secs,
            challenge_propagation_secs,
            renewal_check_interval_secs,
        }
    }

    /// 服务栈的部署描述文件（已安装标记）
    pub fn compose_file(&self) -> PathBuf {
        self.stack_dir.join("docker-compose.yml")
    }

    /// 服务栈的环境文件（证书路径键值写入其中）
    pub fn stack_env_file(&self) -> PathBuf {
        self.stack_dir.join(".env")
    }

    /// 证书副本目录
    pub fn runtime_cert_dir(&self) -> PathBuf {
        self.stack_dir.join("certs")
    }

    /// 某域名证书的 live 目录
    pub fn live_cert_dir(&self, domain: &str) -> PathBuf {
        self.letsencrypt_live_dir.join(domain)
    }
}

/// 读取路径类环境变量
fn path_var(name: &str, default: &str) -> PathBuf {
    env::var(name)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

/// 常量
pub mod constants {
    /// 默认基础域名
    pub const DEFAULT_BASE_DOMAIN: &str = "xjp.cloud";

    /// DNS 记录写入后的默认传播等待（秒）
    pub const DEFAULT_PROPAGATION_WAIT_SECS: u64 = 60;

    /// DNS-01 验证前的默认传播等待（秒）
    pub const DEFAULT_CHALLENGE_PROPAGATION_SECS: u64 = 60;

    /// 默认续期检查间隔（12 小时）
    pub const DEFAULT_RENEWAL_CHECK_INTERVAL_SECS: u64 = 12 * 3600;

    /// 证书剩余有效期低于该天数时续期
    pub const RENEW_THRESHOLD_DAYS: i64 = 30;

    /// 配置模板中的域名占位符
    pub const DOMAIN_PLACEHOLDER: &str = "{{DOMAIN}}";

    /// API 令牌最小长度
    pub const MIN_TOKEN_LEN: usize = 10;

    /// 外部命令超时（秒）
    pub const COMMAND_TIMEOUT_SECS: u64 = 1800; // certbot / 安装器最长 30 分钟
}
