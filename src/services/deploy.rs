//! 服务栈部署
//!
//! 三个动作各自幂等：安装以部署描述文件存在为标记，证书放置
//! 覆盖式拷贝，启动走 compose 的 `up -d`（本身可重入）。
//! compose 有两种互斥的调用方式：集成子命令 `docker compose`
//! 与独立二进制 `docker-compose`，择一可用者使用。

use std::path::Path;
use std::sync::Arc;

use tokio::fs;
use tracing::info;

use crate::config::Settings;
use crate::domain::CertificateBundle;
use crate::error::ProvisionError;
use crate::infra::command::CommandExecutor;

/// 服务栈环境文件中的证书路径键
const CERT_FILE_KEY: &str = "SSL_CERT_FILE";
const KEY_FILE_KEY: &str = "SSL_KEY_FILE";

/// 可用的 compose 调用方式
#[derive(Clone, Debug, PartialEq, Eq)]
struct ComposeInvocation {
    program: &'static str,
    base_args: Vec<&'static str>,
}

/// 服务栈部署器
pub struct ServiceDeployer {
    settings: Settings,
    executor: Arc<dyn CommandExecutor>,
}

impl ServiceDeployer {
    pub fn new(settings: Settings, executor: Arc<dyn CommandExecutor>) -> Self {
        Self { settings, executor }
    }

    /// 确保外部安装器跑过一次
    ///
    /// 以部署描述文件的存在为已安装标记，存在即跳过；
    /// 不做内容比对，安装器视为黑盒。
    pub async fn ensure_installed(&self) -> Result<(), ProvisionError> {
        let marker = self.settings.compose_file();
        if marker.exists() {
            info!(marker = %marker.display(), "Stack already installed, skipping installer");
            return Ok(());
        }

        info!(
            installer = %self.settings.installer_program,
            backend = %self.settings.installer_backend,
            "Running external installer"
        );
        let output = self
            .executor
            .execute(
                &self.settings.installer_program,
                &["install", &self.settings.installer_backend],
            )
            .await?;

        if !output.success {
            return Err(ProvisionError::external_api(
                "installer",
                format!("{}{}", output.stdout, output.stderr),
            ));
        }
        Ok(())
    }

    /// 把证书束拷贝到服务栈运行目录并改写配置中的证书路径
    ///
    /// 源文件缺失是致命的前置条件错误；证书束本身保持只读。
    pub async fn place_certificates(
        &self,
        bundle: &CertificateBundle,
    ) -> Result<(), ProvisionError> {
        for source in [&bundle.fullchain_path, &bundle.private_key_path] {
            if !source.exists() {
                return Err(ProvisionError::PreconditionMissing(format!(
                    "certificate file not found: {}",
                    source.display()
                )));
            }
        }

        let cert_dir = self.settings.runtime_cert_dir();
        fs::create_dir_all(&cert_dir).await?;

        let cert_copy = cert_dir.join("fullchain.pem");
        let key_copy = cert_dir.join("privkey.pem");
        fs::copy(&bundle.fullchain_path, &cert_copy).await?;
        fs::copy(&bundle.private_key_path, &key_copy).await?;

        rewrite_env_values(
            &self.settings.stack_env_file(),
            &[
                (CERT_FILE_KEY, cert_copy.to_string_lossy().into_owned()),
                (KEY_FILE_KEY, key_copy.to_string_lossy().into_owned()),
            ],
        )
        .await?;

        info!(cert_dir = %cert_dir.display(), "Certificates placed into stack directory");
        Ok(())
    }

    /// 启动（或重启）服务栈
    ///
    /// 先探测容器运行时，再在两种 compose 调用方式中择一；
    /// 两者皆不可用则致命失败。
    pub async fn start(&self) -> Result<(), ProvisionError> {
        let runtime = self.executor.execute("docker", &["info"]).await;
        let runtime_ok = matches!(runtime, Ok(ref output) if output.success);
        if !runtime_ok {
            return Err(ProvisionError::Environment(
                "container runtime unavailable ('docker info' failed)".to_string(),
            ));
        }

        let compose = self.detect_compose().await?;
        info!(program = compose.program, args = ?compose.base_args, "Bringing stack up");

        let mut args = compose.base_args.clone();
        args.extend(["up", "-d"]);
        let output = self
            .executor
            .execute_in(compose.program, &args, &self.settings.stack_dir)
            .await?;

        if !output.success {
            return Err(ProvisionError::Environment(format!(
                "compose up failed: {}{}",
                output.stdout, output.stderr
            )));
        }

        info!("Service stack is up");
        Ok(())
    }

    /// 探测可用的 compose 调用方式（优先集成子命令）
    async fn detect_compose(&self) -> Result<ComposeInvocation, ProvisionError> {
        let integrated = self.executor.execute("docker", &["compose", "version"]).await;
        if matches!(integrated, Ok(ref output) if output.success) {
            return Ok(ComposeInvocation {
                program: "docker",
                base_args: vec!["compose"],
            });
        }

        let standalone = self.executor.execute("docker-compose", &["--version"]).await;
        if matches!(standalone, Ok(ref output) if output.success) {
            return Ok(ComposeInvocation {
                program: "docker-compose",
                base_args: vec![],
            });
        }

        Err(ProvisionError::Environment(
            "neither 'docker compose' nor 'docker-compose' is available".to_string(),
        ))
    }
}

/// 改写 env 文件中的键值（缺失的键追加到末尾）
async fn rewrite_env_values(path: &Path, pairs: &[(&str, String)]) -> Result<(), ProvisionError> {
    let existing = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    let mut lines: Vec<String> = existing.lines().map(str::to_string).collect();
    for (key, value) in pairs {
        let prefix = format!("{}=", key);
        let replacement = format!("{}={}", key, value);
        match lines.iter_mut().find(|line| line.starts_with(&prefix)) {
            Some(line) => *line = replacement,
            None => lines.push(replacement),
        }
    }

    fs::write(path, lines.join("\n") + "\n").await?;
    Ok(())
}
