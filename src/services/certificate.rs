//! 证书管理
//!
//! 状态机：缺失 → 签发 → 有效；有效且剩余 ≤ 30 天 → 续期 → 有效。
//! 磁盘上已有剩余有效期充足的证书时直接短路，不触碰证书机构
//! （签发接口有频率限制）。签发/续期通过外部 certbot 以 DNS-01
//! 验证完成，凭据文件由本模块写入。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{info, warn};

use crate::config::constants::RENEW_THRESHOLD_DAYS;
use crate::config::Settings;
use crate::domain::{CertificateBundle, ProvisionRequest};
use crate::error::ProvisionError;
use crate::infra::command::CommandExecutor;
use crate::services::deploy::ServiceDeployer;
use crate::services::scheduler::TaskRegistry;

/// 续期任务在注册表中的名字
const RENEWAL_TASK_NAME: &str = "certificate-renewal";

/// 磁盘检查后剩下的两种动作（有效证书已在检查处短路返回）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CertificateAction {
    /// 不存在，签发
    Issue,
    /// 接近过期，续期
    Renew,
}

/// 证书管理器
pub struct CertificateManager {
    settings: Settings,
    executor: Arc<dyn CommandExecutor>,
}

impl CertificateManager {
    pub fn new(settings: Settings, executor: Arc<dyn CommandExecutor>) -> Self {
        Self { settings, executor }
    }

    /// 确保域名持有有效证书，返回证书束
    ///
    /// 剩余有效期超过阈值时不联系证书机构。
    pub async fn ensure_certificate(
        &self,
        request: &ProvisionRequest,
    ) -> Result<CertificateBundle, ProvisionError> {
        let domain = &request.full_domain;
        let live_dir = self.settings.live_cert_dir(domain);
        let fullchain = live_dir.join("fullchain.pem");
        let private_key = live_dir.join("privkey.pem");

        let action = if fullchain.exists() && private_key.exists() {
            let not_after = self.read_not_after(&fullchain).await?;
            let days_left = (not_after - Utc::now()).num_days();
            if days_left > RENEW_THRESHOLD_DAYS {
                info!(domain, days_left, "Certificate still valid, skipping issuance");
                return Ok(CertificateBundle {
                    fullchain_path: fullchain,
                    private_key_path: private_key,
                    not_after,
                });
            }
            info!(domain, days_left, "Certificate near expiry");
            CertificateAction::Renew
        } else {
            CertificateAction::Issue
        };

        self.write_credentials(&request.api_token).await?;

        match action {
            CertificateAction::Issue => {
                info!(domain, "Issuing certificate (DNS-01, wildcard + apex)");
                self.run_certbot(&self.issue_args(domain)).await?;
            }
            CertificateAction::Renew => {
                info!(domain, "Renewing certificate");
                self.run_certbot(&renew_args(domain)).await?;
            }
        }

        if !fullchain.exists() || !private_key.exists() {
            return Err(ProvisionError::external_api(
                "certbot",
                format!(
                    "completed without producing bundle at {}",
                    live_dir.display()
                ),
            ));
        }

        let not_after = self.read_not_after(&fullchain).await?;
        info!(domain, %not_after, "Certificate bundle ready");
        Ok(CertificateBundle {
            fullchain_path: fullchain,
            private_key_path: private_key,
            not_after,
        })
    }

    /// 注册后台续期任务（幂等）
    ///
    /// 任务周期性执行 certbot renew；证书实际换新后尽力重启服务栈，
    /// 重启失败只记日志，不影响续期本身。
    pub async fn schedule_renewal(
        &self,
        registry: &TaskRegistry,
        deployer: Arc<ServiceDeployer>,
        domain: &str,
    ) -> bool {
        let executor = self.executor.clone();
        let fullchain = self.settings.live_cert_dir(domain).join("fullchain.pem");
        let domain = domain.to_string();
        let period = Duration::from_secs(self.settings.renewal_check_interval_secs);

        registry
            .register(RENEWAL_TASK_NAME, period, move || {
                let executor = executor.clone();
                let deployer = deployer.clone();
                let fullchain = fullchain.clone();
                let domain = domain.clone();
                async move {
                    renewal_tick(executor, deployer, &fullchain, &domain).await;
                }
            })
            .await
    }

    /// 写入 DNS 提供商凭据文件（0600）
    async fn write_credentials(&self, token: &str) -> Result<(), ProvisionError> {
        let path = &self.settings.dns_credentials_path;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, format!("dns_cloudflare_api_token = {}\n", token)).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
        }

        Ok(())
    }

    /// 通过 openssl 读取证书过期时间
    async fn read_not_after(&self, fullchain: &Path) -> Result<DateTime<Utc>, ProvisionError> {
        let path = fullchain.to_string_lossy().into_owned();
        let output = self
            .executor
            .execute("openssl", &["x509", "-enddate", "-noout", "-in", &path])
            .await?;

        if !output.success {
            return Err(ProvisionError::external_api(
                "openssl",
                format!("failed to read '{}': {}", path, output.stderr),
            ));
        }

        parse_not_after(&output.stdout)
            .ok_or_else(|| {
                ProvisionError::external_api(
                    "openssl",
                    format!("unexpected enddate output: {}", output.stdout),
                )
            })
    }

    fn issue_args(&self, domain: &str) -> Vec<String> {
        let wildcard = format!("*.{}", domain);
        vec![
            "certonly".to_string(),
            "--dns-cloudflare".to_string(),
            "--dns-cloudflare-credentials".to_string(),
            self.settings.dns_credentials_path.to_string_lossy().into_owned(),
            "--dns-cloudflare-propagation-seconds".to_string(),
            self.settings.challenge_propagation_secs.to_string(),
            "-d".to_string(),
            domain.to_string(),
            "-d".to_string(),
            wildcard,
            "--non-interactive".to_string(),
            "--agree-tos".to_string(),
            "--register-unsafely-without-email".to_string(),
        ]
    }

    async fn run_certbot(&self, args: &[String]) -> Result<(), ProvisionError> {
        let argv: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.executor.execute("certbot", &argv).await?;

        if !output.success {
            return Err(ProvisionError::external_api(
                "certbot",
                format!("{}{}", output.stdout, output.stderr),
            ));
        }
        Ok(())
    }
}

fn renew_args(domain: &str) -> Vec<String> {
    vec![
        "renew".to_string(),
        "--cert-name".to_string(),
        domain.to_string(),
        "--non-interactive".to_string(),
    ]
}

/// 后台续期的一次检查
///
/// 过期时间前后对比判断是否真的换了新证书，换新才触发重启。
async fn renewal_tick(
    executor: Arc<dyn CommandExecutor>,
    deployer: Arc<ServiceDeployer>,
    fullchain: &Path,
    domain: &str,
) {
    let before = read_expiry(&executor, fullchain).await;

    let args = renew_args(domain);
    let argv: Vec<&str> = args.iter().map(String::as_str).collect();
    match executor.execute("certbot", &argv).await {
        Ok(output) if output.success => {}
        Ok(output) => {
            warn!(domain, stderr = %output.stderr, "Scheduled renewal failed");
            return;
        }
        Err(e) => {
            warn!(domain, error = %e, "Scheduled renewal could not run");
            return;
        }
    }

    let after = read_expiry(&executor, fullchain).await;
    let renewed = matches!((before, after), (Some(b), Some(a)) if a > b);
    if !renewed {
        return;
    }

    info!(domain, "Certificate renewed, restarting service stack");
    // 尽力而为：重启失败不影响续期结果
    if let Err(e) = deployer.start().await {
        warn!(domain, error = %e, "Post-renewal restart failed");
    }
}

async fn read_expiry(
    executor: &Arc<dyn CommandExecutor>,
    fullchain: &Path,
) -> Option<DateTime<Utc>> {
    let path = fullchain.to_string_lossy().into_owned();
    let output = executor
        .execute("openssl", &["x509", "-enddate", "-noout", "-in", &path])
        .await
        .ok()?;
    if !output.success {
        return None;
    }
    parse_not_after(&output.stdout)
}

/// 解析 `notAfter=May 30 12:00:00 2026 GMT` 形式的输出
fn parse_not_after(stdout: &str) -> Option<DateTime<Utc>> {
    let raw = stdout.trim().strip_prefix("notAfter=")?.trim();
    let raw = raw.strip_suffix("GMT").unwrap_or(raw).trim_end();
    NaiveDateTime::parse_from_str(raw, "%b %e %H:%M:%S %Y")
        .ok()
        .map(|dt| dt.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;

    use crate::infra::command::{CommandError, CommandOutput};

    /// 假执行器：记录调用，按程序名返回预设输出
    struct FakeExecutor {
        calls: Mutex<Vec<Vec<String>>>,
        /// openssl 依次返回的过期时间（耗尽后重复最后一个）
        enddates: Mutex<Vec<DateTime<Utc>>>,
        /// certbot 调用时创建的证书文件（模拟签发产物）
        materialize_on_certbot: Option<PathBuf>,
        certbot_fails: bool,
        docker_fails: bool,
    }

    impl FakeExecutor {
        fn new(enddates: Vec<DateTime<Utc>>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                enddates: Mutex::new(enddates),
                materialize_on_certbot: None,
                certbot_fails: false,
                docker_fails: false,
            }
        }

        fn certbot_calls(&self) -> Vec<Vec<String>> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c[0] == "certbot")
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl CommandExecutor for FakeExecutor {
        async fn execute(
            &self,
            program: &str,
            args: &[&str],
        ) -> Result<CommandOutput, CommandError> {
            let mut call = vec![program.to_string()];
            call.extend(args.iter().map(|s| s.to_string()));
            self.calls.lock().unwrap().push(call);

            match program {
                "openssl" => {
                    let mut dates = self.enddates.lock().unwrap();
                    let date = if dates.len() > 1 { dates.remove(0) } else { dates[0] };
                    Ok(CommandOutput {
                        success: true,
                        stdout: format!("notAfter={}\n", date.format("%b %e %H:%M:%S %Y GMT")),
                        stderr: String::new(),
                    })
                }
                "certbot" => {
                    if self.certbot_fails {
                        return Ok(CommandOutput {
                            success: false,
                            stdout: String::new(),
                            stderr: "An unexpected error occurred".to_string(),
                        });
                    }
                    if let Some(dir) = &self.materialize_on_certbot {
                        std::fs::create_dir_all(dir).unwrap();
                        std::fs::write(dir.join("fullchain.pem"), "cert").unwrap();
                        std::fs::write(dir.join("privkey.pem"), "key").unwrap();
                    }
                    Ok(CommandOutput {
                        success: true,
                        stdout: String::new(),
                        stderr: String::new(),
                    })
                }
                "docker" | "docker-compose" => Ok(CommandOutput {
                    success: !self.docker_fails,
                    stdout: String::new(),
                    stderr: String::new(),
                }),
                _ => Ok(CommandOutput {
                    success: true,
                    stdout: String::new(),
                    stderr: String::new(),
                }),
            }
        }

        async fn execute_in(
            &self,
            program: &str,
            args: &[&str],
            _work_dir: &Path,
        ) -> Result<CommandOutput, CommandError> {
            self.execute(program, args).await
        }
    }

    fn settings(dir: &TempDir) -> Settings {
        let mut settings = Settings::from_env();
        settings.letsencrypt_live_dir = dir.path().join("live");
        settings.dns_credentials_path = dir.path().join("secrets/cloudflare.ini");
        settings
    }

    fn request() -> ProvisionRequest {
        ProvisionRequest::new("node-01", "0123456789abc", "xjp.cloud").unwrap()
    }

    fn write_bundle(settings: &Settings, domain: &str) {
        let live = settings.live_cert_dir(domain);
        std::fs::create_dir_all(&live).unwrap();
        std::fs::write(live.join("fullchain.pem"), "cert").unwrap();
        std::fs::write(live.join("privkey.pem"), "key").unwrap();
    }

    #[test]
    fn test_parse_not_after() {
        let parsed = parse_not_after("notAfter=May 30 12:00:00 2026 GMT\n").unwrap();
        assert_eq!(parsed.format("%Y-%m-%d %H:%M").to_string(), "2026-05-30 12:00");

        // 个位日期带双空格
        assert!(parse_not_after("notAfter=May  3 08:01:02 2027 GMT").is_some());
        assert!(parse_not_after("garbage").is_none());
    }

    #[tokio::test]
    async fn test_valid_bundle_short_circuits() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let request = request();
        write_bundle(&settings, &request.full_domain);

        let executor = Arc::new(FakeExecutor::new(vec![Utc::now() + ChronoDuration::days(45)]));
        let manager = CertificateManager::new(settings, executor.clone());

        let bundle = manager.ensure_certificate(&request).await.unwrap();

        assert!(executor.certbot_calls().is_empty());
        assert!(bundle.days_until_expiry(Utc::now()) > 40);
        // 未联系 CA，也就不应写凭据文件
        assert!(!manager.settings.dns_credentials_path.exists());
    }

    #[tokio::test]
    async fn test_near_expiry_triggers_renewal() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let request = request();
        write_bundle(&settings, &request.full_domain);

        // 第一次读取：10 天后过期；续期后读取：90 天
        let executor = Arc::new(FakeExecutor::new(vec![
            Utc::now() + ChronoDuration::days(10),
            Utc::now() + ChronoDuration::days(90),
        ]));
        let manager = CertificateManager::new(settings, executor.clone());

        let bundle = manager.ensure_certificate(&request).await.unwrap();

        let certbot = executor.certbot_calls();
        assert_eq!(certbot.len(), 1);
        assert_eq!(certbot[0][1], "renew");
        assert!(bundle.not_after > Utc::now());
    }

    #[tokio::test]
    async fn test_absent_bundle_is_issued() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let request = request();

        let mut executor = FakeExecutor::new(vec![Utc::now() + ChronoDuration::days(89)]);
        executor.materialize_on_certbot = Some(settings.live_cert_dir(&request.full_domain));
        let executor = Arc::new(executor);
        let manager = CertificateManager::new(settings, executor.clone());

        let bundle = manager.ensure_certificate(&request).await.unwrap();

        let certbot = executor.certbot_calls();
        assert_eq!(certbot.len(), 1);
        assert_eq!(certbot[0][1], "certonly");
        assert!(certbot[0].contains(&"node-01.xjp.cloud".to_string()));
        assert!(certbot[0].contains(&"*.node-01.xjp.cloud".to_string()));
        assert!(bundle.fullchain_path.exists());

        // 凭据文件应已写入且包含令牌
        let creds =
            std::fs::read_to_string(&manager.settings.dns_credentials_path).unwrap();
        assert!(creds.contains("0123456789abc"));
    }

    #[tokio::test]
    async fn test_renewal_tick_survives_failed_restart() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let request = request();
        write_bundle(&settings, &request.full_domain);

        // 续期前 10 天、续期后 90 天：证书换新，触发重启；重启失败只记日志
        let mut executor = FakeExecutor::new(vec![
            Utc::now() + ChronoDuration::days(10),
            Utc::now() + ChronoDuration::days(90),
        ]);
        executor.docker_fails = true;
        let executor = Arc::new(executor);

        let deployer = Arc::new(ServiceDeployer::new(settings.clone(), executor.clone()));
        let fullchain = settings
            .live_cert_dir(&request.full_domain)
            .join("fullchain.pem");

        renewal_tick(
            executor.clone(),
            deployer,
            &fullchain,
            &request.full_domain,
        )
        .await;

        assert_eq!(executor.certbot_calls().len(), 1);
        // 重启尝试过（docker 探测失败），但 tick 正常结束
        assert!(executor
            .calls
            .lock()
            .unwrap()
            .iter()
            .any(|c| c[0] == "docker"));
    }

    #[tokio::test]
    async fn test_issuance_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let request = request();

        let mut executor = FakeExecutor::new(vec![Utc::now()]);
        executor.certbot_fails = true;
        let manager = CertificateManager::new(settings, Arc::new(executor));

        let err = manager.ensure_certificate(&request).await.unwrap_err();
        assert!(matches!(err, ProvisionError::ExternalApi { service: "certbot", .. }));
    }
}
