//! 服务配置模板渲染
//!
//! 纯文本替换：模板中的占位符全部替换为解析出的值。
//! 先写临时文件再原子改名，渲染失败不会留下半成品输出。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::info;

use crate::error::ProvisionError;

/// 配置模板渲染器
pub struct ConfigTemplater;

impl ConfigTemplater {
    /// 渲染模板到目标路径，返回输出路径
    ///
    /// 模板缺失是前置条件错误；写入失败时清理临时文件。
    pub async fn render(
        template_path: &Path,
        substitutions: &HashMap<String, String>,
        output_path: &Path,
    ) -> Result<PathBuf, ProvisionError> {
        let template = match fs::read_to_string(template_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProvisionError::PreconditionMissing(format!(
                    "template not found: {}",
                    template_path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let mut rendered = template;
        for (placeholder, value) in substitutions {
            rendered = rendered.replace(placeholder.as_str(), value);
        }

        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // 写临时文件后改名，避免写入中途失败留下部分输出
        let tmp_path = output_path.with_extension("tmp");
        if let Err(e) = fs::write(&tmp_path, &rendered).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        fs::rename(&tmp_path, output_path).await?;

        info!(
            template = %template_path.display(),
            output = %output_path.display(),
            "Rendered service config"
        );
        Ok(output_path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::constants::DOMAIN_PLACEHOLDER;
    use tempfile::tempdir;

    fn domain_substitutions(domain: &str) -> HashMap<String, String> {
        HashMap::from([(DOMAIN_PLACEHOLDER.to_string(), domain.to_string())])
    }

    #[tokio::test]
    async fn test_replaces_every_placeholder() {
        let dir = tempdir().unwrap();
        let template_path = dir.path().join("xray.json.template");
        let output_path = dir.path().join("xray/config.json");
        tokio::fs::write(
            &template_path,
            format!(
                "{{\"host\":\"{p}\",\"sni\":\"{p}\",\"ws_host\":\"{p}\"}}",
                p = DOMAIN_PLACEHOLDER
            ),
        )
        .await
        .unwrap();

        let rendered = ConfigTemplater::render(
            &template_path,
            &domain_substitutions("main.example.org"),
            &output_path,
        )
        .await
        .unwrap();

        let content = tokio::fs::read_to_string(&rendered).await.unwrap();
        assert_eq!(content.matches("main.example.org").count(), 3);
        assert_eq!(content.matches(DOMAIN_PLACEHOLDER).count(), 0);
    }

    #[tokio::test]
    async fn test_missing_template_is_precondition_error() {
        let dir = tempdir().unwrap();
        let err = ConfigTemplater::render(
            &dir.path().join("no-such.template"),
            &domain_substitutions("main.example.org"),
            &dir.path().join("out.json"),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ProvisionError::PreconditionMissing(_)));
    }

    #[tokio::test]
    async fn test_failed_render_leaves_no_output() {
        let dir = tempdir().unwrap();
        let template_path = dir.path().join("a.template");
        tokio::fs::write(&template_path, "x").await.unwrap();

        // 输出路径的父“目录”是一个普通文件，写入必然失败
        let blocker = dir.path().join("blocker");
        tokio::fs::write(&blocker, "").await.unwrap();
        let output_path = blocker.join("out.json");

        let result = ConfigTemplater::render(
            &template_path,
            &domain_substitutions("main.example.org"),
            &output_path,
        )
        .await;

        assert!(result.is_err());
        assert!(!output_path.exists());
    }
}
