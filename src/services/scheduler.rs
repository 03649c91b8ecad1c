//! 进程级周期任务注册表
//!
//! 证书续期等后台任务以名字注册，重复注册同名任务会被跳过，
//! 因此一个进程内多次开通不会产生重复的续期任务。
//! 任务独立于开通流程运行，仅通过磁盘上的证书目录与其交互。

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

/// 周期任务注册表
#[derive(Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册周期任务（幂等）
    ///
    /// 同名任务已在运行时跳过注册并返回 `false`。
    /// 首次触发在一个周期之后，不会立即执行。
    pub async fn register<F, Fut>(&self, name: &str, period: Duration, tick: F) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().await;

        if let Some(handle) = tasks.get(name) {
            if !handle.is_finished() {
                info!(task = name, "Periodic task already registered, skipping");
                return false;
            }
        }

        info!(task = name, period_secs = period.as_secs(), "Registering periodic task");
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // interval 的第一次 tick 立即完成，先消费掉
            interval.tick().await;
            loop {
                interval.tick().await;
                tick().await;
            }
        });

        tasks.insert(name.to_string(), handle);
        true
    }

    /// 指定任务是否已注册且在运行
    pub async fn is_registered(&self, name: &str) -> bool {
        self.tasks
            .lock()
            .await
            .get(name)
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// 当前注册的任务数
    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }
}

impl Drop for TaskRegistry {
    fn drop(&mut self) {
        // 注册表销毁时停止其任务，避免孤儿循环
        if let Ok(tasks) = self.tasks.try_lock() {
            for handle in tasks.values() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let registry = TaskRegistry::new();

        let first = registry
            .register("renewal", Duration::from_secs(3600), || async {})
            .await;
        let second = registry
            .register("renewal", Duration::from_secs(3600), || async {})
            .await;

        assert!(first);
        assert!(!second);
        assert_eq!(registry.len().await, 1);
        assert!(registry.is_registered("renewal").await);
    }

    #[tokio::test]
    async fn test_task_ticks_periodically() {
        let registry = TaskRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        let tick_count = count.clone();
        registry
            .register("ticker", Duration::from_millis(10), move || {
                let tick_count = tick_count.clone();
                async move {
                    tick_count.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(count.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_unregistered_name() {
        let registry = TaskRegistry::new();
        assert!(!registry.is_registered("missing").await);
    }
}
