//! 瞬时故障重试机制
//!
//! 使用 `tokio-retry` 提供指数退避和 jitter 支持。只有 `is_transient()`
//! 为真的错误才会重试，Not Found 等确定性结果立即返回。

use crate::error::{AppError, Result};
use std::future::Future;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{info, warn};

/// 重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大重试次数（不含首次尝试）
    pub max_retries: usize,
    /// 基础延迟时间（毫秒）
    pub base_delay_ms: u64,
    /// 最大延迟时间（毫秒）
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

impl RetryPolicy {
    /// Delays between attempts: `base, 2*base, 4*base, ...` capped at
    /// `max_delay_ms`, each jittered.
    fn delays(&self) -> impl Iterator<Item = Duration> {
        // from_millis(2) yields 2, 4, 8, ... so halving the base keeps the first delay at `base`
        let factor = (self.base_delay_ms / 2).max(1);
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .map(jitter)
            .take(self.max_retries)
    }
}

/// 重试异步操作直到成功、遇到确定性错误或耗尽重试次数
///
/// # 参数
///
/// - `operation_name` - 操作名称（用于日志输出）
/// - `policy` - 重试策略
/// - `operation` - 每次尝试调用一次的闭包
///
/// # 示例
///
/// ```ignore
/// let reader = retry_transient("fetch_blob", &RetryPolicy::default(), || {
///     source.fetch(&key)
/// })
/// .await?;
/// ```
pub async fn retry_transient<T, F, Fut>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0usize;

    let result = RetryIf::spawn(
        policy.delays(),
        || {
            attempt += 1;
            if attempt > 1 {
                warn!(
                    operation = %operation_name,
                    attempt,
                    "Transient failure, retrying"
                );
            }
            operation()
        },
        |e: &AppError| e.is_transient(),
    )
    .await;

    if result.is_ok() && attempt > 1 {
        info!(
            operation = %operation_name,
            retries = attempt - 1,
            "Operation succeeded after retries"
        );
    }

    result
}
