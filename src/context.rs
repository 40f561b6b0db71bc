//! 追踪上下文的任务级存储
//!
//! 使用 `tokio::task_local` 提供与Web框架无关的 [`Tracer`] 上下文管理。

use crate::trace::Tracer;
use tokio::task_local;

// 使用tokio的task_local来存储当前请求的追踪上下文
task_local! {
    static CURRENT_TRACER: Tracer;
}

/// 获取当前追踪上下文
///
/// 不在 [`with_tracer`] 作用域内时返回 `None`。
pub fn current_tracer() -> Option<Tracer> {
    CURRENT_TRACER.try_with(|tracer| tracer.clone()).ok()
}

/// 在指定的追踪上下文中执行异步操作
///
/// # 参数
/// * `tracer` - 要设置的追踪上下文
/// * `future` - 要执行的异步操作
pub async fn with_tracer<F, T>(tracer: Tracer, future: F) -> T
where
    F: std::future::Future<Output = T>,
{
    CURRENT_TRACER.scope(tracer, future).await
}
