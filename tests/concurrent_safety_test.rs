//! 并发安全性测试
//!
//! 验证ID生成、追踪上下文解析和任务级上下文在高并发场景下的线程安全性

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::time::timeout;
use trace_lambda::{current_tracer, with_tracer, SpanId, TraceConfig, TraceId, TraceResolver};

/// 测试并发ID生成的唯一性
#[tokio::test]
async fn test_concurrent_id_generation_uniqueness() {
    const THREAD_COUNT: usize = 10;
    const IDS_PER_THREAD: usize = 1000;

    let ids = Arc::new(Mutex::new(HashSet::new()));
    let mut handles = vec![];

    for _ in 0..THREAD_COUNT {
        let ids_clone = Arc::clone(&ids);
        let handle = tokio::spawn(async move {
            let local_ids: Vec<String> = (0..IDS_PER_THREAD)
                .map(|_| TraceId::new().as_str().to_string())
                .collect();

            // 将本地生成的ID添加到全局集合
            let mut global_ids = ids_clone.lock().unwrap();
            for id in local_ids {
                assert!(global_ids.insert(id), "发现重复的trace_id");
            }
        });
        handles.push(handle);
    }

    for handle in handles {
        handle.await.unwrap();
    }

    let final_ids = ids.lock().unwrap();
    assert_eq!(final_ids.len(), THREAD_COUNT * IDS_PER_THREAD);
}

/// 测试多个操作系统线程同时生成ID
#[test]
fn test_multi_thread_generation() {
    let handles: Vec<_> = (0..8)
        .map(|_| {
            thread::spawn(|| {
                (0..500)
                    .map(|_| (TraceId::new(), SpanId::new()))
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut trace_ids = HashSet::new();
    for handle in handles {
        for (trace_id, span_id) in handle.join().unwrap() {
            assert_eq!(span_id.as_str().len(), 16);
            assert!(trace_ids.insert(trace_id), "发现重复的trace_id");
        }
    }
    assert_eq!(trace_ids.len(), 8 * 500);
}

/// 测试并发上下文管理的安全性
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_context_management() {
    const CONCURRENT_TASKS: usize = 100;

    let resolver = TraceResolver::new(TraceConfig::new(false));
    let mut handles = vec![];

    for i in 0..CONCURRENT_TASKS {
        let tracer = resolver.random();
        let handle = tokio::spawn(async move {
            let expected = tracer.span_id();
            with_tracer(tracer, async move {
                assert_eq!(current_tracer().unwrap().span_id(), expected);

                // 模拟一些异步工作，让任务在线程间迁移
                tokio::time::sleep(Duration::from_millis((i % 5) as u64)).await;
                tokio::task::yield_now().await;

                assert_eq!(current_tracer().unwrap().span_id(), expected);
                expected
            })
            .await
        });
        handles.push(handle);
    }

    let mut seen = HashSet::new();
    for handle in handles {
        let span_id = timeout(Duration::from_secs(5), handle)
            .await
            .expect("任务超时")
            .unwrap();
        assert!(seen.insert(span_id));
    }
    assert!(current_tracer().is_none());
}

/// 测试共享解析器在多个任务中解析同一请求头
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shared_resolver() {
    let resolver = Arc::new(TraceResolver::new(TraceConfig::new(false)));
    let mut headers = http::HeaderMap::new();
    headers.insert(
        "traceparent",
        "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01"
            .parse()
            .unwrap(),
    );
    let headers = Arc::new(headers);

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let resolver = Arc::clone(&resolver);
            let headers = Arc::clone(&headers);
            tokio::spawn(async move {
                let tracer = resolver.from_headers(&headers).unwrap();
                tracer.child("/fan-out").span_id()
            })
        })
        .collect();

    let mut span_ids = HashSet::new();
    for handle in handles {
        let span_id = handle.await.unwrap();
        assert_ne!(span_id, "b7ad6b7169203331");
        assert!(span_ids.insert(span_id), "子 span id 不应重复");
    }
}

#[cfg(feature = "axum")]
mod layer_concurrency {
    use super::*;
    use axum::{body::Body, http::Request, routing::get, Router};
    use tower::ServiceExt;
    use trace_lambda::{Tracer, TracerLayer};

    async fn handler(tracer: Tracer) -> String {
        tokio::time::sleep(Duration::from_millis(fastrand::u64(0..3))).await;
        // 处理函数内的任务级上下文应与提取器一致
        let current = current_tracer().expect("应处于追踪上下文中");
        assert_eq!(current.span_id(), tracer.span_id());
        tracer.trace_id()
    }

    /// 测试并发请求之间的上下文隔离
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_are_isolated() {
        let app = Router::new()
            .route("/", get(handler))
            .layer(TracerLayer::with_resolver(TraceResolver::default()));

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let app = app.clone();
                let trace_id = TraceId::new();
                tokio::spawn(async move {
                    let request = Request::builder()
                        .uri("/")
                        .header(
                            "traceparent",
                            format!("00-{}-b7ad6b7169203331-01", trace_id.as_str()),
                        )
                        .body(Body::empty())
                        .unwrap();
                    let response = app.oneshot(request).await.unwrap();
                    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
                        .await
                        .unwrap();
                    assert_eq!(&body[..], trace_id.as_str().as_bytes());
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
    }
}
