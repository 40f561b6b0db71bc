//! Axum框架的追踪上下文中间件

use crate::context;
use crate::trace::{TraceResolver, Tracer};
use axum::{
    extract::{FromRequestParts, Request},
    http::request::Parts,
    response::Response,
};
use std::convert::Infallible;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::Instrument;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// 追踪中间件配置选项
#[derive(Clone, Debug)]
pub struct TracerLayerConfig {
    /// 是否启用 tracing span（默认启用）
    pub enable_span: bool,
}

impl Default for TracerLayerConfig {
    fn default() -> Self {
        Self { enable_span: true }
    }
}

/// 追踪中间件层
///
/// 对每个请求：解析请求头中的追踪上下文（没有则随机创建），以请求路径派生子 span，
/// 把子 span 写回请求头和请求扩展，并在任务级上下文中执行后续处理。
#[derive(Clone, Debug)]
pub struct TracerLayer {
    resolver: TraceResolver,
    config: TracerLayerConfig,
}

impl TracerLayer {
    /// 使用 [`TraceResolver::from_env`] 和默认配置创建
    pub fn new() -> Self {
        Self::with_resolver(TraceResolver::from_env())
    }

    /// 禁用 tracing span 的追踪层
    pub fn new_high_performance() -> Self {
        Self::new().config(TracerLayerConfig { enable_span: false })
    }

    /// 使用指定的解析器创建
    pub fn with_resolver(resolver: TraceResolver) -> Self {
        Self {
            resolver,
            config: TracerLayerConfig::default(),
        }
    }

    pub fn config(mut self, config: TracerLayerConfig) -> Self {
        self.config = config;
        self
    }
}

impl Default for TracerLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for TracerLayer {
    type Service = TracerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TracerService {
            inner,
            resolver: self.resolver.clone(),
            config: self.config.clone(),
        }
    }
}

/// 追踪上下文服务
#[derive(Clone, Debug)]
pub struct TracerService<S> {
    inner: S,
    resolver: TraceResolver,
    config: TracerLayerConfig,
}

impl<S> Service<Request> for TracerService<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let tracer = self.resolver.from_request_or_random(&req);
        let child = tracer.child(req.uri().path());
        tracing::debug!(trace = %child, received = tracer.is_received(), "resolved trace context");

        // 提取请求信息用于span（在req被移动之前）
        let method = req.method().clone();
        let uri = req.uri().clone();

        child.set_header(req.headers_mut());
        if let Some(cx) = child.otel_context() {
            req.extensions_mut().insert(cx.clone());
        }
        req.extensions_mut().insert(child.clone());

        let parent_cx = child.otel_context().cloned();
        let future = self.inner.call(req);
        let enable_span = self.config.enable_span;

        Box::pin(async move {
            if !enable_span {
                return context::with_tracer(child, future).await;
            }

            let span = tracing::info_span!(
                "request",
                trace_id = %child.trace_id(),
                span_id = %child.span_id(),
                method = %method,
                uri = %uri
            );
            if let Some(cx) = parent_cx {
                if let Err(err) = span.set_parent(cx) {
                    tracing::debug!(error = ?err, "failed to link request span to trace context");
                }
            }
            context::with_tracer(child, future).instrument(span).await
        })
    }
}

// -- Tracer Extractor --

/// Axum 提取器，用于在 handler 函数签名中直接获取 [`Tracer`]
///
/// 依次取自请求扩展、任务级上下文；都没有时（未挂载 [`TracerLayer`]）
/// 按默认配置从请求头解析或随机创建，因此永远不会失败。
///
/// # 示例
/// ```no_run
/// use axum::{routing::get, Router};
/// use trace_lambda::{Tracer, TracerLayer};
///
/// async fn my_handler(tracer: Tracer) -> String {
///     tracing::info!(trace_id = %tracer.trace_id(), "Handler started");
///     format!("Hello! Your trace ID is: {}", tracer.trace_id())
/// }
///
/// let app: Router = Router::new()
///     .route("/", get(my_handler))
///     .layer(TracerLayer::new());
/// ```
impl<S> FromRequestParts<S> for Tracer
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(tracer) = parts.extensions.get::<Tracer>() {
            return Ok(tracer.clone());
        }
        Ok(context::current_tracer()
            .unwrap_or_else(|| TraceResolver::default().from_headers_or_random(&parts.headers)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{
        TraceConfig, TraceFormat, B3_SINGLE_HEADER, B3_SPAN_ID_HEADER, B3_TRACE_ID_HEADER,
        TRACEPARENT_HEADER,
    };
    use axum::{
        body::Body,
        http::{HeaderMap, Request, StatusCode},
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    const TRACEPARENT: &str = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";

    // --- 提取器测试 ---
    #[tokio::test]
    async fn test_tracer_extractor_from_task_local() {
        let (mut parts, _body) = Request::builder().uri("/test").body(()).unwrap().into_parts();
        let expected = TraceResolver::default().random();
        let expected_span = expected.span_id();

        context::with_tracer(expected, async move {
            let extracted = Tracer::from_request_parts(&mut parts, &())
                .await
                .expect("Tracer extraction should never fail");
            assert_eq!(extracted.span_id(), expected_span);
        })
        .await;
    }

    #[tokio::test]
    async fn test_tracer_extractor_without_layer() {
        let (mut parts, _body) = Request::builder()
            .header(TRACEPARENT_HEADER, TRACEPARENT)
            .body(())
            .unwrap()
            .into_parts();
        let tracer = Tracer::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(tracer.format(), TraceFormat::TraceParent);
        assert_eq!(tracer.trace_id(), "0af7651916cd43dd8448eb211c80319c");

        let (mut parts, _body) = Request::builder().body(()).unwrap().into_parts();
        let tracer = Tracer::from_request_parts(&mut parts, &()).await.unwrap();
        assert!(!tracer.is_received());
    }

    // --- 中间件/服务测试 ---
    mod layer_behavior {
        use super::*;

        async fn handler(tracer: Tracer) -> String {
            format!("{} {}", tracer.trace_id(), tracer.span_id())
        }

        async fn echo_headers(headers: HeaderMap) -> String {
            let get = |name: &str| {
                headers
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string()
            };
            format!("{} {}", get(B3_TRACE_ID_HEADER), get(B3_SPAN_ID_HEADER))
        }

        /// 从转发后的请求头重新解析，应与扩展中的追踪上下文一致
        async fn reresolve(tracer: Tracer, headers: HeaderMap) -> String {
            let resolved = TraceResolver::new(TraceConfig::new(false))
                .from_headers(&headers)
                .map(|t| t.span_id())
                .unwrap_or_default();
            format!("{} {}", tracer.span_id(), resolved)
        }

        fn app() -> Router {
            Router::new()
                .route("/", get(handler))
                .route("/headers", get(echo_headers))
                .route("/reresolve", get(reresolve))
                .layer(TracerLayer::with_resolver(TraceResolver::new(TraceConfig::new(false))))
        }

        async fn body_string(response: Response) -> String {
            let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
            String::from_utf8(body.to_vec()).unwrap()
        }

        #[tokio::test]
        async fn test_incoming_trace_is_continued() {
            let request = Request::builder()
                .uri("/")
                .header(TRACEPARENT_HEADER, TRACEPARENT)
                .body(Body::empty())
                .unwrap();
            let response = app().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);

            let body = body_string(response).await;
            let (trace_id, span_id) = body.split_once(' ').unwrap();
            assert_eq!(trace_id, "0af7651916cd43dd8448eb211c80319c");
            assert_eq!(span_id.len(), 16);
            assert_ne!(span_id, "b7ad6b7169203331", "处理函数应看到派生的子 span");
        }

        #[tokio::test]
        async fn test_random_trace_when_absent() {
            let request = Request::builder().uri("/").body(Body::empty()).unwrap();
            let response = app().oneshot(request).await.unwrap();
            let body = body_string(response).await;
            let (trace_id, span_id) = body.split_once(' ').unwrap();
            assert_eq!(trace_id.len(), 32);
            assert_eq!(span_id.len(), 16);
        }

        #[tokio::test]
        async fn test_child_headers_written_to_request() {
            let request = Request::builder().uri("/headers").body(Body::empty()).unwrap();
            let response = app().oneshot(request).await.unwrap();
            let body = body_string(response).await;
            let (trace_id, span_id) = body.split_once(' ').unwrap();
            assert_eq!(trace_id.len(), 32);
            assert_eq!(span_id.len(), 16);
        }

        #[tokio::test]
        async fn test_b3_single_header_replaced_by_child() {
            let request = Request::builder()
                .uri("/reresolve")
                .header(
                    B3_SINGLE_HEADER,
                    "80f198ee56343ba864fe8b2a57d3eff7-e457b5a2e4d86bd1-1",
                )
                .body(Body::empty())
                .unwrap();
            let response = app().oneshot(request).await.unwrap();
            let body = body_string(response).await;
            let (extension_span, resolved_span) = body.split_once(' ').unwrap();
            assert_ne!(extension_span, "e457b5a2e4d86bd1");
            assert_eq!(resolved_span, extension_span, "请求头中不应残留父 span");
        }

        #[tokio::test]
        async fn test_high_performance_mode() {
            let app = Router::new()
                .route("/", get(handler))
                .layer(TracerLayer::new_high_performance());
            let request = Request::builder()
                .uri("/")
                .header(TRACEPARENT_HEADER, TRACEPARENT)
                .body(Body::empty())
                .unwrap();
            let response = app.oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(body_string(response)
                .await
                .starts_with("0af7651916cd43dd8448eb211c80319c "));
        }
    }
}
