//! OpenTelemetry SDK 追踪上下文

use super::b3::{B3Encoding, B3Propagator};
use http::HeaderMap;
use opentelemetry::propagation::{TextMapCompositePropagator, TextMapPropagator};
use opentelemetry::trace::{
    Span as _, SpanContext, TraceContextExt, TraceFlags, TraceState, Tracer as _,
};
use opentelemetry::{global, Context};
use opentelemetry_http::{HeaderExtractor, HeaderInjector};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{IdGenerator, RandomIdGenerator};
use std::fmt;
use std::sync::LazyLock;

/// 从全局 TracerProvider 获取 tracer 时使用的名称
pub(crate) const TRACER_NAME: &str = "trace_lambda";

const RANDOM_SPAN_NAME: &str = "random";

static PROPAGATOR: LazyLock<TextMapCompositePropagator> = LazyLock::new(propagator);

/// 创建复合传播器：W3C TraceContext + B3 单头部 + B3 多头部
///
/// 提取时三种格式都会尝试，注入时三种格式都会写入。
pub fn propagator() -> TextMapCompositePropagator {
    TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(B3Propagator::new(B3Encoding::SingleHeader)),
        Box::new(B3Propagator::new(B3Encoding::MultipleHeader)),
    ])
}

#[derive(Debug, Clone)]
pub(crate) struct OtelTrace {
    cx: Context,
}

impl OtelTrace {
    /// 以 `parent` 为起点提取上游上下文；没有有效 span 上下文时视为不存在
    pub(crate) fn from_headers_with_context(parent: &Context, headers: &HeaderMap) -> Option<Self> {
        let cx = PROPAGATOR.extract_with_context(parent, &HeaderExtractor(headers));
        if !cx.span().span_context().is_valid() {
            return None;
        }
        Some(Self { cx })
    }

    /// 随机创建
    ///
    /// 安装了 SDK 时启动一个根 span（由采样器决定是否采样）；
    /// 否则退回到 SDK 的随机 ID 生成器。
    pub(crate) fn random() -> Self {
        let span = global::tracer(TRACER_NAME).start_with_context(RANDOM_SPAN_NAME, &Context::new());
        if span.span_context().is_valid() {
            return Self {
                cx: Context::new().with_span(span),
            };
        }

        let ids = RandomIdGenerator::default();
        let span_context = SpanContext::new(
            ids.new_trace_id(),
            ids.new_span_id(),
            TraceFlags::default(),
            false,
            TraceState::default(),
        );
        Self {
            cx: Context::new().with_remote_span_context(span_context),
        }
    }

    /// 在当前上下文下启动子 span
    pub(crate) fn child(&self, name: &str) -> Self {
        let parent = self.span_context();
        let span = global::tracer(TRACER_NAME).start_with_context(name.to_string(), &self.cx);
        let started = span.span_context().is_valid()
            && span.span_context().span_id() != parent.span_id();
        if started {
            return Self {
                cx: self.cx.with_span(span),
            };
        }

        // 未安装 SDK 时 noop tracer 只会复用父 span，这里自行派生
        let span_context = SpanContext::new(
            parent.trace_id(),
            RandomIdGenerator::default().new_span_id(),
            parent.trace_flags(),
            false,
            parent.trace_state().clone(),
        );
        Self {
            cx: self.cx.with_remote_span_context(span_context),
        }
    }

    pub(crate) fn set_header(&self, headers: &mut HeaderMap) {
        PROPAGATOR.inject_context(&self.cx, &mut HeaderInjector(headers));
    }

    pub(crate) fn span_context(&self) -> SpanContext {
        self.cx.span().span_context().clone()
    }

    pub(crate) fn context(&self) -> &Context {
        &self.cx
    }
}

impl fmt::Display for OtelTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let span_context = self.span_context();
        write!(
            f,
            "trace_id={} span_id={}",
            span_context.trace_id(),
            span_context.span_id()
        )
    }
}
