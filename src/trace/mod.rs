//! 追踪上下文解析
//!
//! 支持三种编码：W3C traceparent、B3（单头部/多头部）以及 OpenTelemetry SDK。
//! 使用哪一种由 [`TraceConfig::otel_enabled`] 在启动时决定：
//!
//! - 启用 OpenTelemetry 时，完全交给 SDK 的复合传播器（W3C + B3）提取；
//! - 否则先尝试 B3，再尝试 traceparent。
//!
//! 任何格式错误的头部都视为不存在，不会产生错误。

mod b3;
mod otel;
mod traceparent;

pub use b3::{
    B3Encoding, B3Propagator, B3_FLAGS_HEADER, B3_PARENT_SPAN_ID_HEADER, B3_SAMPLED_HEADER,
    B3_SINGLE_HEADER, B3_SPAN_ID_HEADER, B3_TRACE_ID_HEADER,
};
pub use otel::propagator;
pub use traceparent::{TRACEPARENT_HEADER, TRACESTATE_HEADER};

pub(crate) use otel::TRACER_NAME;

use b3::B3;
use http::{HeaderMap, Request};
use opentelemetry::Context;
use otel::OtelTrace;
use std::fmt;
use traceparent::TraceParent;

/// OTLP 导出端点环境变量
pub const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
/// OTLP 追踪导出端点环境变量
pub const OTLP_TRACES_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_TRACES_ENDPOINT";

/// 追踪解析配置
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceConfig {
    /// 是否启用 OpenTelemetry SDK 集成（默认关闭）
    pub otel_enabled: bool,
}

impl TraceConfig {
    pub fn new(otel_enabled: bool) -> Self {
        Self { otel_enabled }
    }

    /// 从环境变量读取配置
    ///
    /// 设置了非空的 `OTEL_EXPORTER_OTLP_ENDPOINT` 或
    /// `OTEL_EXPORTER_OTLP_TRACES_ENDPOINT` 时启用 OpenTelemetry。
    pub fn from_env() -> Self {
        let is_set = |name: &str| std::env::var(name).is_ok_and(|v| !v.is_empty());
        Self {
            otel_enabled: is_set(OTLP_ENDPOINT_ENV) || is_set(OTLP_TRACES_ENDPOINT_ENV),
        }
    }
}

/// 追踪上下文的编码格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceFormat {
    TraceParent,
    B3,
    OpenTelemetry,
}

#[derive(Debug, Clone)]
enum TraceData {
    TraceParent(TraceParent),
    B3(B3),
    Otel(OtelTrace),
}

/// 一个分布式追踪上下文
///
/// 创建后不可变；[`Tracer::child`] 和 [`Tracer::span`] 都返回新的值。
/// 上下文始终保持创建时的编码格式，与之后的全局配置无关。
#[derive(Debug, Clone)]
pub struct Tracer {
    data: TraceData,
    received: bool,
}

impl Tracer {
    /// 派生子 span 并写入请求头
    ///
    /// 返回更新后的请求和用于日志的追踪字符串，不改变 `self`。
    pub fn span<B>(&self, mut req: Request<B>) -> (Request<B>, String) {
        let child = self.child(req.uri().path());
        child.set_header(req.headers_mut());
        if let Some(cx) = child.otel_context() {
            req.extensions_mut().insert(cx.clone());
        }
        let log = child.to_string();
        (req, log)
    }

    /// 派生子追踪上下文：trace id 不变，生成新的 span id
    pub fn child(&self, name: &str) -> Tracer {
        let data = match &self.data {
            TraceData::TraceParent(tp) => TraceData::TraceParent(tp.child()),
            TraceData::B3(b3) => TraceData::B3(b3.child()),
            TraceData::Otel(otel) => TraceData::Otel(otel.child(name)),
        };
        Tracer {
            data,
            received: self.received,
        }
    }

    /// 按自身的编码格式写入头部
    pub fn set_header(&self, headers: &mut HeaderMap) {
        match &self.data {
            TraceData::TraceParent(tp) => tp.set_header(headers),
            TraceData::B3(b3) => b3.set_header(headers),
            TraceData::Otel(otel) => otel.set_header(headers),
        }
    }

    /// 是否从请求中解析得到（否则为随机生成）
    pub fn is_received(&self) -> bool {
        self.received
    }

    pub fn trace_id(&self) -> String {
        match &self.data {
            TraceData::TraceParent(tp) => tp.trace_id().to_string(),
            TraceData::B3(b3) => b3.trace_id().to_string(),
            TraceData::Otel(otel) => otel.span_context().trace_id().to_string(),
        }
    }

    pub fn span_id(&self) -> String {
        match &self.data {
            TraceData::TraceParent(tp) => tp.span_id().to_string(),
            TraceData::B3(b3) => b3.span_id().to_string(),
            TraceData::Otel(otel) => otel.span_context().span_id().to_string(),
        }
    }

    pub fn format(&self) -> TraceFormat {
        match &self.data {
            TraceData::TraceParent(_) => TraceFormat::TraceParent,
            TraceData::B3(_) => TraceFormat::B3,
            TraceData::Otel(_) => TraceFormat::OpenTelemetry,
        }
    }

    /// OpenTelemetry 上下文，仅 OpenTelemetry 格式有
    pub fn otel_context(&self) -> Option<&Context> {
        match &self.data {
            TraceData::Otel(otel) => Some(otel.context()),
            _ => None,
        }
    }
}

impl fmt::Display for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            TraceData::TraceParent(tp) => fmt::Display::fmt(tp, f),
            TraceData::B3(b3) => fmt::Display::fmt(b3, f),
            TraceData::Otel(otel) => fmt::Display::fmt(otel, f),
        }
    }
}

/// 追踪上下文解析器
#[derive(Debug, Clone, Default)]
pub struct TraceResolver {
    config: TraceConfig,
}

impl TraceResolver {
    pub fn new(config: TraceConfig) -> Self {
        Self { config }
    }

    /// 使用 [`TraceConfig::from_env`] 创建
    pub fn from_env() -> Self {
        Self::new(TraceConfig::from_env())
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    /// 从请求中解析追踪上下文，未找到时返回 `None`
    pub fn from_request<B>(&self, req: &Request<B>) -> Option<Tracer> {
        self.from_headers(req.headers())
    }

    /// 从请求头中解析追踪上下文，未找到时返回 `None`
    pub fn from_headers(&self, headers: &HeaderMap) -> Option<Tracer> {
        self.resolve(&Context::new(), headers)
    }

    /// 与 [`TraceResolver::from_request`] 相同，但启用 OpenTelemetry 时以 `parent`
    /// 为起点提取：请求头没有追踪信息时采用 `parent` 中的有效 span。
    pub fn from_request_with_context<B>(&self, parent: &Context, req: &Request<B>) -> Option<Tracer> {
        self.resolve(parent, req.headers())
    }

    /// 从请求中解析追踪上下文，未找到时随机创建，永远不会返回空
    ///
    /// 注意：即使启用了 OpenTelemetry，也不会采用调用方的父上下文。
    pub fn from_request_or_random<B>(&self, req: &Request<B>) -> Tracer {
        self.from_headers_or_random(req.headers())
    }

    pub fn from_headers_or_random(&self, headers: &HeaderMap) -> Tracer {
        self.from_headers(headers).unwrap_or_else(|| self.random())
    }

    /// 随机创建追踪上下文：启用 OpenTelemetry 时使用 SDK，否则使用 B3
    pub fn random(&self) -> Tracer {
        let data = if self.config.otel_enabled {
            TraceData::Otel(OtelTrace::random())
        } else {
            TraceData::B3(B3::random())
        };
        Tracer {
            data,
            received: false,
        }
    }

    fn resolve(&self, parent: &Context, headers: &HeaderMap) -> Option<Tracer> {
        let data = if self.config.otel_enabled {
            OtelTrace::from_headers_with_context(parent, headers).map(TraceData::Otel)
        } else {
            B3::from_headers(headers)
                .map(TraceData::B3)
                .or_else(|| TraceParent::from_headers(headers).map(TraceData::TraceParent))
        };
        data.map(|data| Tracer {
            data,
            received: true,
        })
    }
}
