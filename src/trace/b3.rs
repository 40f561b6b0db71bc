//! B3 编码（单头部 `b3` 与多头部 `X-B3-*`）
//!
//! 同时提供 [`B3Propagator`]，供 OpenTelemetry 复合传播器使用。

use crate::ids::{SpanId, TraceId};
use http::{HeaderMap, HeaderValue};
use opentelemetry::propagation::text_map_propagator::FieldIter;
use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::{self as otel, TraceContextExt};
use opentelemetry::Context;
use std::fmt;
use std::sync::LazyLock;

/// B3 单头部字段名
pub const B3_SINGLE_HEADER: &str = "b3";
/// B3 多头部：trace id
pub const B3_TRACE_ID_HEADER: &str = "x-b3-traceid";
/// B3 多头部：span id
pub const B3_SPAN_ID_HEADER: &str = "x-b3-spanid";
/// B3 多头部：父 span id
pub const B3_PARENT_SPAN_ID_HEADER: &str = "x-b3-parentspanid";
/// B3 多头部：采样标志
pub const B3_SAMPLED_HEADER: &str = "x-b3-sampled";
/// B3 多头部：调试标志
pub const B3_FLAGS_HEADER: &str = "x-b3-flags";

static SINGLE_FIELDS: LazyLock<[String; 1]> = LazyLock::new(|| [B3_SINGLE_HEADER.to_string()]);

static MULTI_FIELDS: LazyLock<[String; 5]> = LazyLock::new(|| {
    [
        B3_TRACE_ID_HEADER.to_string(),
        B3_SPAN_ID_HEADER.to_string(),
        B3_PARENT_SPAN_ID_HEADER.to_string(),
        B3_SAMPLED_HEADER.to_string(),
        B3_FLAGS_HEADER.to_string(),
    ]
});

/// 采样状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Sampling {
    Deny,
    Accept,
    Debug,
    /// 未携带采样决定，由下游决定
    Defer,
}

impl Sampling {
    fn from_single(value: &str) -> Option<Self> {
        match value {
            "0" => Some(Self::Deny),
            "1" => Some(Self::Accept),
            "d" => Some(Self::Debug),
            _ => None,
        }
    }

    fn from_multi(sampled: Option<&str>, flags: Option<&str>) -> Option<Self> {
        if flags == Some("1") {
            return Some(Self::Debug);
        }
        match sampled {
            None => Some(Self::Defer),
            Some("1") | Some("true") => Some(Self::Accept),
            Some("0") | Some("false") => Some(Self::Deny),
            Some(_) => None,
        }
    }

    fn as_single(self) -> Option<&'static str> {
        match self {
            Self::Deny => Some("0"),
            Self::Accept => Some("1"),
            Self::Debug => Some("d"),
            Self::Defer => None,
        }
    }

    fn is_sampled(self) -> bool {
        matches!(self, Self::Accept | Self::Debug)
    }
}

/// 一个 B3 追踪上下文
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct B3 {
    trace_id: TraceId,
    span_id: SpanId,
    parent_span_id: Option<SpanId>,
    sampling: Sampling,
}

impl B3 {
    pub(crate) fn from_headers(headers: &HeaderMap) -> Option<Self> {
        Self::parse(|key| headers.get(key).and_then(|v| v.to_str().ok()))
    }

    /// 先尝试单头部，再尝试多头部；任何格式错误都视为不存在
    pub(crate) fn parse<'a>(get: impl Fn(&str) -> Option<&'a str>) -> Option<Self> {
        if let Some(single) = get(B3_SINGLE_HEADER) {
            if let Some(b3) = Self::parse_single(single) {
                return Some(b3);
            }
        }
        Self::parse_multi(&get)
    }

    fn parse_single(value: &str) -> Option<Self> {
        let parts: Vec<&str> = value.trim().split('-').collect();
        // 只有采样标志的形式不携带ID
        if parts.len() < 2 || parts.len() > 4 {
            return None;
        }

        let trace_id = TraceId::from_b3_validated(parts[0])?;
        let span_id = SpanId::from_string_validated(parts[1])?;
        let sampling = match parts.get(2) {
            Some(s) => Sampling::from_single(s)?,
            None => Sampling::Defer,
        };
        let parent_span_id = match parts.get(3) {
            Some(p) => Some(SpanId::from_string_validated(p)?),
            None => None,
        };

        Some(Self {
            trace_id,
            span_id,
            parent_span_id,
            sampling,
        })
    }

    fn parse_multi<'a>(get: &impl Fn(&str) -> Option<&'a str>) -> Option<Self> {
        let trace_id = TraceId::from_b3_validated(get(B3_TRACE_ID_HEADER)?.trim())?;
        let span_id = SpanId::from_string_validated(get(B3_SPAN_ID_HEADER)?.trim())?;
        let parent_span_id = match get(B3_PARENT_SPAN_ID_HEADER) {
            Some(p) => Some(SpanId::from_string_validated(p.trim())?),
            None => None,
        };
        let sampling = Sampling::from_multi(
            get(B3_SAMPLED_HEADER).map(str::trim),
            get(B3_FLAGS_HEADER).map(str::trim),
        )?;

        Some(Self {
            trace_id,
            span_id,
            parent_span_id,
            sampling,
        })
    }

    pub(crate) fn random() -> Self {
        Self {
            trace_id: TraceId::new(),
            span_id: SpanId::new(),
            parent_span_id: None,
            sampling: Sampling::Defer,
        }
    }

    /// 派生子 span：当前 span 成为父 span
    pub(crate) fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: SpanId::new(),
            parent_span_id: Some(self.span_id.clone()),
            sampling: self.sampling,
        }
    }

    /// 写入多头部形式
    ///
    /// 先清除已有的 B3 头部，否则残留的单头部会在解析时优先于新写入的多头部。
    pub(crate) fn set_header(&self, headers: &mut HeaderMap) {
        for key in [
            B3_SINGLE_HEADER,
            B3_PARENT_SPAN_ID_HEADER,
            B3_SAMPLED_HEADER,
            B3_FLAGS_HEADER,
        ] {
            headers.remove(key);
        }
        self.write_multi(&mut |key: &'static str, value: String| {
            insert_header(headers, key, value)
        });
    }

    fn write_multi(&self, set: &mut dyn FnMut(&'static str, String)) {
        set(B3_TRACE_ID_HEADER, self.trace_id.to_string());
        set(B3_SPAN_ID_HEADER, self.span_id.to_string());
        if let Some(parent) = &self.parent_span_id {
            set(B3_PARENT_SPAN_ID_HEADER, parent.to_string());
        }
        match self.sampling {
            Sampling::Debug => set(B3_FLAGS_HEADER, "1".to_string()),
            Sampling::Accept => set(B3_SAMPLED_HEADER, "1".to_string()),
            Sampling::Deny => set(B3_SAMPLED_HEADER, "0".to_string()),
            Sampling::Defer => {}
        }
    }

    /// 单头部形式的值
    pub(crate) fn single_value(&self) -> String {
        let mut value = format!("{}-{}", self.trace_id, self.span_id);
        if let Some(sampling) = self.sampling.as_single() {
            value.push('-');
            value.push_str(sampling);
            if let Some(parent) = &self.parent_span_id {
                value.push('-');
                value.push_str(parent.as_str());
            }
        }
        value
    }

    pub(crate) fn trace_id(&self) -> &TraceId {
        &self.trace_id
    }

    pub(crate) fn span_id(&self) -> &SpanId {
        &self.span_id
    }

    fn to_span_context(&self) -> Option<otel::SpanContext> {
        let trace_id = otel::TraceId::from_hex(self.trace_id.as_str()).ok()?;
        let span_id = otel::SpanId::from_hex(self.span_id.as_str()).ok()?;
        let flags = if self.sampling.is_sampled() {
            otel::TraceFlags::SAMPLED
        } else {
            otel::TraceFlags::default()
        };
        let span_context =
            otel::SpanContext::new(trace_id, span_id, flags, true, otel::TraceState::default());
        span_context.is_valid().then_some(span_context)
    }

    fn from_span_context(span_context: &otel::SpanContext) -> Option<Self> {
        if !span_context.is_valid() {
            return None;
        }
        Some(Self {
            trace_id: TraceId::from_b3_validated(&span_context.trace_id().to_string())?,
            span_id: SpanId::from_string_validated(&span_context.span_id().to_string())?,
            parent_span_id: None,
            sampling: if span_context.is_sampled() {
                Sampling::Accept
            } else {
                Sampling::Deny
            },
        })
    }
}

impl fmt::Display for B3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{B3_SINGLE_HEADER}={}", self.single_value())
    }
}

fn insert_header(headers: &mut HeaderMap, key: &'static str, value: String) {
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(key, value);
    }
}

/// B3 注入编码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum B3Encoding {
    /// `b3` 单头部
    SingleHeader,
    /// `X-B3-*` 多头部
    MultipleHeader,
}

/// OpenTelemetry 的 B3 传播器
///
/// 提取时总是先看单头部再看多头部，注入时使用构造时指定的编码。
#[derive(Debug, Clone)]
pub struct B3Propagator {
    encoding: B3Encoding,
}

impl B3Propagator {
    pub fn new(encoding: B3Encoding) -> Self {
        Self { encoding }
    }
}

impl Default for B3Propagator {
    fn default() -> Self {
        Self::new(B3Encoding::SingleHeader)
    }
}

impl TextMapPropagator for B3Propagator {
    fn inject_context(&self, cx: &Context, injector: &mut dyn Injector) {
        let Some(b3) = B3::from_span_context(cx.span().span_context()) else {
            return;
        };
        match self.encoding {
            B3Encoding::SingleHeader => injector.set(B3_SINGLE_HEADER, b3.single_value()),
            B3Encoding::MultipleHeader => {
                b3.write_multi(&mut |key: &'static str, value: String| injector.set(key, value))
            }
        }
    }

    fn extract_with_context(&self, cx: &Context, extractor: &dyn Extractor) -> Context {
        B3::parse(|key| extractor.get(key))
            .and_then(|b3| b3.to_span_context())
            .map(|span_context| cx.with_remote_span_context(span_context))
            .unwrap_or_else(|| cx.clone())
    }

    fn fields(&self) -> FieldIter<'_> {
        match self.encoding {
            B3Encoding::SingleHeader => FieldIter::new(SINGLE_FIELDS.as_slice()),
            B3Encoding::MultipleHeader => FieldIter::new(MULTI_FIELDS.as_slice()),
        }
    }
}
