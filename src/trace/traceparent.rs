//! W3C traceparent 编码

use crate::ids::{SpanId, TraceId};
use http::{HeaderMap, HeaderValue};
use std::fmt;

/// traceparent 头部字段名
pub const TRACEPARENT_HEADER: &str = "traceparent";
/// tracestate 头部字段名
pub const TRACESTATE_HEADER: &str = "tracestate";

const SUPPORTED_VERSION: &str = "00";

/// 一个 traceparent 追踪上下文
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TraceParent {
    trace_id: TraceId,
    span_id: SpanId,
    flags: u8,
    trace_state: Option<String>,
}

impl TraceParent {
    /// 从请求头解析 traceparent，格式错误视为不存在
    pub(crate) fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let value = headers.get(TRACEPARENT_HEADER)?.to_str().ok()?;
        let mut parsed = Self::parse(value)?;
        parsed.trace_state = headers
            .get(TRACESTATE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        Some(parsed)
    }

    /// 解析 `version-traceid-spanid-flags`
    pub(crate) fn parse(value: &str) -> Option<Self> {
        let parts: Vec<&str> = value.trim().split('-').collect();
        if parts.len() < 4 {
            return None;
        }

        let version = parts[0];
        if version.len() != 2 || !version.bytes().all(|b| b.is_ascii_hexdigit()) || version == "ff" {
            return None;
        }
        // 00 版本必须恰好4段，更高版本允许尾部扩展字段
        if version == SUPPORTED_VERSION && parts.len() != 4 {
            return None;
        }

        let trace_id = TraceId::from_string_validated(parts[1])?;
        let span_id = SpanId::from_string_validated(parts[2])?;
        if parts[3].len() != 2 {
            return None;
        }
        let flags = u8::from_str_radix(parts[3], 16).ok()?;

        Some(Self {
            trace_id,
            span_id,
            flags,
            trace_state: None,
        })
    }

    /// 随机生成（采样标志置位）
    pub(crate) fn random() -> Self {
        Self {
            trace_id: TraceId::new(),
            span_id: SpanId::new(),
            flags: 0x01,
            trace_state: None,
        }
    }

    /// 派生子 span：保留 trace id、标志和 tracestate，替换 span id
    pub(crate) fn child(&self) -> Self {
        Self {
            span_id: SpanId::new(),
            ..self.clone()
        }
    }

    pub(crate) fn set_header(&self, headers: &mut HeaderMap) {
        if let Ok(value) = HeaderValue::from_str(&self.header_value()) {
            headers.insert(TRACEPARENT_HEADER, value);
        }
        match self
            .trace_state
            .as_deref()
            .and_then(|s| HeaderValue::from_str(s).ok())
        {
            Some(state) => {
                headers.insert(TRACESTATE_HEADER, state);
            }
            None => {
                headers.remove(TRACESTATE_HEADER);
            }
        }
    }

    pub(crate) fn header_value(&self) -> String {
        format!(
            "{SUPPORTED_VERSION}-{}-{}-{:02x}",
            self.trace_id, self.span_id, self.flags
        )
    }

    pub(crate) fn trace_id(&self) -> &TraceId {
        &self.trace_id
    }

    pub(crate) fn span_id(&self) -> &SpanId {
        &self.span_id
    }
}

impl fmt::Display for TraceParent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{TRACEPARENT_HEADER}={}", self.header_value())
    }
}
