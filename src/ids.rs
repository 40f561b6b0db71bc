//! 追踪标识符：TraceId 与 SpanId 的生成和校验

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// TraceId 生成计数器
static COUNTER: AtomicU64 = AtomicU64::new(0);

/// 机器ID，基于进程ID和启动时间戳生成，确保不同进程/实例的ID不冲突
static MACHINE_ID: LazyLock<u16> = LazyLock::new(|| {
    let pid = std::process::id();
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32;
    ((pid ^ timestamp) & 0xFFFF) as u16
});

/// 追踪ID
///
/// 新生成的ID固定为32字符小写十六进制（128位，符合 W3C TraceContext）。
/// 从 B3 头部解析时也可能是16字符（64位）形式，原样保留。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceId(String);

impl TraceId {
    /// 生成新的追踪ID
    ///
    /// 构造方式：timestamp(48位) + machine_id(16位) + counter(32位) + random(32位)
    #[inline]
    pub fn new() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
        let random_part = fastrand::u32(..);

        let high_64 = ((timestamp & 0xFFFFFFFFFFFF) << 16) | (*MACHINE_ID as u64);
        let low_64 = (counter & 0xFFFFFFFF) << 32 | (random_part as u64);

        Self(format!("{high_64:016x}{low_64:016x}"))
    }

    /// 按 W3C TraceContext 规则校验并创建追踪ID
    ///
    /// # 校验规则
    /// - 长度必须是 32 个字符
    /// - 只能包含小写十六进制字符（0-9, a-f）
    /// - 不能全为零
    #[inline]
    pub fn from_string_validated(id: &str) -> Option<Self> {
        if id.len() != 32 || !is_valid_hex(id) {
            return None;
        }
        Some(Self(id.to_string()))
    }

    /// 按 B3 规则校验并创建追踪ID
    ///
    /// 与 [`TraceId::from_string_validated`] 相同，但额外接受16字符的64位形式。
    #[inline]
    pub fn from_b3_validated(id: &str) -> Option<Self> {
        if (id.len() != 16 && id.len() != 32) || !is_valid_hex(id) {
            return None;
        }
        Some(Self(id.to_string()))
    }

    /// 获取追踪ID字符串
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

/// Span ID，固定为16字符小写十六进制（64位）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpanId(String);

impl SpanId {
    /// 生成新的随机 Span ID（不会全为零）
    #[inline]
    pub fn new() -> Self {
        Self(format!("{:016x}", fastrand::u64(1..)))
    }

    /// 校验并创建 Span ID
    ///
    /// 长度必须是16个字符，只能包含小写十六进制字符，且不能全为零。
    #[inline]
    pub fn from_string_validated(id: &str) -> Option<Self> {
        if id.len() != 16 || !is_valid_hex(id) {
            return None;
        }
        Some(Self(id.to_string()))
    }

    /// 获取 Span ID 字符串
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Default for SpanId {
    fn default() -> Self {
        Self::new()
    }
}

/// 字节级校验：全部为小写十六进制字符，且至少有一个非零字符
#[inline]
fn is_valid_hex(id: &str) -> bool {
    let bytes = id.as_bytes();
    bytes
        .iter()
        .all(|&b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        && bytes.iter().any(|&b| b != b'0')
}
