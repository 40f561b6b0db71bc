//! 请求级上下文

use crate::context::current_tracer;
use crate::trace::Tracer;
use axum::http::{HeaderMap, Method, Request, StatusCode, Uri};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

/// 处理函数可选的第一个参数
///
/// 携带请求的方法、URI、头部和追踪上下文，并允许处理函数记录响应状态码。
/// 克隆开销很小，所有克隆共享同一个状态码记录。
///
/// ```no_run
/// use axum::http::StatusCode;
/// use serde::{Deserialize, Serialize};
/// use trace_lambda::{Error, RequestCtx};
/// use validator::Validate;
///
/// #[derive(Deserialize, Serialize, Validate)]
/// struct Item {
///     #[validate(length(min = 1))]
///     name: String,
/// }
///
/// async fn create(ctx: RequestCtx, item: Item) -> Result<Item, Error> {
///     ctx.set_status(StatusCode::CREATED);
///     Ok(item)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RequestCtx {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    tracer: Option<Tracer>,
    status: AtomicU16,
}

impl RequestCtx {
    /// 从请求创建
    ///
    /// 追踪上下文优先取自请求扩展（由 [`crate::TracerLayer`] 写入），其次取自任务级上下文。
    pub fn new<B>(req: &Request<B>) -> Self {
        let tracer = req
            .extensions()
            .get::<Tracer>()
            .cloned()
            .or_else(current_tracer);
        Self {
            inner: Arc::new(Inner {
                method: req.method().clone(),
                uri: req.uri().clone(),
                headers: req.headers().clone(),
                tracer,
                status: AtomicU16::new(0),
            }),
        }
    }

    pub fn method(&self) -> &Method {
        &self.inner.method
    }

    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    /// 读取一个请求头，值不是合法 ASCII 时返回 `None`
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn tracer(&self) -> Option<&Tracer> {
        self.inner.tracer.as_ref()
    }

    /// 记录响应状态码
    ///
    /// 处理函数没有返回错误时，响应使用该状态码。
    pub fn set_status(&self, status: StatusCode) {
        self.inner.status.store(status.as_u16(), Ordering::Relaxed);
    }

    /// 已记录的响应状态码
    pub fn status(&self) -> Option<StatusCode> {
        match self.inner.status.load(Ordering::Relaxed) {
            0 => None,
            code => StatusCode::from_u16(code).ok(),
        }
    }
}
