//! 把普通异步函数适配为 axum 处理函数
//!
//! 支持的函数形状：
//!
//! | 形状 | 说明 |
//! |------|------|
//! | `async fn() -> R` | 不读取请求 |
//! | `async fn(RequestCtx) -> R` | 只需要请求上下文 |
//! | `async fn(T) -> R` | 请求体按 JSON 解码为 `T` |
//! | `async fn(RequestCtx, T) -> R` | 上下文和请求体 |
//! | `async fn(Request) -> impl IntoResponse` | 原生处理函数，原样透传 |
//!
//! `T` 需要实现 [`LambdaBody`]：实现了 `Deserialize` 和 [`validator::Validate`] 的类型自动满足；
//! `String`、`Vec<T>`、`serde_json::Value` 等无法校验的类型用 [`Unvalidated`] 包装。
//! `R` 需要实现 [`LambdaResult`]，
//! 即 `()`、[`axum::Json<T>`] 或 `Result<T, E>`（`T: Serialize`，`E: Into<Error>`）。
//! 其他形状在编译期被拒绝。
//!
//! ```no_run
//! use axum::{routing::post, Router};
//! use serde::{Deserialize, Serialize};
//! use trace_lambda::{lambda, Error};
//! use validator::Validate;
//!
//! #[derive(Deserialize, Serialize, Validate)]
//! struct Echo {
//!     #[validate(length(max = 64))]
//!     text: String,
//! }
//!
//! async fn echo(req: Echo) -> Result<Echo, Error> {
//!     Ok(req)
//! }
//!
//! let app: Router = Router::new().route("/echo", post(lambda::wrap(echo)));
//! ```

mod body;
mod ctx;
mod response;

pub use body::{LambdaBody, Unvalidated};
pub use ctx::RequestCtx;
pub use response::{sanitize_json, send_resp, PROBLEM_JSON};

use crate::Error;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// 适配后的处理函数返回的 Future
pub type LambdaFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

/// 适配器配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LambdaConfig {
    /// 请求体最大字节数，0 表示不限制
    pub max_bytes_to_parse: usize,
    /// 写出前去掉响应数据中的空成员
    pub sanitize_json: bool,
    /// 解码后执行 [`LambdaBody::validate_body`]
    pub validate: bool,
}

impl Default for LambdaConfig {
    fn default() -> Self {
        Self {
            max_bytes_to_parse: 0,
            sanitize_json: false,
            validate: true,
        }
    }
}

impl LambdaConfig {
    pub(crate) fn body_limit(&self) -> usize {
        match self.max_bytes_to_parse {
            0 => usize::MAX,
            n => n,
        }
    }
}

/// 处理函数的返回值
pub trait LambdaResult: Send + 'static {
    /// 拆分为错误和待写出的数据
    fn into_parts(self) -> (Option<Error>, Option<Value>);
}

impl LambdaResult for () {
    fn into_parts(self) -> (Option<Error>, Option<Value>) {
        (None, None)
    }
}

impl<T> LambdaResult for Json<T>
where
    T: Serialize + Send + 'static,
{
    fn into_parts(self) -> (Option<Error>, Option<Value>) {
        match to_payload(&self.0) {
            Ok(data) => (None, data),
            Err(err) => (Some(err), None),
        }
    }
}

impl<T, E> LambdaResult for Result<T, E>
where
    T: Serialize + Send + 'static,
    E: Into<Error> + Send + 'static,
{
    fn into_parts(self) -> (Option<Error>, Option<Value>) {
        match self.map_err(Into::into).and_then(|data| to_payload(&data)) {
            Ok(data) => (None, data),
            Err(err) => (Some(err), None),
        }
    }
}

fn to_payload<T: Serialize>(data: &T) -> Result<Option<Value>, Error> {
    match serde_json::to_value(data) {
        Ok(Value::Null) => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(err) => Err(Error::internal(format!("failed to encode response: {err}"))),
    }
}

/// 返回值的错误优先，其次是 [`RequestCtx::set_status`] 记录的状态码
fn respond<R: LambdaResult>(result: R, status: Option<StatusCode>, config: &LambdaConfig) -> Response {
    let (err, data) = result.into_parts();
    let err = err.or_else(|| status.map(Error::from_status));
    send_resp(err, data, config.sanitize_json)
}

#[doc(hidden)]
pub struct ViaContext;

#[doc(hidden)]
pub struct ViaBody;

#[doc(hidden)]
pub struct ViaRequest;

/// 可以被 [`wrap`] 适配的函数
///
/// `M` 只用于区分函数形状，调用方不需要指定。
pub trait Lambda<M>: Clone + Send + Sync + 'static {
    fn invoke(&self, req: Request, config: Arc<LambdaConfig>) -> LambdaFuture;
}

impl<F, Fut, R> Lambda<()> for F
where
    F: Fn() -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: LambdaResult,
{
    fn invoke(&self, _req: Request, config: Arc<LambdaConfig>) -> LambdaFuture {
        let fut = self();
        Box::pin(async move { respond(fut.await, None, &config) })
    }
}

impl<F, Fut, R> Lambda<(ViaContext,)> for F
where
    F: Fn(RequestCtx) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: LambdaResult,
{
    fn invoke(&self, req: Request, config: Arc<LambdaConfig>) -> LambdaFuture {
        let ctx = RequestCtx::new(&req);
        let fut = self(ctx.clone());
        Box::pin(async move {
            let result = fut.await;
            respond(result, ctx.status(), &config)
        })
    }
}

impl<F, Fut, R, T> Lambda<(ViaBody, T)> for F
where
    F: Fn(T) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: LambdaResult,
    T: LambdaBody,
{
    fn invoke(&self, req: Request, config: Arc<LambdaConfig>) -> LambdaFuture {
        let f = self.clone();
        Box::pin(async move {
            let body = match body::read_json::<T>(req, &config).await {
                Ok(body) => body,
                Err(err) => return send_resp(Some(err), None, config.sanitize_json),
            };
            respond(f(body).await, None, &config)
        })
    }
}

impl<F, Fut, R, T> Lambda<(ViaContext, ViaBody, T)> for F
where
    F: Fn(RequestCtx, T) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: LambdaResult,
    T: LambdaBody,
{
    fn invoke(&self, req: Request, config: Arc<LambdaConfig>) -> LambdaFuture {
        let f = self.clone();
        let ctx = RequestCtx::new(&req);
        Box::pin(async move {
            let body = match body::read_json::<T>(req, &config).await {
                Ok(body) => body,
                Err(err) => return send_resp(Some(err), None, config.sanitize_json),
            };
            let result = f(ctx.clone(), body).await;
            respond(result, ctx.status(), &config)
        })
    }
}

impl<F, Fut, R> Lambda<ViaRequest> for F
where
    F: Fn(Request) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse,
{
    fn invoke(&self, req: Request, _config: Arc<LambdaConfig>) -> LambdaFuture {
        let fut = self(req);
        Box::pin(async move { fut.await.into_response() })
    }
}

/// 使用默认配置适配处理函数
pub fn wrap<M, F>(f: F) -> impl Fn(Request) -> LambdaFuture + Clone + Send + Sync + 'static
where
    F: Lambda<M>,
    M: 'static,
{
    wrap_with(f, LambdaConfig::default())
}

/// 使用指定配置适配处理函数
///
/// 返回值可以直接交给 axum 路由（`get(...)`、`post(...)` 等）。
pub fn wrap_with<M, F>(
    f: F,
    config: LambdaConfig,
) -> impl Fn(Request) -> LambdaFuture + Clone + Send + Sync + 'static
where
    F: Lambda<M>,
    M: 'static,
{
    let config = Arc::new(config);
    move |req: Request| f.invoke(req, config.clone())
}
