//! 分布式追踪上下文与函数式处理器适配
//!
//! 解析、派生和传播追踪上下文（W3C traceparent、B3、OpenTelemetry），
//! 并把普通异步函数适配为带 JSON 解码、校验和统一错误响应的 Axum 处理函数。
//! 追踪部分与Web框架无关，Axum 集成由默认启用的 `axum` feature 提供。
//!
//! ## Usage
//!
//! ### 基础用法：解析和传播追踪上下文
//! ```
//! use http::Request;
//! use trace_lambda::{TraceFormat, TraceResolver};
//!
//! let req = Request::builder()
//!     .header("traceparent", "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01")
//!     .body(())
//!     .unwrap();
//!
//! let resolver = TraceResolver::default();
//! let tracer = resolver.from_request_or_random(&req);
//! assert_eq!(tracer.format(), TraceFormat::TraceParent);
//! assert_eq!(tracer.trace_id(), "0af7651916cd43dd8448eb211c80319c");
//!
//! // 为下游调用派生子 span 并写入请求头
//! let outgoing = Request::builder().uri("/inventory").body(()).unwrap();
//! let (outgoing, log) = tracer.span(outgoing);
//! assert!(outgoing.headers().contains_key("traceparent"));
//! println!("calling inventory with {log}");
//! ```
//!
//! ### Axum 集成（需要启用 axum feature）
//! ```ignore
//! use axum::{routing::post, Router};
//! use serde::{Deserialize, Serialize};
//! use trace_lambda::{lambda, Error, RequestCtx, TracerLayer};
//! use validator::Validate;
//!
//! #[derive(Deserialize, Serialize, Validate)]
//! struct Order {
//!     #[validate(range(min = 1))]
//!     quantity: u32,
//! }
//!
//! async fn place(ctx: RequestCtx, order: Order) -> Result<Order, Error> {
//!     tracing::info!(trace = ?ctx.tracer().map(|t| t.trace_id()), "placing order");
//!     Ok(order)
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = Router::new()
//!         .route("/orders", post(lambda::wrap(place)))
//!         .layer(TracerLayer::new());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

mod context;
mod error;
mod ids;
pub mod telemetry;
pub mod trace;

pub use context::{current_tracer, with_tracer};
pub use error::Error;
pub use ids::{SpanId, TraceId};
pub use trace::{TraceConfig, TraceFormat, TraceResolver, Tracer};

/// 追踪上下文使用的 HTTP 头部字段名
pub use trace::{
    B3_FLAGS_HEADER, B3_PARENT_SPAN_ID_HEADER, B3_SAMPLED_HEADER, B3_SINGLE_HEADER,
    B3_SPAN_ID_HEADER, B3_TRACE_ID_HEADER, TRACEPARENT_HEADER, TRACESTATE_HEADER,
};

// -- axum feature --
#[cfg(feature = "axum")]
mod integrations;
#[cfg(feature = "axum")]
pub mod lambda;
#[cfg(feature = "axum")]
pub use integrations::axum::{TracerLayer, TracerLayerConfig, TracerService};
#[cfg(feature = "axum")]
pub use lambda::{send_resp, wrap, wrap_with, LambdaConfig, RequestCtx, Unvalidated};
