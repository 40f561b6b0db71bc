//! 演示：带追踪中间件的函数式 JSON 服务
//!
//! 运行：
//! ```sh
//! cargo run --example lambda_server
//! # 启用 OTLP 导出
//! OTEL_EXPORTER_OTLP_ENDPOINT=localhost:4317 cargo run --example lambda_server
//! ```
//!
//! 请求示例：
//! ```sh
//! curl -s localhost:3000/orders -H 'content-type: application/json' \
//!     -H 'traceparent: 00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01' \
//!     -d '{"item":"tea","quantity":2}'
//! ```

use axum::{
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use trace_lambda::{
    lambda, telemetry, Error, LambdaConfig, RequestCtx, TraceResolver, Tracer, TracerLayer,
};
use validator::Validate;

static NEXT_ORDER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Deserialize, Validate)]
struct NewOrder {
    #[validate(length(min = 1, max = 64))]
    item: String,
    #[validate(range(min = 1, max = 100))]
    quantity: u32,
    note: Option<String>,
}

#[derive(Debug, Serialize)]
struct Order {
    id: u64,
    item: String,
    quantity: u32,
    note: Option<String>,
    trace_id: Option<String>,
}

async fn create_order(ctx: RequestCtx, req: NewOrder) -> Result<Order, Error> {
    let id = NEXT_ORDER.fetch_add(1, Ordering::Relaxed);
    tracing::info!(id, item = %req.item, quantity = req.quantity, "order created");
    ctx.set_status(axum::http::StatusCode::CREATED);
    Ok(Order {
        id,
        item: req.item,
        quantity: req.quantity,
        note: req.note,
        trace_id: ctx.tracer().map(Tracer::trace_id),
    })
}

async fn get_order(ctx: RequestCtx) -> Result<Order, Error> {
    let id = ctx
        .uri()
        .query()
        .and_then(|q| q.strip_prefix("id="))
        .and_then(|id| id.parse::<u64>().ok())
        .ok_or_else(|| Error::bad_request("missing or invalid `id` query parameter"))?;
    if id >= NEXT_ORDER.load(Ordering::Relaxed) {
        return Err(Error::not_found(format!("order {id} does not exist")));
    }
    Err(Error::new(
        axum::http::StatusCode::NOT_IMPLEMENTED,
        "orders are not persisted in this demo",
    ))
}

async fn health() {}

/// 使用当前追踪上下文调用下游服务（这里只打印将要发送的头部）
async fn call_inventory(tracer: Tracer) -> String {
    let outgoing = http::Request::builder()
        .uri("http://inventory.internal/stock")
        .body(())
        .unwrap_or_default();
    let (outgoing, log) = tracer.span(outgoing);
    tracing::info!(%log, "calling inventory");
    format!("{:?}\n", outgoing.headers())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let telemetry = telemetry::set_otel_from_env(0.1)?;
    telemetry::init_subscriber(
        "info,trace_lambda=debug",
        telemetry.as_ref().map(|t| t.provider()),
    )?;

    let resolver = telemetry
        .as_ref()
        .map(|t| t.resolver().clone())
        .unwrap_or_else(TraceResolver::from_env);

    let config = LambdaConfig {
        max_bytes_to_parse: 64 * 1024,
        sanitize_json: true,
        ..LambdaConfig::default()
    };

    let app = Router::new()
        .route("/health", get(lambda::wrap(health)))
        .route(
            "/orders",
            post(lambda::wrap_with(create_order, config)).get(lambda::wrap(get_order)),
        )
        .route("/inventory", get(call_inventory))
        .layer(TracerLayer::with_resolver(resolver));

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    if let Some(telemetry) = telemetry {
        telemetry.shutdown();
    }
    Ok(())
}
