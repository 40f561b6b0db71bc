//! OpenTelemetry 导出与日志订阅器初始化

use crate::trace::{self, TraceConfig, TraceResolver, OTLP_ENDPOINT_ENV, OTLP_TRACES_ENDPOINT_ENV, TRACER_NAME};
use opentelemetry::global;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use std::path::Path;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 未显式指定端口时 OTLP gRPC 的默认端口
pub const OTLP_GRPC_DEFAULT_PORT: u16 = 4317;

/// 初始化过程中的错误
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("failed to build OTLP span exporter: {0}")]
    Exporter(#[from] opentelemetry_otlp::ExporterBuildError),
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// 已安装的 OpenTelemetry 追踪
#[derive(Debug, Clone)]
pub struct Telemetry {
    resolver: TraceResolver,
    provider: SdkTracerProvider,
}

impl Telemetry {
    /// 启用了 OpenTelemetry 的解析器
    pub fn resolver(&self) -> &TraceResolver {
        &self.resolver
    }

    pub fn provider(&self) -> &SdkTracerProvider {
        &self.provider
    }

    /// 刷新并关闭 span 导出
    pub fn shutdown(&self) {
        if let Err(err) = self.provider.shutdown() {
            tracing::warn!(error = %err, "failed to shut down tracer provider");
        }
    }
}

/// 全局安装 TracerProvider 和复合传播器（W3C + B3）
pub fn install(provider: SdkTracerProvider) -> Telemetry {
    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(trace::propagator());
    tracing::info!("OpenTelemetry tracing enabled");
    Telemetry {
        resolver: TraceResolver::new(TraceConfig::new(true)),
        provider,
    }
}

/// 启用 OpenTelemetry 并向 OTLP gRPC 收集器导出 span
///
/// `fraction` 为上游未采样时的采样比例：
///
/// - 小于等于 0：只跟随上游的采样决定；
/// - 大于等于 1：总是采样；
/// - 其他：按比例采样，例如 0.01 表示 1%。
pub fn set_otel_grpc(target: &str, fraction: f64) -> Result<Telemetry, TelemetryError> {
    Ok(install(otlp_grpc_provider(target, fraction)?))
}

/// 根据 `OTEL_EXPORTER_OTLP_TRACES_ENDPOINT` / `OTEL_EXPORTER_OTLP_ENDPOINT` 启用
///
/// 两个变量都未设置时返回 `Ok(None)`。
pub fn set_otel_from_env(fraction: f64) -> Result<Option<Telemetry>, TelemetryError> {
    let endpoint = [OTLP_TRACES_ENDPOINT_ENV, OTLP_ENDPOINT_ENV]
        .into_iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.is_empty());
    match endpoint {
        Some(endpoint) => set_otel_grpc(&endpoint, fraction).map(Some),
        None => Ok(None),
    }
}

/// 构建导出到 OTLP gRPC 收集器的 TracerProvider（不进行全局安装）
pub fn otlp_grpc_provider(target: &str, fraction: f64) -> Result<SdkTracerProvider, TelemetryError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(collector_endpoint(target))
        .build()?;

    let resource = Resource::builder().with_service_name(service_name()).build();

    Ok(SdkTracerProvider::builder()
        .with_sampler(sampler(fraction))
        .with_resource(resource)
        .with_batch_exporter(exporter)
        .build())
}

/// 基于上游决定、否则按比例的采样器
pub fn sampler(fraction: f64) -> Sampler {
    let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
    Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(fraction)))
}

/// 初始化 tracing 订阅器
///
/// 提供 `provider` 时额外挂载 tracing-opentelemetry 层，使 tracing span 被导出。
pub fn init_subscriber(
    env_filter: &str,
    provider: Option<&SdkTracerProvider>,
) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let otel_layer =
        provider.map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer(TRACER_NAME)));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .with(otel_layer)
        .try_init()?;
    Ok(())
}

/// 补全收集器地址：缺少协议时使用 http，缺少端口时使用 4317
fn collector_endpoint(target: &str) -> String {
    let target = target.trim().trim_end_matches('/');
    let (scheme, authority) = match target.split_once("://") {
        Some((scheme, rest)) => (scheme, rest),
        None => ("http", target),
    };
    let (host, path) = match authority.find('/') {
        Some(idx) => authority.split_at(idx),
        None => (authority, ""),
    };
    let has_port = host
        .rsplit_once(':')
        .is_some_and(|(_, port)| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()))
        && !host.ends_with(']');
    if has_port {
        format!("{scheme}://{host}{path}")
    } else {
        format!("{scheme}://{host}:{OTLP_GRPC_DEFAULT_PORT}{path}")
    }
}

/// 可执行文件名，作为 `service.name`
fn service_name() -> String {
    std::env::args()
        .next()
        .as_deref()
        .and_then(|arg0| Path::new(arg0).file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown_service".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampler_fraction_is_clamped() {
        let ratio = |sampler: Sampler| match sampler {
            Sampler::ParentBased(root) => match *root {
                Sampler::TraceIdRatioBased(ratio) => ratio,
                other => panic!("unexpected root sampler: {other:?}"),
            },
            other => panic!("unexpected sampler: {other:?}"),
        };
        assert_eq!(ratio(sampler(-1.0)), 0.0);
        assert_eq!(ratio(sampler(0.25)), 0.25);
        assert_eq!(ratio(sampler(3.0)), 1.0);
        assert_eq!(ratio(sampler(f64::NAN)), 0.0);
    }

    #[test]
    fn test_collector_endpoint() {
        assert_eq!(collector_endpoint("otel-collector"), "http://otel-collector:4317");
        assert_eq!(collector_endpoint("otel-collector:4318"), "http://otel-collector:4318");
        assert_eq!(
            collector_endpoint("https://collector.example.com/"),
            "https://collector.example.com:4317"
        );
        assert_eq!(collector_endpoint("http://[::1]:4317"), "http://[::1]:4317");
        assert_eq!(
            collector_endpoint("http://collector/v1/traces"),
            "http://collector:4317/v1/traces"
        );
    }

    #[test]
    fn test_service_name_not_empty() {
        assert!(!service_name().is_empty());
    }
}
