//! Logging, tracing and metrics for processes hosting the repositories.
//!
//! # Purpose
//! The repositories emit `tracing` events and `metrics` series but never
//! install a subscriber or recorder themselves. A host calls
//! [`init_observability`] once at startup and mounts [`metrics_router`] (or
//! runs [`serve_metrics`]) to expose the series listed in [`METRICS`].
//!
//! # Notes
//! - Initialization is guarded by `OnceLock`; repeated calls return the same
//!   Prometheus handle.
//! - Spans are exported over OTLP only when `OTEL_EXPORTER_OTLP_ENDPOINT` is
//!   set.
use metrics::Unit;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Global locate calls, labelled by `outcome`.
pub const LOCATE_TOTAL: &str = "stratus_locate_total";
/// Fan-out scopes skipped as forbidden, labelled by `kind`.
pub const FANOUT_FORBIDDEN_SCOPES_TOTAL: &str = "stratus_fanout_forbidden_scopes_total";
/// Condition awaits, labelled by `outcome`.
pub const CONDITION_AWAITS_TOTAL: &str = "stratus_condition_awaits_total";
pub const CONDITION_AWAIT_SECONDS: &str = "stratus_condition_await_seconds";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static TRACING_INIT: OnceLock<()> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Histogram,
}

/// One series emitted by the repositories.
#[derive(Debug, Clone, Copy)]
pub struct MetricDescriptor {
    pub name: &'static str,
    pub kind: MetricKind,
    pub unit: Option<Unit>,
    pub help: &'static str,
}

pub const METRICS: &[MetricDescriptor] = &[
    MetricDescriptor {
        name: LOCATE_TOTAL,
        kind: MetricKind::Counter,
        unit: None,
        help: "Global locate calls by outcome (found, not_found, duplicate).",
    },
    MetricDescriptor {
        name: FANOUT_FORBIDDEN_SCOPES_TOTAL,
        kind: MetricKind::Counter,
        unit: None,
        help: "Scopes skipped during fan-out listing because the backend answered forbidden.",
    },
    MetricDescriptor {
        name: CONDITION_AWAITS_TOTAL,
        kind: MetricKind::Counter,
        unit: None,
        help: "Condition awaits by outcome.",
    },
    MetricDescriptor {
        name: CONDITION_AWAIT_SECONDS,
        kind: MetricKind::Histogram,
        unit: Some(Unit::Seconds),
        help: "Time from the start of a condition await to its outcome.",
    },
];

/// Register help text for every series in [`METRICS`] with the installed
/// recorder. A no-op when no recorder is installed.
pub fn describe_metrics() {
    for metric in METRICS {
        match (metric.kind, metric.unit) {
            (MetricKind::Counter, Some(unit)) => {
                metrics::describe_counter!(metric.name, unit, metric.help)
            }
            (MetricKind::Counter, None) => metrics::describe_counter!(metric.name, metric.help),
            (MetricKind::Histogram, Some(unit)) => {
                metrics::describe_histogram!(metric.name, unit, metric.help)
            }
            (MetricKind::Histogram, None) => {
                metrics::describe_histogram!(metric.name, metric.help)
            }
        }
    }
}

/// Install the fmt subscriber (plus OTLP export when configured) and the
/// Prometheus recorder.
pub fn init_observability(service_name: &str) -> anyhow::Result<PrometheusHandle> {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,repositories=debug"));
        let registry = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer());
        match build_tracer_provider(service_name) {
            Some(provider) => {
                let tracer = provider.tracer(service_name.to_string());
                let _ = registry
                    .with(tracing_opentelemetry::layer().with_tracer(tracer))
                    .try_init();
            }
            None => {
                let _ = registry.try_init();
            }
        }
    });
    install_metrics_recorder()
}

fn build_tracer_provider(service_name: &str) -> Option<SdkTracerProvider> {
    std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .build()
        .ok()?;
    let resource = Resource::builder_empty()
        .with_attributes(resource_attributes(service_name))
        .build();
    Some(
        SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(resource)
            .build(),
    )
}

fn resource_attributes(service_name: &str) -> Vec<KeyValue> {
    let mut attrs = vec![
        KeyValue::new("service.name", service_name.to_string()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ];
    if let Ok(instance) = std::env::var("STRATUS_INSTANCE_ID") {
        attrs.push(KeyValue::new("service.instance.id", instance));
    }
    attrs
}

fn install_metrics_recorder() -> anyhow::Result<PrometheusHandle> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|err| anyhow::anyhow!("install metrics recorder: {err}"))?;
    describe_metrics();
    let _ = METRICS_HANDLE.set(handle.clone());
    Ok(handle)
}

/// Router exposing `GET /metrics` in the Prometheus text format.
pub fn metrics_router(handle: PrometheusHandle) -> axum::Router {
    axum::Router::new().route(
        "/metrics",
        axum::routing::get(move || async move { handle.render() }),
    )
}

pub async fn serve_metrics(handle: PrometheusHandle, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_metrics_until(handle, listener, std::future::pending()).await
}

async fn serve_metrics_until<F>(
    handle: PrometheusHandle,
    listener: tokio::net::TcpListener,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, metrics_router(handle))
        .with_graceful_shutdown(shutdown)
        .await
}
