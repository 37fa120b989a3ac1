use opentelemetry::trace::TraceId;

/// Fetch opentelemetry::trace::TraceId as hex through entire stack
pub fn get_trace_id() -> TraceId {
    use opentelemetry::trace::TraceContextExt as _;
    use tracing_opentelemetry::OpenTelemetrySpanExt as _;

    tracing::Span::current()
        .context()
        .span()
        .span_context()
        .trace_id()
}

/// Builds an OTLP tracer exporting over gRPC, used only behind the `telemetry` feature:
/// tracing is on by default, export to a collector is opt-in.
#[cfg(feature = "telemetry")]
pub async fn init_tracer() -> opentelemetry_sdk::trace::Tracer {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_otlp::WithExportConfig as _;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .build()
        .expect("build OTLP span exporter");

    let provider = opentelemetry_sdk::trace::TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_resource(opentelemetry_sdk::Resource::new(vec![opentelemetry::KeyValue::new(
            "service.name",
            "chaos-operator",
        )]))
        .build();

    provider.tracer("chaos-operator")
}

