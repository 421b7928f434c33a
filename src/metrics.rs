use crate::build::BuildOutcome;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{Protocol, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Default, Clone)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// `http` (protobuf over HTTP) or `grpc`.
    #[serde(default = "default_transport")]
    pub transport: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

fn default_transport() -> String {
    "http".into()
}

fn default_endpoint() -> String {
    "http://localhost:4318/v1/metrics".into()
}

/// Build and register a global meter provider.
/// The gRPC exporter needs an active tokio runtime context.
pub fn init_meter_provider(config: &MetricsConfig) -> Option<SdkMeterProvider> {
    if !config.enabled {
        return None;
    }

    let resource = Resource::builder_empty()
        .with_attributes([KeyValue::new("service.name", "pagelda")])
        .build();

    let exporter = match config.transport.as_str() {
        "grpc" => opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_endpoint(&config.endpoint)
            .with_protocol(Protocol::Grpc)
            .with_timeout(Duration::from_secs(5))
            .build(),
        _ => opentelemetry_otlp::MetricExporter::builder()
            .with_http()
            .with_protocol(Protocol::HttpBinary)
            .with_endpoint(&config.endpoint)
            .with_timeout(Duration::from_secs(5))
            .build(),
    };
    let exporter = exporter
        .map_err(|e| log::warn!("metrics: {} exporter: {e}", config.transport))
        .ok()?;

    let provider = SdkMeterProvider::builder()
        .with_periodic_exporter(exporter)
        .with_resource(resource)
        .build();
    opentelemetry::global::set_meter_provider(provider.clone());
    Some(provider)
}

/// Attributes describing how a build ended.
pub fn outcome_attributes(outcome: &BuildOutcome, partition: &str) -> Vec<KeyValue> {
    let result = if outcome.succeeded() { "ok" } else { "failed" };
    vec![
        KeyValue::new("outcome", result),
        KeyValue::new("source", outcome.source.as_str()),
        KeyValue::new("partition", partition.to_string()),
    ]
}

/// Export counters and durations for one finished build, then flush.
/// Never fails the run: exporter problems are logged.
pub fn record_build(config: &MetricsConfig, outcome: &BuildOutcome, partition: &str, elapsed: Duration) {
    if !config.enabled {
        return;
    }

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            log::warn!("metrics: runtime: {e}");
            return;
        }
    };
    let Some(provider) = rt.block_on(async { init_meter_provider(config) }) else {
        return;
    };

    let meter = opentelemetry::global::meter("pagelda");
    let attrs = outcome_attributes(outcome, partition);
    meter.u64_counter("pagelda_builds_total").build().add(1, &attrs);
    meter
        .f64_histogram("pagelda_build_duration_seconds")
        .build()
        .record(elapsed.as_secs_f64(), &attrs);
    if let Some(wait) = outcome.fleet_wait {
        meter
            .f64_histogram("pagelda_fleet_wait_seconds")
            .build()
            .record(wait.as_secs_f64(), &[KeyValue::new("partition", partition.to_string())]);
    }

    if let Err(e) = provider.shutdown() {
        log::warn!("metrics: shutdown: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{BuildState, ModelSource};

    fn outcome(failure: Option<&str>) -> BuildOutcome {
        BuildOutcome {
            model_name: "x.model".into(),
            source: ModelSource::Built,
            model: None,
            reports: None,
            states: vec![BuildState::Failed],
            failure: failure.map(String::from),
            orphaned_instances: Vec::new(),
            outstanding_requests: Vec::new(),
            fleet_wait: None,
        }
    }

    #[test]
    fn disabled_by_default() {
        let config: MetricsConfig = toml::from_str("").unwrap();
        assert!(!config.enabled);
        assert_eq!(config.transport, "http");
        assert!(init_meter_provider(&config).is_none());
    }

    #[test]
    fn attributes_reflect_outcome() {
        let attrs = outcome_attributes(&outcome(Some("trainer: boom")), "831");
        assert_eq!(attrs[0], KeyValue::new("outcome", "failed"));
        assert_eq!(attrs[1], KeyValue::new("source", "built"));
        assert_eq!(attrs[2], KeyValue::new("partition", "831"));
        let attrs = outcome_attributes(&outcome(None), "831");
        assert_eq!(attrs[0], KeyValue::new("outcome", "ok"));
    }

    #[test]
    fn record_is_a_no_op_when_disabled() {
        record_build(&MetricsConfig::default(), &outcome(None), "831", Duration::from_secs(1));
    }
}
