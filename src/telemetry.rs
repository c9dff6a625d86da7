//! Shared telemetry bootstrap for spanvault components.

use crate::{Error, Result};

use opentelemetry::global;
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::Resource;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const ATTR_SERVICE_NAME: &str = "service.name";
const ATTR_SERVICE_NAMESPACE: &str = "service.namespace";

/// Handle that keeps the metrics SDK provider alive for process lifetime.
///
/// Exporter wiring (OTLP, Prometheus, ...) belongs to the embedding binary;
/// this crate only installs the global meter provider so its instruments
/// have somewhere to land.
pub struct Telemetry {
    service_name: String,
    meter_provider: SdkMeterProvider,
}

impl Telemetry {
    /// Initialize structured logging and the global meter provider for a component.
    pub fn init_for_component(service_name: &str, log_level: &str) -> Result<Self> {
        let service_name = service_name.trim();
        if service_name.is_empty() {
            return Err(Error::Config("service name cannot be empty".to_string()));
        }
        let level = parse_log_level(log_level)?;

        FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .with_thread_ids(true)
            .json()
            .try_init()
            .map_err(|e| {
                Error::Config(format!("failed to initialize telemetry subscriber: {e}"))
            })?;

        let resource = Resource::default().merge(&Resource::new(vec![
            KeyValue::new(ATTR_SERVICE_NAME, service_name.to_string()),
            KeyValue::new(ATTR_SERVICE_NAMESPACE, "spanvault"),
        ]));

        let meter_provider = SdkMeterProvider::builder().with_resource(resource).build();
        global::set_meter_provider(meter_provider.clone());

        info!(service_name = %service_name, "Telemetry bootstrap initialized");

        Ok(Self {
            service_name: service_name.to_string(),
            meter_provider,
        })
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        let _ = self.meter_provider.shutdown();
    }
}

fn parse_log_level(raw: &str) -> Result<Level> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(Error::Config(format!(
            "invalid log level '{other}', expected one of [trace, debug, info, warn, error]"
        ))),
    }
}
