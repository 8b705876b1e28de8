use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use prometheus::Registry;

pub struct Metrics {
    request_counter: Counter<u64>,
    inference_duration: Histogram<u64>,
    prediction_counter: Counter<u64>,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("leaf_prediction");
        global::set_meter_provider(provider);

        let request_counter = meter
            .u64_counter("requests_total")
            .with_description("Total number of requests")
            .build();

        let inference_duration = meter
            .u64_histogram("inference_duration_ms")
            .with_boundaries(duration_boundaries(&[(5, 50, 5), (50, 500, 50), (500, 2000, 250)]))
            .with_description("Duration of model inference in milliseconds")
            .build();

        let prediction_counter = meter
            .u64_counter("predictions_total")
            .with_description("Predictions served, by predicted class")
            .build();

        Ok(Metrics {
            request_counter,
            inference_duration,
            prediction_counter,
            registry,
        })
    }

    pub fn record_request(&self, route: &str) {
        let attributes = [KeyValue::new("route", route.to_string())];
        self.request_counter.add(1, &attributes);
    }

    pub fn record_inference_duration(&self, duration_ms: u64) {
        self.inference_duration.record(duration_ms, &[]);
    }

    pub fn record_prediction(&self, class: &str) {
        let attributes = [KeyValue::new("class", class.to_string())];
        self.prediction_counter.add(1, &attributes);
    }
}

/// Bucket edges from `(start, end, step)` ranges, deduplicated where ranges meet.
fn duration_boundaries(ranges: &[(u32, u32, usize)]) -> Vec<f64> {
    let mut boundaries: Vec<f64> = Vec::new();
    for &(start, end, step) in ranges {
        for edge in (start..=end).step_by(step) {
            let edge = edge as f64;
            if boundaries.last().map_or(true, |&last| edge > last) {
                boundaries.push(edge);
            }
        }
    }
    boundaries
}
