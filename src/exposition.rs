//! Prometheus text exposition of rendered samples.

use crate::emit::Sample;
use prometheus::proto::{Gauge, LabelPair, Metric, MetricFamily, MetricType};
use prometheus::{Encoder, TextEncoder};

pub use prometheus::TEXT_FORMAT as CONTENT_TYPE;

#[derive(Debug, thiserror::Error)]
pub enum ExpositionError {
    #[error("encoding metrics failed: {0}")]
    Encode(#[from] prometheus::Error),
    #[error("encoded metrics are not utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

fn metric(sample: &Sample) -> Metric {
    let labels = sample
        .labels
        .iter()
        .map(|(name, value)| {
            let mut pair = LabelPair::default();
            pair.set_name(name.to_string());
            pair.set_value(value.clone());
            pair
        })
        .collect();

    let mut gauge = Gauge::default();
    gauge.set_value(sample.value);

    let mut m = Metric::from_label(labels);
    m.set_gauge(gauge);
    if let Some(ts) = sample.timestamp_ms {
        m.set_timestamp_ms(ts);
    }
    m
}

/// Group samples into gauge families, keeping first-seen family order.
pub fn families(samples: &[Sample]) -> Vec<MetricFamily> {
    let mut grouped: Vec<(&Sample, Vec<Metric>)> = Vec::new();
    for sample in samples {
        match grouped.iter_mut().find(|(first, _)| first.metric == sample.metric) {
            Some((_, metrics)) => metrics.push(metric(sample)),
            None => grouped.push((sample, vec![metric(sample)])),
        }
    }

    grouped
        .into_iter()
        .map(|(first, metrics)| {
            let mut family = MetricFamily::default();
            family.set_name(first.metric.name.to_string());
            family.set_help(first.metric.help.to_string());
            family.set_field_type(MetricType::GAUGE);
            family.set_metric(metrics);
            family
        })
        .collect()
}

/// Encode samples in the Prometheus text format.
pub fn encode(samples: &[Sample]) -> Result<String, ExpositionError> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&families(samples), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
