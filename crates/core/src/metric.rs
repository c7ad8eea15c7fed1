//! Telemetry events batched by the metrics stage.

use serde::Serialize;

/// Kind of measurement carried by a [`MetricEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Count,
    Gauge,
}

/// One `(name, value)` attribute attached to an event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricAttribute {
    pub name: String,
    pub value: serde_json::Value,
}

/// A single telemetry event.
///
/// Built with [`MetricEvent::count`] / [`MetricEvent::gauge`] and the
/// consuming [`with_attribute`](MetricEvent::with_attribute) builder; the
/// fields are read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricEvent {
    name: String,
    #[serde(rename = "type")]
    kind: MetricKind,
    value: f64,
    attributes: Vec<MetricAttribute>,
}

impl MetricEvent {
    pub fn new(name: impl Into<String>, kind: MetricKind, value: f64) -> Self {
        Self {
            name: name.into(),
            kind,
            value,
            attributes: Vec::new(),
        }
    }

    /// A counter increment of 1.
    pub fn count(name: impl Into<String>) -> Self {
        Self::new(name, MetricKind::Count, 1.0)
    }

    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, MetricKind::Gauge, value)
    }

    /// Append an attribute. Insertion order is preserved on the wire.
    pub fn with_attribute(
        mut self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.attributes.push(MetricAttribute {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn attributes(&self) -> &[MetricAttribute] {
        &self.attributes
    }

    /// Look up an attribute value by name.
    pub fn attribute(&self, name: &str) -> Option<&serde_json::Value> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| &a.value)
    }
}
