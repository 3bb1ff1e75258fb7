//! Rendering of a [`Snapshot`] for monitoring systems.

use itertools::Itertools;

use crate::poll::Snapshot;

/// Prefix of every exported metric name.
pub const METRIC_PREFIX: &str = "pm3p";

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Format {
    #[default]
    Json,
    Prometheus,
}

impl Format {
    /// Unknown or missing values fall back to JSON.
    pub fn from_param(param: Option<&str>) -> Self {
        match param {
            Some("prometheus") => Format::Prometheus,
            _ => Format::Json,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Format::Json => JSON_CONTENT_TYPE,
            Format::Prometheus => PROMETHEUS_CONTENT_TYPE,
        }
    }

    pub fn render(&self, snapshot: &Snapshot) -> crate::Result<String> {
        match self {
            Format::Json => render_json(snapshot),
            Format::Prometheus => Ok(render_prometheus(snapshot)),
        }
    }
}

pub fn render_json(snapshot: &Snapshot) -> crate::Result<String> {
    Ok(serde_json::to_string(snapshot)?)
}

/// One gauge per phase and field, sorted by phase then field name. Failed phases are left out.
pub fn render_prometheus(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    for (phase, reading) in &snapshot.phases {
        let Ok(measurement) = reading else {
            continue;
        };
        for (field, value) in measurement.fields().into_iter().sorted_by_key(|(f, _)| *f) {
            let name = format!("{}_{}_{}", METRIC_PREFIX, phase, field);
            out.push_str(&format!("# TYPE {} gauge\n", name));
            out.push_str(&format!("{} {}\n", name, value));
        }
    }
    out
}
