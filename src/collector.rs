//! Scrape orchestration and exposition rendering.
//!
//! Each inbound request runs one full cycle against the device: fetch,
//! map, serialize. Nothing is cached between requests. Whatever happens
//! during the fetch, the rendered output always carries the `connectbox_up`
//! gauge and the scrape duration; on failure those two are all it carries,
//! so a monitoring system alerts on the gauge rather than on HTTP status.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error};

use crate::client::DeviceClient;
use crate::config::{ExporterConfig, MetricGroup};
use crate::mapping::{self, MetricObservation};

/// Drives one scrape per call to [`scrape`](Self::scrape).
pub struct ScrapeCollector {
    client: DeviceClient,
    source: String,
    groups: BTreeSet<MetricGroup>,
}

/// Shareable collector handle for the HTTP layer.
pub type SharedCollector = Arc<ScrapeCollector>;

impl ScrapeCollector {
    pub fn new(client: DeviceClient, config: &ExporterConfig) -> Self {
        Self {
            client,
            source: config.ip_address.clone(),
            groups: config.metrics.clone(),
        }
    }

    /// Run one scrape cycle and render the result.
    pub async fn scrape(&self) -> String {
        let start = Instant::now();

        let mut observations = match self.client.fetch_snapshot(&self.groups).await {
            Ok(snapshot) => {
                let mut observations = mapping::map_snapshot(&snapshot, &self.source);
                observations.push(up_observation(&self.source, true));
                observations
            }
            Err(e) => {
                // The absence of all device metrics is the failure signal;
                // no partial or stale data is ever served.
                error!(source = %self.source, error = %e, "Scrape failed");
                vec![up_observation(&self.source, false)]
            }
        };

        let elapsed = start.elapsed();
        observations.push(MetricObservation::gauge(
            "connectbox_scrape_duration_seconds",
            vec![("source", self.source.clone())],
            elapsed.as_secs_f64(),
        ));

        debug!(
            source = %self.source,
            observations = observations.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Scrape finished"
        );

        render(&observations)
    }
}

fn up_observation(source: &str, up: bool) -> MetricObservation {
    MetricObservation::gauge(
        "connectbox_up",
        vec![("source", source.to_string())],
        if up { 1.0 } else { 0.0 },
    )
}

/// Render observations in the Prometheus text exposition format.
///
/// Observations arrive grouped by metric name; each run of equal names gets
/// a single `# TYPE` comment.
pub fn render(observations: &[MetricObservation]) -> String {
    let mut output = String::with_capacity(observations.len() * 80);

    let mut previous: Option<&str> = None;
    for obs in observations {
        if previous != Some(obs.name) {
            let _ = writeln!(output, "# TYPE {} {}", obs.name, obs.kind.as_str());
            previous = Some(obs.name);
        }
        let _ = writeln!(
            output,
            "{}{} {}",
            obs.name,
            format_labels(&obs.labels),
            format_value(obs.value)
        );
    }

    output
}

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value}")
    }
}

/// Format labels for the exposition format.
fn format_labels(labels: &[(&'static str, String)]) -> String {
    if labels.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}
