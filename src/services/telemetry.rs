use crate::config::TelemetryConfig;
use crate::models::Stage;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Pushes numeric storage events to an InfluxDB-compatible `/write` endpoint.
///
/// Sending is best effort: missing credentials make every call a silent
/// no-op, and an unreachable or failing endpoint is only logged.
#[derive(Debug, Clone)]
pub struct TelemetryClient {
    http: reqwest::Client,
    config: TelemetryConfig,
}

impl TelemetryClient {
    pub fn new(config: TelemetryConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self { http, config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.credentials().is_some()
    }

    /// Renders one line of line protocol, or `None` if nothing is sendable.
    pub fn line(&self, tags: &[(&str, &str)], values: &BTreeMap<String, f64>) -> Option<String> {
        let fields: Vec<String> = values
            .iter()
            .filter(|(_, v)| v.is_finite())
            .map(|(k, v)| format!("{}={}", escape(k, true), v))
            .collect();
        if fields.is_empty() {
            return None;
        }

        let mut line = escape(&self.config.namespace, false);
        for (k, v) in tags {
            line.push_str(&format!(",{}={}", escape(k, true), escape(v, true)));
        }
        line.push(' ');
        line.push_str(&fields.join(","));
        Some(line)
    }

    pub async fn send(&self, values: &BTreeMap<String, f64>) {
        self.send_with_tags(&[], values).await
    }

    pub async fn send_with_tags(&self, tags: &[(&str, &str)], values: &BTreeMap<String, f64>) {
        let Some((url, username, password)) = self.config.credentials() else {
            return;
        };
        let Some(body) = self.line(tags, values) else {
            return;
        };

        let endpoint = format!("{}/write", url.trim_end_matches('/'));
        let res = self
            .http
            .post(&endpoint)
            .query(&[("db", self.config.database.as_str())])
            .basic_auth(username, Some(password))
            .body(body)
            .send()
            .await;

        match res {
            Ok(response) if response.status().is_success() => {
                debug!("Telemetry event written to {}", endpoint);
            }
            Ok(response) => {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                warn!("Telemetry endpoint answered {}: {}", status, text);
            }
            Err(e) => warn!("Failed to send telemetry to {}: {}", endpoint, e),
        }
    }

    /// Records one write or copy: bytes moved and how long it took.
    pub async fn record_transfer(&self, operation: &str, stage: Stage, bytes: u64, elapsed: Duration) {
        let values = BTreeMap::from([
            ("bytes".to_string(), bytes as f64),
            ("seconds".to_string(), elapsed.as_secs_f64()),
        ]);
        self.send_with_tags(&[("operation", operation), ("stage", stage.as_str())], &values)
            .await
    }
}

/// Line protocol escaping. Measurements only escape commas and spaces; tag
/// keys, tag values and field keys also escape `=`.
fn escape(raw: &str, escape_equals: bool) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == ',' || c == ' ' || (escape_equals && c == '=') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
