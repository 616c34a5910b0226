use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trace export
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `[observability]`: optional OTLP export of the gateway's spans.
///
/// The JSON log stream and the session trace events are always on.  This
/// section only decides whether the hand-off, webhook and relay spans
/// are also shipped to a collector.
///
/// ```toml
/// [observability]
/// otlp_endpoint = "http://otel-collector:4317"
/// sample_rate = 0.2
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// OTLP/gRPC collector address.  Unset or blank disables export.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,

    /// `service.name` on exported spans.
    #[serde(default = "d_service_name")]
    pub service_name: String,

    /// Fraction of traces exported, decided per trace id.
    #[serde(default = "d_sample_rate")]
    pub sample_rate: f64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            service_name: d_service_name(),
            sample_rate: d_sample_rate(),
        }
    }
}

impl ObservabilityConfig {
    /// The collector to export to, if export is enabled.
    ///
    /// Deployments template the endpoint from an env var, so an empty
    /// value means "off" rather than an unreachable collector.
    pub fn endpoint(&self) -> Option<&str> {
        self.otlp_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }

    /// `sample_rate` clamped to `[0, 1]`; NaN exports nothing.
    pub fn sample_ratio(&self) -> f64 {
        if self.sample_rate.is_nan() {
            0.0
        } else {
            self.sample_rate.clamp(0.0, 1.0)
        }
    }
}

fn d_service_name() -> String {
    "handoff-gateway".into()
}

fn d_sample_rate() -> f64 {
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_section_means_no_export() {
        let cfg: ObservabilityConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.endpoint(), None);
        assert_eq!(cfg.service_name, "handoff-gateway");
        assert_eq!(cfg.sample_ratio(), 1.0);
    }

    #[test]
    fn blank_endpoint_disables_export() {
        let cfg: ObservabilityConfig = toml::from_str(r#"otlp_endpoint = "  ""#).unwrap();
        assert!(cfg.otlp_endpoint.is_some());
        assert_eq!(cfg.endpoint(), None);
    }

    #[test]
    fn endpoint_is_trimmed() {
        let cfg: ObservabilityConfig =
            toml::from_str(r#"otlp_endpoint = " http://otel-collector:4317 ""#).unwrap();
        assert_eq!(cfg.endpoint(), Some("http://otel-collector:4317"));
    }

    #[test]
    fn sample_ratio_stays_in_range() {
        let ratio = |sample_rate| {
            ObservabilityConfig {
                sample_rate,
                ..ObservabilityConfig::default()
            }
            .sample_ratio()
        };
        assert_eq!(ratio(0.2), 0.2);
        assert_eq!(ratio(1.5), 1.0);
        assert_eq!(ratio(-0.1), 0.0);
        assert_eq!(ratio(f64::NAN), 0.0);
    }
}
