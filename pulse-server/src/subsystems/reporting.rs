//! Reporting: window validation and the seven-day rollup.
//!
//! Rollup math over the buckets returned by the aggregator:
//!   totals         = Σ additive fields
//!   net_installs   = Σ new_installs − Σ uninstalls
//!   error_rate     = 100 × Σ error_count / Σ responses   (0 with no responses)
//!   avg_latency_ms = mean of per-bucket averages over buckets with samples
//!
//! `avg_latency_ms` is a mean of means and drifts from the per-sample mean
//! when bucket volumes differ. `weighted_avg_latency_ms` carries
//! Σ total_latency_ms / Σ latency_count next to it.

use pulse_core::config::MetricsConfig;
use pulse_core::MetricsBucket;
use serde::{Deserialize, Serialize};

/// Parse a caller-supplied hours window. Missing, unparseable, zero or
/// over-limit input falls back to the default without error.
pub fn parse_hours_window(raw: Option<&str>, config: &MetricsConfig) -> u32 {
    match raw.map(str::trim).and_then(|s| s.parse::<u32>().ok()) {
        Some(hours) if (1..=config.max_window_hours).contains(&hours) => hours,
        _ => config.default_window_hours,
    }
}

/// Same rule for an already-typed value (IPC path).
pub fn clamp_hours_window(hours: Option<u32>, config: &MetricsConfig) -> u32 {
    match hours {
        Some(h) if (1..=config.max_window_hours).contains(&h) => h,
        _ => config.default_window_hours,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub agent_id: String,
    pub buckets: usize,
    pub total_sessions: i64,
    pub total_utterances: i64,
    pub total_responses: i64,
    pub total_unique_users: i64,
    pub total_errors: i64,
    pub new_installs: i64,
    pub uninstalls: i64,
    pub net_installs: i64,
    pub error_rate: f64,
    pub avg_latency_ms: f64,
    pub weighted_avg_latency_ms: f64,
}

pub fn summarize(agent_id: &str, buckets: &[MetricsBucket]) -> MetricsSummary {
    let mut summary = MetricsSummary {
        agent_id: agent_id.to_string(),
        buckets: buckets.len(),
        ..Default::default()
    };

    let mut latency_avg_sum = 0i64;
    let mut latency_buckets = 0i64;
    let mut latency_total = 0i64;
    let mut latency_samples = 0i64;

    for b in buckets {
        summary.total_sessions += b.sessions;
        summary.total_utterances += b.utterances;
        summary.total_responses += b.responses;
        summary.total_unique_users += b.unique_users;
        summary.total_errors += b.error_count;
        summary.new_installs += b.new_installs;
        summary.uninstalls += b.uninstalls;

        if b.latency_count > 0 {
            latency_avg_sum += b.avg_latency_ms;
            latency_buckets += 1;
            latency_total += b.total_latency_ms;
            latency_samples += b.latency_count;
        }
    }

    summary.net_installs = summary.new_installs - summary.uninstalls;
    if summary.total_responses > 0 {
        summary.error_rate = 100.0 * summary.total_errors as f64 / summary.total_responses as f64;
    }
    if latency_buckets > 0 {
        summary.avg_latency_ms = latency_avg_sum as f64 / latency_buckets as f64;
    }
    if latency_samples > 0 {
        summary.weighted_avg_latency_ms = latency_total as f64 / latency_samples as f64;
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(hour: u32) -> MetricsBucket {
        MetricsBucket {
            agent_id: "a1".to_string(),
            hour,
            ..Default::default()
        }
    }

    #[test]
    fn test_window_defaults_and_bounds() {
        let config = MetricsConfig::default();
        assert_eq!(parse_hours_window(None, &config), 24);
        assert_eq!(parse_hours_window(Some("48"), &config), 48);
        assert_eq!(parse_hours_window(Some(" 168 "), &config), 168);
        assert_eq!(parse_hours_window(Some("169"), &config), 24);
        assert_eq!(parse_hours_window(Some("0"), &config), 24);
        assert_eq!(parse_hours_window(Some("-3"), &config), 24);
        assert_eq!(parse_hours_window(Some("abc"), &config), 24);
        assert_eq!(clamp_hours_window(Some(6), &config), 6);
        assert_eq!(clamp_hours_window(Some(500), &config), 24);
        assert_eq!(clamp_hours_window(None, &config), 24);
    }

    #[test]
    fn test_summary_totals_and_error_rate() {
        let mut b1 = bucket(10);
        b1.sessions = 1;
        b1.responses = 10;
        b1.error_count = 1;
        let mut b2 = bucket(9);
        b2.sessions = 1;
        b2.responses = 10;

        let summary = summarize("a1", &[b1, b2]);
        assert_eq!(summary.total_sessions, 2);
        assert_eq!(summary.total_responses, 20);
        assert!((summary.error_rate - 5.0).abs() < f64::EPSILON);
        assert_eq!(summary.buckets, 2);
    }

    #[test]
    fn test_summary_without_responses_has_zero_error_rate() {
        let mut b = bucket(1);
        b.error_count = 3;
        let summary = summarize("a1", &[b]);
        assert_eq!(summary.error_rate, 0.0);
    }

    #[test]
    fn test_net_installs() {
        let mut b1 = bucket(1);
        b1.new_installs = 5;
        b1.uninstalls = 1;
        let mut b2 = bucket(2);
        b2.uninstalls = 2;
        let summary = summarize("a1", &[b1, b2]);
        assert_eq!(summary.net_installs, 2);
    }

    #[test]
    fn test_latency_mean_of_means_vs_weighted() {
        // One bucket with a single 100ms sample, one with three 300ms samples.
        let mut b1 = bucket(1);
        b1.total_latency_ms = 100;
        b1.latency_count = 1;
        b1.avg_latency_ms = 100;
        let mut b2 = bucket(2);
        b2.total_latency_ms = 900;
        b2.latency_count = 3;
        b2.avg_latency_ms = 300;
        // No samples: excluded from both averages.
        let b3 = bucket(3);

        let summary = summarize("a1", &[b1, b2, b3]);
        assert!((summary.avg_latency_ms - 200.0).abs() < f64::EPSILON);
        assert!((summary.weighted_avg_latency_ms - 250.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_summary() {
        let summary = summarize("a1", &[]);
        assert_eq!(summary.buckets, 0);
        assert_eq!(summary.total_sessions, 0);
        assert_eq!(summary.avg_latency_ms, 0.0);
    }
}
