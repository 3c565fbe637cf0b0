use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::keys::BucketId;

/// Counter fields stored in an hourly metrics hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricField {
    Sessions,
    Utterances,
    Responses,
    UniqueUsers,
    ErrorCount,
    NewInstalls,
    Uninstalls,
    TotalLatencyMs,
    LatencyCount,
}

impl MetricField {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricField::Sessions => "sessions",
            MetricField::Utterances => "utterances",
            MetricField::Responses => "responses",
            MetricField::UniqueUsers => "unique_users",
            MetricField::ErrorCount => "error_count",
            MetricField::NewInstalls => "new_installs",
            MetricField::Uninstalls => "uninstalls",
            MetricField::TotalLatencyMs => "total_latency_ms",
            MetricField::LatencyCount => "latency_count",
        }
    }
}

/// One agent's activity within a single UTC hour.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsBucket {
    pub agent_id: String,
    pub date: NaiveDate,
    pub hour: u32,
    pub bucket_start: DateTime<Utc>,
    pub sessions: i64,
    pub utterances: i64,
    pub responses: i64,
    pub unique_users: i64,
    pub error_count: i64,
    pub new_installs: i64,
    pub uninstalls: i64,
    pub total_latency_ms: i64,
    pub latency_count: i64,
    pub avg_latency_ms: i64,
}

impl MetricsBucket {
    /// Build a bucket from the raw field map read out of the store.
    /// Unknown fields are ignored, missing ones read as zero.
    pub fn from_fields(agent_id: &str, bucket: BucketId, fields: &HashMap<String, i64>) -> Self {
        let get = |field: MetricField| fields.get(field.as_str()).copied().unwrap_or(0);

        let total_latency_ms = get(MetricField::TotalLatencyMs);
        let latency_count = get(MetricField::LatencyCount);
        let avg_latency_ms = if latency_count > 0 {
            total_latency_ms / latency_count
        } else {
            0
        };

        Self {
            agent_id: agent_id.to_string(),
            date: bucket.date,
            hour: bucket.hour,
            bucket_start: bucket.start(),
            sessions: get(MetricField::Sessions),
            utterances: get(MetricField::Utterances),
            responses: get(MetricField::Responses),
            unique_users: get(MetricField::UniqueUsers),
            error_count: get(MetricField::ErrorCount),
            new_installs: get(MetricField::NewInstalls),
            uninstalls: get(MetricField::Uninstalls),
            total_latency_ms,
            latency_count,
            avg_latency_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bucket() -> BucketId {
        BucketId::at(Utc.with_ymd_and_hms(2026, 3, 7, 9, 0, 0).unwrap())
    }

    #[test]
    fn test_avg_latency_truncates() {
        let fields = HashMap::from([
            ("total_latency_ms".to_string(), 301),
            ("latency_count".to_string(), 2),
        ]);
        let b = MetricsBucket::from_fields("a1", bucket(), &fields);
        assert_eq!(b.avg_latency_ms, 150);
    }

    #[test]
    fn test_no_latency_samples_reports_zero() {
        let fields = HashMap::from([("sessions".to_string(), 4)]);
        let b = MetricsBucket::from_fields("a1", bucket(), &fields);
        assert_eq!(b.sessions, 4);
        assert_eq!(b.avg_latency_ms, 0);
        assert_eq!(b.hour, 9);
    }
}
