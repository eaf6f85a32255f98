//! Read-window summaries over stored records.

use serde::{Deserialize, Serialize};

use crate::store::StoredRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub average: f64,
    /// Mean over records that carry a score; `None` when none do
    pub average_anomaly_score: Option<f64>,
    pub alert_count: usize,
}

/// Summarize one entity's records for `signal_name`.
///
/// `None` when no record matches the signal.
pub fn summarize(records: &[StoredRecord], signal_name: &str) -> Option<SignalStats> {
    let mut matching = records.iter().filter(|r| r.signal_name == signal_name);
    let first = matching.next()?;

    let mut stats = SignalStats {
        count: 0,
        min: first.value,
        max: first.value,
        average: 0.0,
        average_anomaly_score: None,
        alert_count: 0,
    };
    let mut value_sum = 0.0;
    let mut score_sum = 0.0;
    let mut scored = 0usize;

    for record in std::iter::once(first).chain(matching) {
        stats.count += 1;
        stats.min = stats.min.min(record.value);
        stats.max = stats.max.max(record.value);
        value_sum += record.value;
        if record.static_alert {
            stats.alert_count += 1;
        }
        if let Some(score) = record.anomaly_score {
            score_sum += score;
            scored += 1;
        }
    }

    stats.average = value_sum / stats.count as f64;
    if scored > 0 {
        stats.average_anomaly_score = Some(score_sum / scored as f64);
    }
    Some(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn record(signal: &str, value: f64, alert: bool, score: Option<f64>) -> StoredRecord {
        StoredRecord {
            id: Uuid::new_v4(),
            entity_id: "CAR001".to_string(),
            signal_name: signal.to_string(),
            value,
            observed_at: Utc::now(),
            static_alert: alert,
            anomaly_score: score,
        }
    }

    #[test]
    fn test_coolant_window() {
        let records: Vec<_> = [(90.0, false), (92.0, false), (150.0, true), (91.0, false)]
            .into_iter()
            .map(|(v, a)| record("Coolant temperature", v, a, None))
            .collect();

        let stats = summarize(&records, "Coolant temperature").unwrap();
        assert_eq!(stats.min, 90.0);
        assert_eq!(stats.max, 150.0);
        assert_eq!(stats.average, 105.75);
        assert_eq!(stats.alert_count, 1);
        assert_eq!(stats.count, 4);
        assert_eq!(stats.average_anomaly_score, None);
    }

    #[test]
    fn test_score_average_skips_unscored() {
        let records = vec![
            record("Fuel trim", 1.0, false, Some(0.2)),
            record("Fuel trim", 2.0, false, None),
            record("Fuel trim", 3.0, false, Some(0.6)),
            record("Battery voltage", 12.0, false, Some(1.0)),
        ];

        let stats = summarize(&records, "Fuel trim").unwrap();
        assert_eq!(stats.count, 3);
        assert!((stats.average_anomaly_score.unwrap() - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_no_match_is_none() {
        let records = vec![record("Fuel trim", 1.0, false, None)];
        assert_eq!(summarize(&records, "Engine RPMs"), None);
        assert_eq!(summarize(&[], "Engine RPMs"), None);
    }
}
