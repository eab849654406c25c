//! Collector strategies
//!
//! One accumulator variant per `AggregationKind`. Every variant supports the
//! same three operations:
//!
//! | Kind    | init               | update                               | extract     |
//! |---------|--------------------|--------------------------------------|-------------|
//! | Counter | `1`                | `n + 1`                              | `[n]`       |
//! | Sum     | `v`                | `s + v`                              | `[s]`       |
//! | Average | `(v, 1)`           | `((m * n + v) / (n + 1), n + 1)`     | `[m]`       |
//! | RawList | `[(v, t)]`         | prepend `(v, t)`                     | the list    |
//!
//! The average is a running mean recomputed from the previous mean and count,
//! not `sum / count`. Results depend on arrival order and must stay exactly
//! as computed here.

use super::types::{AggregationKind, MetricError, MetricValue};
use std::collections::VecDeque;

/// Seconds since the Unix epoch
pub type Timestamp = u64;

/// Aggregated state for one emission key within a batch window
#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    Counter(u64),
    Sum(MetricValue),
    Average { mean: f64, count: u64 },
    /// Newest sample first
    RawList(VecDeque<(MetricValue, Timestamp)>),
}

/// One value produced by `extract`
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub value: MetricValue,
    /// Observation time, only set for raw samples
    pub timestamp: Option<Timestamp>,
}

impl Accumulator {
    /// Start a new accumulator from the first sample of a window
    pub fn init(
        kind: AggregationKind,
        value: Option<MetricValue>,
        timestamp: Timestamp,
    ) -> Result<Self, MetricError> {
        match kind {
            AggregationKind::Counter => Ok(Accumulator::Counter(1)),
            AggregationKind::Sum => Ok(Accumulator::Sum(numeric(value)?)),
            AggregationKind::Average => {
                let mean = numeric(value)?.as_f64().ok_or(MetricError::MissingValue)?;
                Ok(Accumulator::Average { mean, count: 1 })
            }
            AggregationKind::RawList => {
                let value = value.ok_or(MetricError::MissingValue)?;
                Ok(Accumulator::RawList(VecDeque::from([(value, timestamp)])))
            }
        }
    }

    /// Fold another sample in. On error the accumulator is left untouched.
    pub fn update(
        &mut self,
        value: Option<MetricValue>,
        timestamp: Timestamp,
    ) -> Result<(), MetricError> {
        match self {
            Accumulator::Counter(n) => {
                *n = n.saturating_add(1);
            }
            Accumulator::Sum(total) => {
                let value = numeric(value)?;
                *total = total
                    .checked_add(&value)
                    .ok_or_else(|| MetricError::NotNumeric(value.clone()))?;
            }
            Accumulator::Average { mean, count } => {
                let value = numeric(value)?.as_f64().ok_or(MetricError::MissingValue)?;
                let prev_count = *count as f64;
                let next_count = *count + 1;
                *mean = (*mean * prev_count + value) / next_count as f64;
                *count = next_count;
            }
            Accumulator::RawList(samples) => {
                let value = value.ok_or(MetricError::MissingValue)?;
                samples.push_front((value, timestamp));
            }
        }
        Ok(())
    }

    /// Values to emit for this accumulator at flush time
    pub fn extract(&self) -> Vec<Extracted> {
        match self {
            Accumulator::Counter(n) => vec![Extracted::scalar(MetricValue::Integer(*n as i64))],
            Accumulator::Sum(total) => vec![Extracted::scalar(total.clone())],
            Accumulator::Average { mean, .. } => vec![Extracted::scalar(MetricValue::Float(*mean))],
            Accumulator::RawList(samples) => samples
                .iter()
                .map(|(value, ts)| Extracted {
                    value: value.clone(),
                    timestamp: Some(*ts),
                })
                .collect(),
        }
    }

    pub fn kind(&self) -> AggregationKind {
        match self {
            Accumulator::Counter(_) => AggregationKind::Counter,
            Accumulator::Sum(_) => AggregationKind::Sum,
            Accumulator::Average { .. } => AggregationKind::Average,
            Accumulator::RawList(_) => AggregationKind::RawList,
        }
    }
}

impl Extracted {
    fn scalar(value: MetricValue) -> Self {
        Extracted {
            value,
            timestamp: None,
        }
    }
}

fn numeric(value: Option<MetricValue>) -> Result<MetricValue, MetricError> {
    match value {
        Some(v) if v.is_numeric() => Ok(v),
        Some(v) => Err(MetricError::NotNumeric(v)),
        None => Err(MetricError::MissingValue),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: i64) -> Option<MetricValue> {
        Some(MetricValue::Integer(v))
    }

    #[test]
    fn test_counter_counts_events() {
        let mut acc = Accumulator::init(AggregationKind::Counter, None, 0).unwrap();
        for _ in 0..9 {
            acc.update(Some(MetricValue::from("ignored")), 5).unwrap();
        }
        assert_eq!(acc.extract(), vec![Extracted::scalar(MetricValue::Integer(10))]);
    }

    #[test]
    fn test_sum_adds_values() {
        let mut acc = Accumulator::init(AggregationKind::Sum, int(123), 0).unwrap();
        acc.update(int(54), 0).unwrap();
        acc.update(int(-7), 0).unwrap();
        assert_eq!(acc.extract()[0].value, MetricValue::Integer(170));
    }

    #[test]
    fn test_sum_promotes_to_float() {
        let mut acc = Accumulator::init(AggregationKind::Sum, int(1), 0).unwrap();
        acc.update(Some(MetricValue::Float(0.25)), 0).unwrap();
        assert_eq!(acc.extract()[0].value, MetricValue::Float(1.25));
    }

    #[test]
    fn test_sum_rejects_non_numeric_and_keeps_state() {
        let mut acc = Accumulator::init(AggregationKind::Sum, int(3), 0).unwrap();
        let err = acc.update(Some(MetricValue::from("x")), 0).unwrap_err();
        assert_eq!(err, MetricError::NotNumeric(MetricValue::from("x")));
        assert_eq!(acc, Accumulator::Sum(MetricValue::Integer(3)));
    }

    #[test]
    fn test_average_running_mean() {
        let mut acc = Accumulator::init(AggregationKind::Average, int(123), 0).unwrap();
        assert_eq!(acc, Accumulator::Average { mean: 123.0, count: 1 });

        acc.update(int(54), 0).unwrap();
        assert_eq!(acc, Accumulator::Average { mean: 88.5, count: 2 });
        assert_eq!(acc.extract(), vec![Extracted::scalar(MetricValue::Float(88.5))]);
    }

    #[test]
    fn test_average_matches_recurrence() {
        let values = [0.1, 0.7, 13.3, 2.2, 9.9, 1e-3, 42.0];
        let mut acc = Accumulator::init(AggregationKind::Average, Some(values[0].into()), 0).unwrap();
        let (mut mean, mut n) = (values[0], 1.0_f64);
        for v in &values[1..] {
            acc.update(Some((*v).into()), 0).unwrap();
            mean = (mean * n + v) / (n + 1.0);
            n += 1.0;
        }
        match acc {
            Accumulator::Average { mean: m, count } => {
                assert_eq!(m.to_bits(), mean.to_bits());
                assert_eq!(count, values.len() as u64);
            }
            other => panic!("unexpected accumulator {:?}", other),
        }
    }

    #[test]
    fn test_raw_list_newest_first() {
        let mut acc = Accumulator::init(AggregationKind::RawList, int(123), 100).unwrap();
        assert_eq!(
            acc,
            Accumulator::RawList(VecDeque::from([(MetricValue::Integer(123), 100)]))
        );

        acc.update(int(54), 200).unwrap();
        assert_eq!(
            acc,
            Accumulator::RawList(VecDeque::from([
                (MetricValue::Integer(54), 200),
                (MetricValue::Integer(123), 100),
            ]))
        );
        assert_eq!(
            acc.extract(),
            vec![
                Extracted { value: MetricValue::Integer(54), timestamp: Some(200) },
                Extracted { value: MetricValue::Integer(123), timestamp: Some(100) },
            ]
        );
    }

    #[test]
    fn test_raw_list_long_window_keeps_order() {
        let mut acc = Accumulator::init(AggregationKind::RawList, int(0), 0).unwrap();
        for i in 1..10_000 {
            acc.update(int(i), i as Timestamp).unwrap();
        }
        let extracted = acc.extract();
        assert_eq!(extracted.len(), 10_000);
        assert_eq!(extracted[0].value, MetricValue::Integer(9_999));
        assert_eq!(extracted[9_999], Extracted { value: MetricValue::Integer(0), timestamp: Some(0) });
    }

    #[test]
    fn test_raw_list_accepts_any_value() {
        let acc = Accumulator::init(AggregationKind::RawList, Some("up".into()), 1).unwrap();
        assert_eq!(acc.extract()[0].value, MetricValue::from("up"));
    }

    #[test]
    fn test_missing_value() {
        assert_eq!(
            Accumulator::init(AggregationKind::Average, None, 0).unwrap_err(),
            MetricError::MissingValue
        );
        assert!(Accumulator::init(AggregationKind::Counter, None, 0).is_ok());
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            AggregationKind::Counter,
            AggregationKind::Sum,
            AggregationKind::Average,
            AggregationKind::RawList,
        ] {
            let acc = Accumulator::init(kind, int(1), 0).unwrap();
            assert_eq!(acc.kind(), kind);
        }
    }
}
