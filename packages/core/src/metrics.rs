//! Precision/recall/F1/accuracy from a binary confusion matrix.

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClassificationCounts {
    pub true_positive: u64,
    pub true_negative: u64,
    pub false_positive: u64,
    pub false_negative: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("predictions and labels must have equal length, got {predictions} and {labels}")]
    LengthMismatch { predictions: usize, labels: usize },

    #[error("classification values must be binary (0 or 1), got {value}")]
    NonBinaryValue { value: f64 },
}

pub fn calculate_classification_counts(
    predictions: &[f64],
    labels: &[f64],
) -> Result<ClassificationCounts, MetricsError> {
    if predictions.len() != labels.len() {
        return Err(MetricsError::LengthMismatch {
            predictions: predictions.len(),
            labels: labels.len(),
        });
    }

    let mut counts = ClassificationCounts::default();
    for (&prediction, &label) in predictions.iter().zip(labels.iter()) {
        let p = to_binary(prediction)?;
        let l = to_binary(label)?;
        match (p, l) {
            (1, 1) => counts.true_positive += 1,
            (0, 0) => counts.true_negative += 1,
            (1, 0) => counts.false_positive += 1,
            (0, 1) => counts.false_negative += 1,
            _ => unreachable!(),
        }
    }
    Ok(counts)
}

fn to_binary(value: f64) -> Result<u8, MetricsError> {
    if value == 0.0 {
        Ok(0)
    } else if value == 1.0 {
        Ok(1)
    } else {
        Err(MetricsError::NonBinaryValue { value })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Metrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub accuracy: f64,
}

pub fn calculate_metrics(counts: ClassificationCounts) -> Metrics {
    let tp = counts.true_positive as f64;
    let tn = counts.true_negative as f64;
    let fp = counts.false_positive as f64;
    let fn_ = counts.false_negative as f64;

    let precision = if tp + fp > 0.0 { tp / (tp + fp) } else { 0.0 };
    let recall = if tp + fn_ > 0.0 { tp / (tp + fn_) } else { 0.0 };
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    let total = tp + tn + fp + fn_;
    let accuracy = if total > 0.0 { (tp + tn) / total } else { 0.0 };

    Metrics {
        precision,
        recall,
        f1,
        accuracy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_lengths() {
        let err = calculate_classification_counts(&[1.0], &[1.0, 0.0]).unwrap_err();
        assert!(matches!(err, MetricsError::LengthMismatch { .. }));
    }

    #[test]
    fn rejects_non_binary_values() {
        let err = calculate_classification_counts(&[0.5], &[1.0]).unwrap_err();
        assert!(matches!(err, MetricsError::NonBinaryValue { .. }));
    }

    #[test]
    fn perfect_predictions_score_one() {
        let counts =
            calculate_classification_counts(&[1.0, 0.0, 1.0, 0.0], &[1.0, 0.0, 1.0, 0.0]).unwrap();
        let metrics = calculate_metrics(counts);
        assert_eq!(metrics.precision, 1.0);
        assert_eq!(metrics.recall, 1.0);
        assert_eq!(metrics.f1, 1.0);
        assert_eq!(metrics.accuracy, 1.0);
    }

    #[test]
    fn zero_denominators_guard_to_zero() {
        let counts = ClassificationCounts::default();
        let metrics = calculate_metrics(counts);
        assert_eq!(metrics, Metrics::default());
    }

    #[test]
    fn no_positive_predictions_gives_zero_precision_not_nan() {
        let counts = calculate_classification_counts(&[0.0, 0.0], &[1.0, 0.0]).unwrap();
        let metrics = calculate_metrics(counts);
        assert_eq!(metrics.precision, 0.0);
        assert_eq!(metrics.recall, 0.0);
    }
}
