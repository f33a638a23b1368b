//! Held-out evaluation of a fitted classifier.

use serde::{Deserialize, Serialize};

/// Probability at or above which a driver is predicted to win.
pub const DECISION_THRESHOLD: f64 = 0.5;

/// Precision / recall / F1 for one label class.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

impl ClassMetrics {
    fn from_counts(true_pos: usize, false_pos: usize, false_neg: usize) -> Self {
        let precision = ratio(true_pos, true_pos + false_pos);
        let recall = ratio(true_pos, true_pos + false_neg);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        Self {
            precision,
            recall,
            f1,
            support: true_pos + false_neg,
        }
    }
}

/// Confusion counts with "win" as the positive class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Confusion {
    pub true_positive: usize,
    pub false_positive: usize,
    pub true_negative: usize,
    pub false_negative: usize,
}

/// Advisory metrics; never gate publication.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub samples: usize,
    pub threshold: f64,
    pub accuracy: f64,
    pub win: ClassMetrics,
    pub no_win: ClassMetrics,
    pub confusion: Confusion,
    /// Mean squared error of the predicted probabilities.
    pub brier_score: f64,
    /// Share of test rows labeled as winners.
    pub positive_rate: f64,
}

impl EvaluationReport {
    /// Score `probabilities` against `labels`; extra entries on either side
    /// are ignored.
    pub fn evaluate(probabilities: &[f64], labels: &[bool]) -> Self {
        let mut confusion = Confusion::default();
        let mut squared_error = 0.0;
        let mut samples = 0;

        for (&p, &label) in probabilities.iter().zip(labels) {
            let predicted = p >= DECISION_THRESHOLD;
            match (predicted, label) {
                (true, true) => confusion.true_positive += 1,
                (true, false) => confusion.false_positive += 1,
                (false, false) => confusion.true_negative += 1,
                (false, true) => confusion.false_negative += 1,
            }
            let target = if label { 1.0 } else { 0.0 };
            squared_error += (p - target) * (p - target);
            samples += 1;
        }

        let c = confusion;
        Self {
            samples,
            threshold: DECISION_THRESHOLD,
            accuracy: ratio(c.true_positive + c.true_negative, samples),
            win: ClassMetrics::from_counts(c.true_positive, c.false_positive, c.false_negative),
            no_win: ClassMetrics::from_counts(c.true_negative, c.false_negative, c.false_positive),
            confusion,
            brier_score: if samples == 0 {
                0.0
            } else {
                squared_error / samples as f64
            },
            positive_rate: ratio(c.true_positive + c.false_negative, samples),
        }
    }

    /// Plain-text classification report.
    pub fn to_table(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "{:<10} {:>9} {:>9} {:>9} {:>9}\n",
            "class", "precision", "recall", "f1", "support"
        ));
        for (name, m) in [("no_win", &self.no_win), ("win", &self.win)] {
            out.push_str(&format!(
                "{:<10} {:>9.3} {:>9.3} {:>9.3} {:>9}\n",
                name, m.precision, m.recall, m.f1, m.support
            ));
        }
        out.push_str(&format!(
            "\naccuracy {:.3}  brier {:.4}  positive rate {:.3}  (n = {}, threshold {})\n",
            self.accuracy, self.brier_score, self.positive_rate, self.samples, self.threshold
        ));
        out
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}
