//! Folding per-window predictions into one rolling prediction.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One label's share of a batch's predictions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelShare {
    pub label: String,
    pub count: usize,
    pub percent: f64,
}

/// Label counts of one batch, most frequent first.
///
/// Equal counts keep the order in which labels were first predicted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionSummary {
    shares: Vec<LabelShare>,
    total: usize,
}

impl PredictionSummary {
    /// Summarize a batch of predictions. `None` when there are none.
    pub fn from_predictions<I, S>(predictions: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut counts: Vec<(String, usize)> = Vec::new();
        for prediction in predictions {
            let label = prediction.as_ref();
            match counts.iter_mut().find(|(l, _)| l == label) {
                Some((_, count)) => *count += 1,
                None => counts.push((label.to_string(), 1)),
            }
        }

        let total: usize = counts.iter().map(|(_, c)| c).sum();
        if total == 0 {
            return None;
        }

        // Stable, so ties stay in first-seen order
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        let shares = counts
            .into_iter()
            .map(|(label, count)| LabelShare {
                label,
                count,
                percent: count as f64 * 100.0 / total as f64,
            })
            .collect();

        Some(Self { shares, total })
    }

    /// The most frequent label.
    pub fn majority(&self) -> &str {
        self.shares
            .first()
            .map(|s| s.label.as_str())
            .unwrap_or_default()
    }

    /// The two most frequent labels (one if the batch was unanimous).
    pub fn top_two(&self) -> &[LabelShare] {
        &self.shares[..self.shares.len().min(2)]
    }

    pub fn shares(&self) -> &[LabelShare] {
        &self.shares
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_unanimous(&self) -> bool {
        self.shares.len() == 1
    }
}

impl fmt::Display for PredictionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unanimous() {
            return f.write_str(self.majority());
        }
        let parts: Vec<String> = self
            .top_two()
            .iter()
            .map(|s| format!("{} {:.1}%", s.label, s.percent))
            .collect();
        f.write_str(&parts.join(" / "))
    }
}

/// The rolling prediction published after every flush.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CurrentPrediction {
    Label(PredictionSummary),
    /// The batch produced no classifiable feature vectors
    NoFeatures,
}

impl CurrentPrediction {
    pub fn from_predictions<I, S>(predictions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        PredictionSummary::from_predictions(predictions)
            .map(CurrentPrediction::Label)
            .unwrap_or(CurrentPrediction::NoFeatures)
    }

    pub fn majority(&self) -> Option<&str> {
        match self {
            CurrentPrediction::Label(summary) => Some(summary.majority()),
            CurrentPrediction::NoFeatures => None,
        }
    }
}

impl fmt::Display for CurrentPrediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CurrentPrediction::Label(summary) => summary.fmt(f),
            CurrentPrediction::NoFeatures => f.write_str("no features"),
        }
    }
}
