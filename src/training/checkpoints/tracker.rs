//! Best-so-far tracking for held-out accuracy and loss

use serde::{Deserialize, Serialize};

use crate::training::state::Epoch;

/// Best value of one metric and the epoch it was reached
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BestRecord {
    /// Best value so far
    pub value: f64,
    /// Epoch of the best value, `None` until the first improvement
    pub epoch: Option<Epoch>,
}

/// Which records an observation broke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Improvement {
    /// Held-out accuracy strictly increased
    pub accuracy: bool,
    /// Held-out loss strictly decreased
    pub loss: bool,
}

impl Improvement {
    /// At least one record was broken
    pub fn any(&self) -> bool {
        self.accuracy || self.loss
    }
}

/// Tracks best held-out accuracy and best held-out loss independently
#[derive(Debug, Clone, PartialEq)]
pub struct BestTracker {
    accuracy: BestRecord,
    loss: BestRecord,
}

impl Default for BestTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl BestTracker {
    /// Start with accuracy 0 and loss +inf
    pub fn new() -> Self {
        Self {
            accuracy: BestRecord {
                value: 0.0,
                epoch: None,
            },
            loss: BestRecord {
                value: f64::INFINITY,
                epoch: None,
            },
        }
    }

    /// Record one epoch's held-out metrics; ties are not improvements
    pub fn observe(&mut self, epoch: Epoch, eval_loss: f64, eval_accuracy: f64) -> Improvement {
        let mut improvement = Improvement::default();

        if eval_accuracy > self.accuracy.value {
            self.accuracy = BestRecord {
                value: eval_accuracy,
                epoch: Some(epoch),
            };
            improvement.accuracy = true;
        }

        if eval_loss < self.loss.value {
            self.loss = BestRecord {
                value: eval_loss,
                epoch: Some(epoch),
            };
            improvement.loss = true;
        }

        improvement
    }

    /// Best accuracy record
    pub fn best_accuracy(&self) -> BestRecord {
        self.accuracy
    }

    /// Best loss record
    pub fn best_loss(&self) -> BestRecord {
        self.loss
    }

    /// Human-readable summary written to `best_epochs.txt`
    pub fn summary(&self) -> String {
        let epoch = |record: &BestRecord| match record.epoch {
            Some(epoch) => epoch.number().to_string(),
            None => "none".to_string(),
        };

        format!(
            "Best eval acc epoch: {}\nBest eval acc: {}\n\nBest eval loss epoch: {}\nBest eval loss: {}\n",
            epoch(&self.accuracy),
            self.accuracy.value,
            epoch(&self.loss),
            self.loss.value,
        )
    }
}
