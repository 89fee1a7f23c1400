//! Epoch numbering and resumable run state

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::training::config::ResumePoint;

/// An epoch of the outer training loop
///
/// The baseline epoch evaluates the model before any update and is reported as
/// epoch 0. Numbered epochs start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Epoch {
    /// Evaluation-only pass before training
    Baseline,
    /// A training epoch, 1-based
    Numbered(usize),
}

impl Epoch {
    /// Number used in results, file names and metrics
    pub fn number(self) -> usize {
        match self {
            Epoch::Baseline => 0,
            Epoch::Numbered(n) => n,
        }
    }

    /// Whether this is the baseline epoch
    pub fn is_baseline(self) -> bool {
        matches!(self, Epoch::Baseline)
    }

    /// Epoch following this one
    pub fn next(self) -> Epoch {
        Epoch::Numbered(self.number() + 1)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Epoch::Baseline => write!(f, "baseline"),
            Epoch::Numbered(n) => write!(f, "{}", n),
        }
    }
}

/// Phase of the outer loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingPhase {
    /// Nothing has run yet
    NotStarted,
    /// Evaluating the untrained or freshly loaded model
    Baseline,
    /// Inside a numbered epoch
    Running(usize),
    /// Every configured epoch has completed
    Done,
}

/// Run-level counters owned by the trainer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Epoch the run continues from (0 for a fresh run)
    pub start_epoch: usize,

    /// Whether weights were loaded from an earlier run
    pub resumed: bool,

    /// Last fully completed epoch
    pub completed: Option<Epoch>,

    /// Training batches processed over the lifetime of the run
    pub global_step: usize,

    /// Batches in one training epoch
    pub batches_per_epoch: usize,

    /// Current phase
    pub phase: TrainingPhase,

    /// When this process started training
    pub started_at: DateTime<Utc>,
}

impl RunState {
    /// State for a run starting from scratch
    pub fn fresh(batches_per_epoch: usize) -> Self {
        Self {
            start_epoch: 0,
            resumed: false,
            completed: None,
            global_step: 0,
            batches_per_epoch,
            phase: TrainingPhase::NotStarted,
            started_at: Utc::now(),
        }
    }

    /// State for a run continuing after `resume.epoch`
    ///
    /// The step counter is re-derived from the completed epochs so the learning
    /// rate schedule continues where it left off.
    pub fn resume_from(resume: &ResumePoint, batches_per_epoch: usize) -> Self {
        Self {
            start_epoch: resume.epoch,
            resumed: true,
            completed: Some(Epoch::Numbered(resume.epoch)),
            global_step: resume.epoch * batches_per_epoch,
            ..Self::fresh(batches_per_epoch)
        }
    }

    /// Whether the run continues earlier work
    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    /// First epoch that performs a training pass
    pub fn first_training_epoch(&self) -> Epoch {
        Epoch::Numbered(self.start_epoch + 1)
    }

    /// Count one processed training batch
    pub fn advance_step(&mut self) {
        self.global_step += 1;
    }
}
