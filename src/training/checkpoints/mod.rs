//! Training artifacts on disk
//!
//! Everything a run persists lives under one output directory:
//!
//! ```text
//! <output_dir>/
//!   model_params.yaml
//!   results/results.csv
//!   results/best_acc_weights.safetensors
//!   results/best_loss_weights.safetensors
//!   results/best_epochs.txt
//!   weights/epoch_0005.safetensors
//!   tensorboard/scalars.jsonl
//! ```
//!
//! Weight files are written to a temporary name and renamed into place, so an
//! interrupted save never leaves a truncated artifact behind.

pub mod results;
pub mod tracker;

pub use results::{ResultRow, ResultsLog, RESULTS_HEADER};
pub use tracker::{BestRecord, BestTracker, Improvement};

use std::path::{Path, PathBuf};

use candle_nn::VarMap;
use tracing::{debug, info};

use crate::error::Result;
use crate::training::state::Epoch;
use crate::utils::{ensure_dir_exists, load_var_map, save_var_map_atomic, write_file_atomic};

const WEIGHTS_DIR: &str = "weights";
const RESULTS_DIR: &str = "results";
const METRICS_DIR: &str = "tensorboard";

/// Paths of the artifacts saved for a new best epoch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SavedBest {
    /// Written when held-out accuracy improved
    pub accuracy: Option<PathBuf>,
    /// Written when held-out loss improved
    pub loss: Option<PathBuf>,
}

/// Owns the output directory layout and writes every training artifact
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    output_dir: PathBuf,
}

impl CheckpointManager {
    /// Create the manager and the `weights/` and `results/` directories
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self> {
        let output_dir = output_dir.into();
        ensure_dir_exists(output_dir.join(WEIGHTS_DIR))?;
        ensure_dir_exists(output_dir.join(RESULTS_DIR))?;

        debug!("Checkpoint directory ready at {}", output_dir.display());
        Ok(Self { output_dir })
    }

    /// Root output directory
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// `results/results.csv`
    pub fn results_file(&self) -> PathBuf {
        self.output_dir.join(RESULTS_DIR).join("results.csv")
    }

    /// `results/best_acc_weights.safetensors`
    pub fn best_accuracy_file(&self) -> PathBuf {
        self.output_dir.join(RESULTS_DIR).join("best_acc_weights.safetensors")
    }

    /// `results/best_loss_weights.safetensors`
    pub fn best_loss_file(&self) -> PathBuf {
        self.output_dir.join(RESULTS_DIR).join("best_loss_weights.safetensors")
    }

    /// `results/best_epochs.txt`
    pub fn best_summary_file(&self) -> PathBuf {
        self.output_dir.join(RESULTS_DIR).join("best_epochs.txt")
    }

    /// `weights/epoch_NNNN.safetensors`
    pub fn snapshot_path(&self, epoch: usize) -> PathBuf {
        self.output_dir
            .join(WEIGHTS_DIR)
            .join(format!("epoch_{:04}.safetensors", epoch))
    }

    /// `model_params.yaml`
    pub fn params_file(&self) -> PathBuf {
        self.output_dir.join("model_params.yaml")
    }

    /// Directory of the scalar metrics stream
    pub fn metrics_dir(&self) -> PathBuf {
        self.output_dir.join(METRICS_DIR)
    }

    /// Save the best-accuracy and/or best-loss weights for the records just broken
    pub fn save_best(&self, var_map: &VarMap, improvement: Improvement) -> Result<SavedBest> {
        let mut saved = SavedBest::default();

        if improvement.accuracy {
            let path = self.best_accuracy_file();
            save_var_map_atomic(var_map, &path)?;
            saved.accuracy = Some(path);
        }

        if improvement.loss {
            let path = self.best_loss_file();
            save_var_map_atomic(var_map, &path)?;
            saved.loss = Some(path);
        }

        Ok(saved)
    }

    /// Rewrite `best_epochs.txt` from the tracker
    pub fn write_summary(&self, tracker: &BestTracker) -> Result<()> {
        write_file_atomic(self.best_summary_file(), tracker.summary().as_bytes())
    }

    /// Save a numbered weight snapshot
    pub fn save_snapshot(&self, var_map: &VarMap, epoch: Epoch) -> Result<PathBuf> {
        let path = self.snapshot_path(epoch.number());
        save_var_map_atomic(var_map, &path)?;
        info!("Saved weights snapshot to {}", path.display());
        Ok(path)
    }

    /// Load weights into the variables of `var_map`
    pub fn load_weights(&self, var_map: &VarMap, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        load_var_map(var_map, path)?;
        info!("Loaded weights from {}", path.display());
        Ok(())
    }
}
