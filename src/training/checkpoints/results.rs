//! Append-only per-epoch results log

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Column names of `results.csv`
pub const RESULTS_HEADER: [&str; 6] = [
    "Epoch",
    "Learn rate",
    "Avg Train loss",
    "Train Accuracy",
    "Avg Eval loss",
    "Eval accuracy",
];

/// One row of the results log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    /// Reported epoch number (0 for the baseline)
    #[serde(rename = "Epoch")]
    pub epoch: usize,

    /// Learning rate at the end of the epoch
    #[serde(rename = "Learn rate")]
    pub learning_rate: f64,

    /// Mean loss over the training split
    #[serde(rename = "Avg Train loss")]
    pub train_loss: f64,

    /// Mean accuracy over the training split
    #[serde(rename = "Train Accuracy")]
    pub train_accuracy: f64,

    /// Mean loss over the held-out split
    #[serde(rename = "Avg Eval loss")]
    pub eval_loss: f64,

    /// Mean accuracy over the held-out split
    #[serde(rename = "Eval accuracy")]
    pub eval_accuracy: f64,
}

/// CSV results log; the header is written once and rows are only appended
#[derive(Debug, Clone)]
pub struct ResultsLog {
    path: PathBuf,
}

impl ResultsLog {
    /// Open the log, writing the header when the file does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if !path.is_file() {
            let mut writer = csv::Writer::from_path(&path).map_err(|e| persistence_error(&path, e))?;
            writer.write_record(RESULTS_HEADER).map_err(|e| persistence_error(&path, e))?;
            writer.flush().map_err(|e| persistence_error(&path, e))?;
        }

        Ok(Self { path })
    }

    /// Path of the log
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row and flush it to disk
    pub fn append(&self, row: &ResultRow) -> Result<()> {
        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| persistence_error(&self.path, e))?;

        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        writer.serialize(row).map_err(|e| persistence_error(&self.path, e))?;
        writer.flush().map_err(|e| persistence_error(&self.path, e))?;
        Ok(())
    }

    /// Read every row written so far
    pub fn read_rows(&self) -> Result<Vec<ResultRow>> {
        let mut reader = csv::Reader::from_path(&self.path)?;
        let rows = reader.deserialize().collect::<std::result::Result<Vec<ResultRow>, _>>()?;
        Ok(rows)
    }
}

fn persistence_error(path: &Path, err: impl std::fmt::Display) -> Error {
    Error::persistence(format!("failed to write {}: {}", path.display(), err))
}
