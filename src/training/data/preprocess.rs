//! Conversion of the MAESTRO dataset into token files
//!
//! The dataset root holds a manifest listing every performance and the split
//! it belongs to. Each performance is encoded by a [`MidiEncoder`] and written
//! to `<output_dir>/<split>/<midi file name>.tokens`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::datasets::{write_token_file, TOKEN_FILE_EXTENSION};
use crate::error::{Error, Result};
use crate::utils::ensure_dir_exists;

/// Manifest file name at the dataset root
pub const MANIFEST_FILE: &str = "maestro-v2.0.0.json";

/// Progress is logged every this many pieces
const PROGRESS_INTERVAL: usize = 50;

/// Dataset split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Split {
    /// Training pieces
    Train,
    /// Validation pieces
    Validation,
    /// Test pieces
    Test,
}

impl Split {
    /// Directory the split's token files live in
    pub fn dir_name(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Validation => "val",
            Split::Test => "test",
        }
    }
}

impl FromStr for Split {
    type Err = Error;

    fn from_str(label: &str) -> Result<Self> {
        match label {
            "train" => Ok(Split::Train),
            "validation" => Ok(Split::Validation),
            "test" => Ok(Split::Test),
            other => Err(Error::data(format!("unrecognized split type: {}", other))),
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// One manifest entry; other manifest fields are ignored
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    /// MIDI path relative to the dataset root
    pub midi_filename: String,
    /// Split label
    pub split: String,
}

/// Read the manifest at `<root>/maestro-v2.0.0.json`
pub fn read_manifest(root: &Path) -> Result<Vec<ManifestEntry>> {
    let path = root.join(MANIFEST_FILE);
    if !path.is_file() {
        return Err(Error::data(format!("could not find manifest {}", path.display())));
    }
    let content = std::fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Turns a MIDI performance into event tokens
pub trait MidiEncoder {
    /// Encode the performance stored at `midi_path`
    fn encode(&self, midi_path: &Path) -> Result<Vec<u16>>;
}

/// Reads tokens produced by an external tokenizer
///
/// The tokens for `piece.midi` are expected as a JSON array in
/// `piece.midi.tokens.json` next to it.
#[derive(Debug, Clone, Copy, Default)]
pub struct PretokenizedEncoder;

impl PretokenizedEncoder {
    /// Sidecar path for a MIDI file
    pub fn sidecar_path(midi_path: &Path) -> PathBuf {
        let mut path = midi_path.as_os_str().to_owned();
        path.push(".tokens.json");
        PathBuf::from(path)
    }
}

impl MidiEncoder for PretokenizedEncoder {
    fn encode(&self, midi_path: &Path) -> Result<Vec<u16>> {
        let sidecar = Self::sidecar_path(midi_path);
        let content = std::fs::read_to_string(&sidecar).map_err(|e| {
            Error::data(format!("failed to read tokens {}: {}", sidecar.display(), e))
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Number of pieces written per split
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SplitCounts {
    /// Training pieces
    pub train: usize,
    /// Validation pieces
    pub validation: usize,
    /// Test pieces
    pub test: usize,
}

impl SplitCounts {
    /// Pieces over all splits
    pub fn total(&self) -> usize {
        self.train + self.validation + self.test
    }

    fn record(&mut self, split: Split) {
        match split {
            Split::Train => self.train += 1,
            Split::Validation => self.validation += 1,
            Split::Test => self.test += 1,
        }
    }
}

/// Encode every piece listed in the manifest under `maestro_root`
///
/// An unrecognized split label aborts the run; pieces already written stay on disk.
#[instrument(skip_all, fields(root = %maestro_root.display(), output = %output_dir.display()))]
pub fn prepare_maestro(maestro_root: &Path, output_dir: &Path, encoder: &dyn MidiEncoder) -> Result<SplitCounts> {
    for split in [Split::Train, Split::Validation, Split::Test] {
        ensure_dir_exists(output_dir.join(split.dir_name()))?;
    }

    let manifest = read_manifest(maestro_root)?;
    info!("Found {} pieces", manifest.len());

    let mut counts = SplitCounts::default();
    for entry in &manifest {
        let split: Split = entry.split.parse()?;
        let midi_path = maestro_root.join(&entry.midi_filename);
        let file_name = midi_path
            .file_name()
            .ok_or_else(|| Error::data(format!("manifest entry {} has no file name", entry.midi_filename)))?
            .to_string_lossy()
            .into_owned();

        let tokens = encoder.encode(&midi_path)?;
        let out_file = output_dir
            .join(split.dir_name())
            .join(format!("{}.{}", file_name, TOKEN_FILE_EXTENSION));
        write_token_file(&out_file, &tokens)?;

        counts.record(split);
        if counts.total() % PROGRESS_INTERVAL == 0 {
            info!("{} / {}", counts.total(), manifest.len());
        }
    }

    info!(
        "Num train: {}, num val: {}, num test: {}",
        counts.train, counts.validation, counts.test
    );
    Ok(counts)
}
