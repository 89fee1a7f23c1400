//! Dataset implementations for token sequences

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::Rng;
use tracing::{debug, info, instrument};

use super::{Dataset, Sample};
use crate::error::{Error, Result};
use crate::training::config::TrainingConfig;

/// Extension of token files written by preprocessing
pub const TOKEN_FILE_EXTENSION: &str = "tokens";

/// How a piece is cut into a fixed length window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    /// Tokens per input and per target
    pub max_sequence: usize,
    /// Token filling positions past the end of a short piece
    pub pad_token: u32,
    /// Target after the last real token of a short piece
    pub end_token: u32,
    /// Pick a random window start in long pieces
    pub random_crop: bool,
}

impl WindowConfig {
    /// Window settings of a run
    pub fn from_config(config: &TrainingConfig, random_crop: bool) -> Self {
        Self {
            max_sequence: config.model.max_sequence,
            pad_token: config.model.pad_token,
            end_token: config.model.end_token,
            random_crop,
        }
    }

    /// Cut `piece` into an `(input, target)` pair
    ///
    /// Pieces with at least `max_sequence + 1` tokens yield a full window,
    /// targets shifted by one. Shorter pieces are padded and the target after
    /// the last real token is the end token.
    pub fn window(&self, piece: &[u32], rng: &mut StdRng) -> Sample {
        let max_seq = self.max_sequence;
        let full_seq = max_seq + 1;
        let mut input = vec![self.pad_token; max_seq];
        let mut target = vec![self.pad_token; max_seq];

        let raw_len = piece.len();
        if raw_len == 0 {
            return Sample { input, target };
        }

        if raw_len < full_seq {
            input[..raw_len].copy_from_slice(piece);
            target[..raw_len - 1].copy_from_slice(&piece[1..]);
            target[raw_len - 1] = self.end_token;
        } else {
            let start = if self.random_crop {
                rng.random_range(0..=raw_len - full_seq)
            } else {
                0
            };
            let window = &piece[start..start + full_seq];
            input.copy_from_slice(&window[..max_seq]);
            target.copy_from_slice(&window[1..]);
        }

        Sample { input, target }
    }
}

/// Pieces stored as bincode-encoded `Vec<u16>` token files in one directory
///
/// Files are read on demand, so only the file list is held in memory.
#[derive(Debug, Clone)]
pub struct TokenSequenceDataset {
    /// Directory the pieces were found in
    root: PathBuf,
    /// Sorted token files
    files: Vec<PathBuf>,
    /// Windowing settings
    window: WindowConfig,
}

impl TokenSequenceDataset {
    /// Index every token file under `root`
    #[instrument(skip_all)]
    pub fn open(root: impl AsRef<Path>, window: WindowConfig) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(Error::data(format!(
                "dataset directory {} does not exist",
                root.display()
            )));
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(&root)? {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|ext| ext.to_str()) == Some(TOKEN_FILE_EXTENSION) {
                files.push(path);
            }
        }
        files.sort();

        info!("Found {} pieces in {}", files.len(), root.display());

        Ok(Self { root, files, window })
    }

    /// Directory the pieces were found in
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Token files, in sample order
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    fn read_piece(&self, path: &Path) -> Result<Vec<u32>> {
        let file = File::open(path)
            .map_err(|e| Error::data(format!("failed to open {}: {}", path.display(), e)))?;
        let tokens: Vec<u16> = bincode::deserialize_from(BufReader::new(file))?;
        debug!("Read {} tokens from {}", tokens.len(), path.display());
        Ok(tokens.into_iter().map(u32::from).collect())
    }
}

impl Dataset for TokenSequenceDataset {
    fn len(&self) -> usize {
        self.files.len()
    }

    fn sample(&self, index: usize, rng: &mut StdRng) -> Result<Sample> {
        let path = self.files.get(index).ok_or_else(|| {
            Error::invalid_input(format!("sample index {} >= {}", index, self.files.len()))
        })?;
        let piece = self.read_piece(path)?;
        Ok(self.window.window(&piece, rng))
    }
}

/// Pieces held in memory
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    pieces: Vec<Vec<u32>>,
    window: WindowConfig,
}

impl InMemoryDataset {
    /// Create a dataset from already tokenized pieces
    pub fn new(pieces: Vec<Vec<u32>>, window: WindowConfig) -> Self {
        Self { pieces, window }
    }
}

impl Dataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.pieces.len()
    }

    fn sample(&self, index: usize, rng: &mut StdRng) -> Result<Sample> {
        let piece = self.pieces.get(index).ok_or_else(|| {
            Error::invalid_input(format!("sample index {} >= {}", index, self.pieces.len()))
        })?;
        Ok(self.window.window(piece, rng))
    }
}

/// Write a piece in the token file format
pub fn write_token_file(path: impl AsRef<Path>, tokens: &[u16]) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)
        .map_err(|e| Error::data(format!("failed to create {}: {}", path.display(), e)))?;
    bincode::serialize_into(std::io::BufWriter::new(file), tokens)?;
    Ok(())
}
