//! Metrics sinks

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use super::MetricsSink;
use crate::error::Result;

/// Sink that drops every scalar
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn name(&self) -> &str {
        "noop"
    }

    fn add_scalar(&mut self, _name: &str, _value: f64, _step: usize) -> Result<()> {
        Ok(())
    }
}

#[derive(Serialize)]
struct ScalarRecord<'a> {
    name: &'a str,
    value: f64,
    step: usize,
    wall_time: f64,
}

/// Appends one JSON object per scalar to `scalars.jsonl`
pub struct JsonlScalarSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlScalarSink {
    /// File name inside the sink directory
    pub const FILE_NAME: &'static str = "scalars.jsonl";

    /// Open (or continue) the scalar log inside `dir`
    pub fn create(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let path = dir.join(Self::FILE_NAME);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    /// Path of the scalar log
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetricsSink for JsonlScalarSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn add_scalar(&mut self, name: &str, value: f64, step: usize) -> Result<()> {
        let record = ScalarRecord {
            name,
            value,
            step,
            wall_time: Utc::now().timestamp_millis() as f64 / 1000.0,
        };
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jsonl_sink_appends_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = JsonlScalarSink::create(dir.path().join("tensorboard")).unwrap();
        sink.add_scalar("Accuracy/eval", 0.25, 1).unwrap();
        sink.add_scalar("Accuracy/eval", 0.5, 2).unwrap();
        sink.flush().unwrap();

        let content = std::fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["step"], 2);
        assert_eq!(lines[1]["name"], "Accuracy/eval");
        assert_eq!(lines[0]["value"], 0.25);
    }

    #[test]
    fn test_noop_sink_accepts_everything() {
        let mut sink = NoopSink;
        assert!(sink.add_scalar("anything", f64::NAN, 0).is_ok());
        assert!(sink.flush().is_ok());
    }
}
