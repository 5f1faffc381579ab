//! Reading Journal
//!
//! Append-only JSONL file of stored readings. The daemon replays it into a
//! [`MemoryStore`](crate::MemoryStore) on start-up so statistics and
//! calibration have history to work with.

use crate::{Reading, Result};
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Journal writer
pub struct ReadingJournal {
    path: PathBuf,
    writer: BufWriter<File>,
    appended: usize,
}

impl ReadingJournal {
    /// Open (or create) the journal at `path` for appending
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        tracing::debug!("Reading journal opened at {:?}", path);

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            appended: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Readings appended through this handle
    pub fn appended(&self) -> usize {
        self.appended
    }

    /// Append one reading and flush it to disk
    pub fn append(&mut self, reading: &Reading) -> Result<()> {
        let json = serde_json::to_string(reading)?;
        writeln!(self.writer, "{}", json)?;
        self.writer.flush()?;
        self.appended += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Load every reading in the journal at `path`.
    ///
    /// A missing file is an empty journal. Lines that fail to parse are
    /// skipped with a warning, so a torn final write does not block start-up.
    pub fn load(path: &Path) -> Result<Vec<Reading>> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(path)?);
        let mut readings = Vec::new();

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Reading>(&line) {
                Ok(reading) => readings.push(reading),
                Err(e) => {
                    tracing::warn!("Skipping journal line {} in {:?}: {}", index + 1, path, e);
                }
            }
        }

        tracing::info!("Loaded {} readings from {:?}", readings.len(), path);
        Ok(readings)
    }
}

impl Drop for ReadingJournal {
    fn drop(&mut self) {
        self.writer.flush().ok();
    }
}
