use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::codec::JsonDeserializer;

/// Append-only log of outgoing updates, one JSON message per line.
pub struct BackupLog {
    path: PathBuf,
    writer: BufWriter<File>,
    lines: usize,
}

impl BackupLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("cannot create backup directory {}", dir.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("cannot open backup log {}", path.display()))?;
        info!(path = %path.display(), "backup log opened");
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            lines: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of lines written through this handle.
    pub fn lines(&self) -> usize {
        self.lines
    }

    pub fn append(&mut self, message: &str) -> Result<()> {
        let line = message.replace('\n', " ");
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        self.lines += 1;
        Ok(())
    }
}

/// Counts of a backup replay.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    pub applied: usize,
    pub rejected: usize,
}

/// Feeds every line of a backup log into `deserializer`, in order.
pub fn replay(path: impl AsRef<Path>, deserializer: &mut JsonDeserializer) -> Result<ReplayStats> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("cannot read backup log {}", path.display()))?;
    let mut stats = ReplayStats::default();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let (success, reply) = deserializer.write(&line);
        if success {
            stats.applied += 1;
        } else {
            stats.rejected += 1;
            warn!(line = number + 1, %reply, "backup entry rejected");
        }
    }
    info!(path = %path.display(), applied = stats.applied, rejected = stats.rejected, "backup replayed");
    Ok(stats)
}
