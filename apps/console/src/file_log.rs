use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use console_core::log::{matrix_lines, sent_line, CommandLog};
use geometry::RigidTransform;
use shared::domain::{CommandId, Peer};
use tracing::error;

/// Append-only command log file, one session block per run.
pub struct FileLog {
    file: File,
}

impl FileLog {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening command log {}", path.display()))?;
        Ok(Self { file })
    }

    fn write_line(&mut self, line: &str) {
        if let Err(err) = writeln!(self.file, "{line}") {
            error!(%err, "command log write failed");
        }
    }
}

impl CommandLog for FileLog {
    fn session_banner(&mut self, title: &str) {
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        self.write_line(&format!("----- {title} ({stamp}) -----"));
    }

    fn sent(&mut self, id: &CommandId, event: &str, peer: Peer) {
        self.write_line(&sent_line(id, event, peer));
    }

    fn note(&mut self, line: &str) {
        self.write_line(line);
    }

    fn matrix(&mut self, matrix: &RigidTransform) {
        for line in matrix_lines(matrix) {
            self.write_line(&line);
        }
    }
}
